//! Pending-connection tracking for the admission server
//!
//! This module is the handshake layer's side of deferred admission:
//! - Ownership of every in-flight connection attempt and its deferral
//! - Client id assignment and capacity enforcement
//! - Routing of card answers from the transport to the right deferral
//! - Teardown on disconnect, which invalidates all gate handles at once
//! - The give-up policy: evaluations that outlive the configured patience are
//!   rejected through a synthetic watchdog gate
//!
//! The manager holds the only strong references to deferrals. Gates see weak
//! handles, so nothing a gate retains can outlive the connection attempt.

use log::{info, warn};
use shared::DeferralEvent;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

use crate::deferral::ClientDeferral;

/// Gate key used when the admission layer itself rejects an overdue
/// evaluation. Reserved; real gates should not use it.
pub const WATCHDOG_GATE: &str = "watchdog";

/// One connection attempt currently under evaluation.
pub struct PendingClient {
    /// Unique client identifier assigned at connection time.
    pub id: u32,
    /// Network address the attempt came from.
    pub addr: SocketAddr,
    /// When the evaluation started, for the patience sweep.
    pub started: Instant,
    /// The attempt's deferral; this is the strong reference.
    pub deferral: Arc<ClientDeferral>,
}

/// Everything the handshake layer needs to drive one new attempt.
pub struct NewConnection {
    pub client_id: u32,
    pub deferral: Arc<ClientDeferral>,
    /// Outcome side of the deferral: resolve/reject/progress/card/keep-alive.
    pub events: mpsc::UnboundedReceiver<DeferralEvent>,
}

/// Owns all in-flight connection attempts.
///
/// Mirrors the roster of admitted clients a session layer keeps, but for the
/// window *before* admission: every entry is a client the server has neither
/// accepted nor refused yet. Entries leave the roster when the handshake
/// layer calls [`AdmissionManager::finish`] — after delivering the outcome to
/// the wire, or because the client disconnected mid-evaluation — or when the
/// patience sweep expires them.
pub struct AdmissionManager {
    /// Pending attempts indexed by client id.
    pending: HashMap<u32, PendingClient>,
    /// Next client id to hand out.
    next_client_id: u32,
    /// Maximum number of concurrently evaluating attempts.
    max_pending: usize,
    /// How long one evaluation may take before the watchdog rejects it.
    patience: Duration,
}

impl AdmissionManager {
    pub fn new(max_pending: usize, patience: Duration) -> Self {
        Self {
            pending: HashMap::new(),
            next_client_id: 1,
            max_pending,
            patience,
        }
    }

    /// Opens a new connection attempt, creating its deferral and outcome
    /// channel. Returns `None` when the evaluation roster is full; the caller
    /// should refuse the client outright rather than queue it here.
    pub fn begin(&mut self, addr: SocketAddr) -> Option<NewConnection> {
        if self.pending.len() >= self.max_pending {
            warn!("admission roster full, refusing connection from {}", addr);
            return None;
        }

        let client_id = self.next_client_id;
        self.next_client_id += 1;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let deferral = Arc::new(ClientDeferral::new(client_id, events_tx));

        info!("client {} from {} entering evaluation", client_id, addr);
        self.pending.insert(
            client_id,
            PendingClient {
                id: client_id,
                addr,
                started: Instant::now(),
                deferral: Arc::clone(&deferral),
            },
        );

        Some(NewConnection {
            client_id,
            deferral,
            events: events_rx,
        })
    }

    /// The deferral of a pending attempt, if it is still pending.
    pub fn deferral(&self, client_id: u32) -> Option<&Arc<ClientDeferral>> {
        self.pending.get(&client_id).map(|p| &p.deferral)
    }

    /// Forwards a card answer arriving from the transport to the attempt it
    /// belongs to. Returns false for unknown clients (already finished, or
    /// never pending) — a benign race, not an error.
    pub fn route_card_response(&self, client_id: u32, data: &str) -> bool {
        match self.pending.get(&client_id) {
            Some(pending) => {
                pending.deferral.handle_card_response(data);
                true
            }
            None => false,
        }
    }

    /// Closes out an attempt and drops its strong reference, turning every
    /// gate handle into a no-op. Returns true if the attempt was still
    /// pending.
    pub fn finish(&mut self, client_id: u32) -> bool {
        if let Some(pending) = self.pending.remove(&client_id) {
            info!("client {} left evaluation", pending.id);
            true
        } else {
            false
        }
    }

    /// Rejects and removes every attempt that has been evaluating for longer
    /// than the configured patience. The rejection goes through a synthetic
    /// watchdog gate, so it reaches the outcome channel like any other
    /// refusal. Returns the expired client ids.
    pub fn expire_overdue(&mut self) -> Vec<u32> {
        let overdue: Vec<u32> = self
            .pending
            .values()
            .filter(|p| !p.deferral.is_completed() && p.started.elapsed() > self.patience)
            .map(|p| p.id)
            .collect();

        for client_id in &overdue {
            if let Some(pending) = self.pending.remove(client_id) {
                warn!(
                    "client {} still evaluating after {:?}, giving up",
                    pending.id, self.patience
                );
                pending
                    .deferral
                    .reject(WATCHDOG_GATE, "connection evaluation timed out");
            }
        }

        overdue
    }

    /// Number of attempts currently under evaluation.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
