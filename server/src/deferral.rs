//! Connection deferral state machine for the admission server
//!
//! This module aggregates the verdicts of independent server-side gates into
//! the single outcome of one connection attempt:
//! - Per-gate verdict tracking (pending, done, rejected) with lazy registration
//! - Conjunctive aggregation: admission requires every gate to agree
//! - Fail-fast rejection: the first refusing gate ends the evaluation at once
//! - Interactive card exchange and handover data between gates
//! - Keep-alive scheduling so the transport never times out a client that is
//!   still under evaluation
//!
//! Outcomes travel to the owning handshake layer as [`DeferralEvent`]s over a
//! channel installed at construction. The terminal events (`Resolved`,
//! `Rejected`) fire at most once per deferral, no matter how many gates finish
//! or timer ticks race each other.

use log::{debug, info};
use shared::DeferralEvent;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::card::{CardChannel, CardResponder};
use crate::handle::DeferralHandle;
use crate::handover::HandoverStore;
use crate::scheduler::{Scheduler, Tick};

/// Verdict of a single admission gate for one connecting client.
///
/// States are created lazily the first time any operation names the gate and
/// are never removed individually; they vanish only when the whole deferral
/// is dropped. `rejected` is sticky: once a gate has refused the client there
/// is no way back to a non-rejected state.
#[derive(Debug, Clone)]
pub struct GateState {
    /// Gate identifier, unique within one deferral.
    pub gate: String,
    /// Static human-readable label for the gate, set at registration.
    pub description: String,
    /// Latest progress text the gate published.
    pub message: String,
    /// The gate finished its check and approves the client.
    pub done: bool,
    /// The gate refused the client; `message` carries the reason.
    pub rejected: bool,
}

impl GateState {
    fn new(gate: &str) -> Self {
        Self {
            gate: gate.to_string(),
            description: String::new(),
            message: String::new(),
            done: false,
            rejected: false,
        }
    }
}

/// Everything mutable about one evaluation, behind a single lock so every
/// aggregation pass sees a consistent cross-field snapshot.
struct DeferralInner {
    /// Gate verdicts in registration order. Order matters: when one pass
    /// observes several rejected gates, the earliest-registered one supplies
    /// the rejection message.
    gates: Vec<GateState>,
    handover: HandoverStore,
    card: CardChannel,
    /// Terminal outcome delivered. Single-assignment; every mutating call
    /// after this point is a logged no-op.
    completed: bool,
    /// The initial gate-notification pass has finished. Only then does an
    /// empty gate list count as immediate approval.
    ran_events: bool,
    /// At least one gate registered and no outcome delivered yet.
    pending: bool,
    /// Most recently updated progress message across all gates.
    latest_message: Option<String>,
    /// Last progress message actually announced, to suppress duplicates.
    announced_message: Option<String>,
}

/// What an aggregation pass decided while the lock was held. Events are sent
/// and responders invoked only after the lock is released, so a gate calling
/// back into the deferral from its responder cannot deadlock.
enum Verdict {
    Resolve,
    Reject(String),
    Progress(String),
}

/// Deferred admission of one connecting client.
///
/// Created by the handshake layer when gate evaluation begins, owned strongly
/// by that layer for the lifetime of the connection attempt, and handed to
/// gates only as weak [`DeferralHandle`]s. All entry points may be called
/// from any thread; mutations are linearized by an internal lock and the
/// terminal transition is decided under that lock, so concurrent completions
/// produce exactly one outcome event.
pub struct ClientDeferral {
    client_id: u32,
    events: mpsc::UnboundedSender<DeferralEvent>,
    inner: Mutex<DeferralInner>,
    timer_armed: AtomicBool,
}

impl ClientDeferral {
    /// Creates the deferral for one connection attempt. `events` is the
    /// outcome channel of the owning handshake layer; it is installed exactly
    /// once, before any gate is notified.
    pub fn new(client_id: u32, events: mpsc::UnboundedSender<DeferralEvent>) -> Self {
        Self {
            client_id,
            events,
            inner: Mutex::new(DeferralInner {
                gates: Vec::new(),
                handover: HandoverStore::new(),
                card: CardChannel::new(),
                completed: false,
                ran_events: false,
                pending: false,
                latest_message: None,
                announced_message: None,
            }),
            timer_armed: AtomicBool::new(false),
        }
    }

    pub fn client_id(&self) -> u32 {
        self.client_id
    }

    /// Returns a fresh gate-facing view of this deferral. The handle is weak:
    /// it never keeps a torn-down connection's deferral alive, and calls
    /// through it after teardown degrade to logged no-ops.
    pub fn handle(self: &Arc<Self>) -> DeferralHandle {
        DeferralHandle::new(self)
    }

    // Poisoning is recovered rather than propagated: a panicking gate thread
    // must not take the whole admission path down with it.
    fn state(&self) -> MutexGuard<'_, DeferralInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: DeferralEvent) {
        if self.events.send(event).is_err() {
            debug!(
                "client {}: outcome channel closed, dropping event",
                self.client_id
            );
        }
    }

    /// Registers `gate` as an interested party, with a static description for
    /// status displays. Safe to call for an already-known gate (the
    /// description is refreshed, verdicts are untouched).
    pub fn register(&self, gate: &str, description: &str) {
        let verdict = {
            let mut inner = self.state();
            if inner.completed {
                debug!(
                    "client {}: gate '{}' registered after completion, ignoring",
                    self.client_id, gate
                );
                return;
            }
            let state = Self::gate_entry(&mut inner, gate);
            state.description = description.to_string();
            debug!("client {}: gate '{}' deferred admission", self.client_id, gate);
            self.evaluate_locked(&mut inner)
        };
        self.deliver(verdict);
    }

    /// Publishes new progress text for `gate`, lazily registering it if this
    /// is the first time the gate is seen.
    pub fn update(&self, gate: &str, message: &str) {
        let verdict = {
            let mut inner = self.state();
            if inner.completed {
                debug!(
                    "client {}: progress from gate '{}' after completion, ignoring",
                    self.client_id, gate
                );
                return;
            }
            let state = Self::gate_entry(&mut inner, gate);
            state.message = message.to_string();
            inner.latest_message = Some(message.to_string());
            self.evaluate_locked(&mut inner)
        };
        self.deliver(verdict);
    }

    /// Marks `gate` as finished and approving. The client is admitted once
    /// every registered gate has done the same.
    pub fn complete(&self, gate: &str) {
        let verdict = {
            let mut inner = self.state();
            if inner.completed {
                debug!(
                    "client {}: gate '{}' completed after outcome, ignoring",
                    self.client_id, gate
                );
                return;
            }
            let state = Self::gate_entry(&mut inner, gate);
            state.done = true;
            self.evaluate_locked(&mut inner)
        };
        self.deliver(verdict);
    }

    /// Marks `gate` as refusing the client. Rejection is fail-fast: it does
    /// not wait for slower gates, and it is sticky for the rest of the
    /// deferral's life.
    pub fn reject(&self, gate: &str, message: &str) {
        let verdict = {
            let mut inner = self.state();
            if inner.completed {
                debug!(
                    "client {}: rejection from gate '{}' after outcome, ignoring",
                    self.client_id, gate
                );
                return;
            }
            let state = Self::gate_entry(&mut inner, gate);
            state.rejected = true;
            state.message = message.to_string();
            self.evaluate_locked(&mut inner)
        };
        self.deliver(verdict);
    }

    /// Presents an interactive card to the connecting client. The payload is
    /// an opaque JSON string; `responder` is invoked with the client's answer.
    /// A card presented while another is pending replaces it, no queueing.
    pub fn present_card(&self, payload: &str, responder: Option<CardResponder>) {
        {
            let mut inner = self.state();
            if inner.completed {
                debug!(
                    "client {}: card presented after completion, ignoring",
                    self.client_id
                );
                return;
            }
            inner.card.present(payload, responder);
        }
        self.emit(DeferralEvent::Card {
            payload: payload.to_string(),
        });
    }

    /// Forwards the connecting client's card answer to whichever gate
    /// presented the pending card, and clears it. Without a pending card, or
    /// after the outcome was delivered, this does nothing.
    pub fn handle_card_response(&self, data: &str) {
        let responder = {
            let mut inner = self.state();
            if inner.completed {
                debug!(
                    "client {}: card response after completion, ignoring",
                    self.client_id
                );
                return;
            }
            match inner.card.take_pending() {
                Some(responder) => responder,
                None => {
                    debug!(
                        "client {}: card response with no card pending, ignoring",
                        self.client_id
                    );
                    return;
                }
            }
        };
        // Run the gate's closure without holding the lock; it may well call
        // complete()/reject() on this same deferral.
        if let Some(mut responder) = responder {
            responder(data);
        }
    }

    /// Stores handover data for the post-admission session establishment
    /// step. Last write to a key wins.
    pub fn set_handover(&self, key: &str, json: &str) {
        let mut inner = self.state();
        if inner.completed {
            debug!(
                "client {}: handover write for '{}' after completion, ignoring",
                self.client_id, key
            );
            return;
        }
        inner.handover.set(key, json);
    }

    /// Snapshot of the handover data accumulated so far.
    pub fn handover(&self) -> std::collections::HashMap<String, String> {
        self.state().handover.snapshot()
    }

    /// Snapshot of the per-gate verdicts, for status displays.
    pub fn gate_states(&self) -> Vec<GateState> {
        self.state().gates.clone()
    }

    /// Marks the initial gate-notification pass as finished. From here on an
    /// evaluation with zero registered gates counts as immediate approval
    /// instead of "still notifying".
    pub fn mark_events_run(&self) {
        self.state().ran_events = true;
    }

    pub fn has_run_events(&self) -> bool {
        self.state().ran_events
    }

    /// True while at least one registered gate has not finished and no
    /// outcome has been delivered.
    pub fn is_deferred(&self) -> bool {
        let inner = self.state();
        !inner.completed && inner.gates.iter().any(|g| !g.done)
    }

    /// True once a gate registered, until the outcome is delivered.
    pub fn is_pending(&self) -> bool {
        self.state().pending
    }

    pub fn is_completed(&self) -> bool {
        self.state().completed
    }

    /// Runs one aggregation pass over all gate verdicts and delivers whatever
    /// it concluded. Invoked after every state change and on every keep-alive
    /// tick; safe to call from any number of threads at once, only the pass
    /// that actually flips the terminal flag emits the terminal event.
    pub fn evaluate(&self) {
        let verdict = {
            let mut inner = self.state();
            self.evaluate_locked(&mut inner)
        };
        self.deliver(verdict);
    }

    /// Arms the periodic keep-alive. Idempotent: a second call does not
    /// double-arm. The scheduled task holds only a weak reference, so the
    /// timer dies with the deferral instead of keeping it alive.
    pub fn start_timer(self: &Arc<Self>, scheduler: &dyn Scheduler, period: Duration) {
        if self.timer_armed.swap(true, Ordering::SeqCst) {
            debug!("client {}: keep-alive timer already armed", self.client_id);
            return;
        }
        let weak = Arc::downgrade(self);
        scheduler.repeat(
            period,
            Box::new(move || match weak.upgrade() {
                Some(deferral) => deferral.keepalive_tick(),
                None => Tick::Stop,
            }),
        );
    }

    /// One timer tick: ping the transport and re-run aggregation. Returns
    /// [`Tick::Stop`] once the outcome has been delivered, which cancels the
    /// periodic task.
    pub fn keepalive_tick(&self) -> Tick {
        if self.is_completed() {
            return Tick::Stop;
        }
        self.emit(DeferralEvent::KeepAlive);
        self.evaluate();
        if self.is_completed() {
            Tick::Stop
        } else {
            Tick::Continue
        }
    }

    fn gate_entry<'a>(inner: &'a mut DeferralInner, gate: &str) -> &'a mut GateState {
        // Unknown gates are first registrations, not errors; gates are not
        // required to announce themselves before reporting.
        if let Some(idx) = inner.gates.iter().position(|g| g.gate == gate) {
            return &mut inner.gates[idx];
        }
        inner.pending = true;
        inner.gates.push(GateState::new(gate));
        inner.gates.last_mut().unwrap()
    }

    /// The aggregation rules, applied under the lock. Flips `completed`
    /// before returning a terminal verdict, which is what makes the terminal
    /// event exactly-once under concurrent callers.
    fn evaluate_locked(&self, inner: &mut DeferralInner) -> Option<Verdict> {
        if inner.completed {
            return None;
        }

        // Earliest-registered rejected gate wins over later ones.
        if let Some(refusal) = inner.gates.iter().find(|g| g.rejected) {
            let message = refusal.message.clone();
            info!(
                "client {}: rejected by gate '{}': {}",
                self.client_id, refusal.gate, message
            );
            inner.completed = true;
            inner.pending = false;
            return Some(Verdict::Reject(message));
        }

        let all_done = !inner.gates.is_empty() && inner.gates.iter().all(|g| g.done);
        let nothing_registered = inner.gates.is_empty() && inner.ran_events;
        if all_done || nothing_registered {
            info!(
                "client {}: cleared {} admission gate(s)",
                self.client_id,
                inner.gates.len()
            );
            inner.completed = true;
            inner.pending = false;
            return Some(Verdict::Resolve);
        }

        // Still waiting; surface progress text only when it actually changed.
        if inner.latest_message.is_some() && inner.latest_message != inner.announced_message {
            inner.announced_message = inner.latest_message.clone();
            return inner.announced_message.clone().map(Verdict::Progress);
        }

        None
    }

    fn deliver(&self, verdict: Option<Verdict>) {
        match verdict {
            Some(Verdict::Resolve) => self.emit(DeferralEvent::Resolved),
            Some(Verdict::Reject(message)) => self.emit(DeferralEvent::Rejected { message }),
            Some(Verdict::Progress(message)) => self.emit(DeferralEvent::Progress { message }),
            None => {}
        }
    }
}
