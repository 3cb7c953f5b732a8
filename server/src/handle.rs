use log::debug;
use std::collections::HashMap;
use std::sync::{Arc, Weak};

use crate::card::CardResponder;
use crate::deferral::ClientDeferral;

/// Gate-facing view of one [`ClientDeferral`].
///
/// Handles are deliberately weak: the handshake layer holds the only strong
/// reference, so dropping the connection (player closed the game mid-queue,
/// transport died) invalidates every handle at once. A gate calling through a
/// dead handle gets a logged no-op, never a fault — races between "client
/// just left" and "gate just finished" are routine.
///
/// Cloning a handle is cheap; each gate can keep its own copy.
#[derive(Clone)]
pub struct DeferralHandle {
    inner: Weak<ClientDeferral>,
}

impl DeferralHandle {
    pub fn new(deferral: &Arc<ClientDeferral>) -> Self {
        Self {
            inner: Arc::downgrade(deferral),
        }
    }

    fn with<R>(&self, op: &str, f: impl FnOnce(&Arc<ClientDeferral>) -> R) -> Option<R> {
        match self.inner.upgrade() {
            Some(deferral) => Some(f(&deferral)),
            None => {
                debug!("{} on a torn-down connection, ignoring", op);
                None
            }
        }
    }

    /// True while the underlying connection attempt still exists.
    pub fn is_live(&self) -> bool {
        self.inner.strong_count() > 0
    }

    pub fn register(&self, gate: &str, description: &str) {
        self.with("register", |d| d.register(gate, description));
    }

    pub fn update(&self, gate: &str, message: &str) {
        self.with("update", |d| d.update(gate, message));
    }

    pub fn complete(&self, gate: &str) {
        self.with("complete", |d| d.complete(gate));
    }

    pub fn reject(&self, gate: &str, message: &str) {
        self.with("reject", |d| d.reject(gate, message));
    }

    pub fn present_card(&self, payload: &str, responder: Option<CardResponder>) {
        self.with("present_card", |d| d.present_card(payload, responder));
    }

    pub fn set_handover(&self, key: &str, json: &str) {
        self.with("set_handover", |d| d.set_handover(key, json));
    }

    /// Handover snapshot, or `None` when the connection is gone.
    pub fn handover(&self) -> Option<HashMap<String, String>> {
        self.with("handover", |d| d.handover())
    }
}
