use serde::{Deserialize, Serialize};

/// How often the keep-alive timer fires while a connection is under evaluation.
///
/// The interval only needs to beat the transport's handshake timeout with some
/// margin; gates are allowed to take far longer than one tick.
pub const KEEPALIVE_INTERVAL_MS: u64 = 2_000;

/// Default upper bound the admission layer places on one evaluation before it
/// gives up and rejects the connection attempt.
pub const DEFAULT_PATIENCE_SECS: u64 = 120;

/// Outcome and progress notifications emitted by a deferral toward the
/// handshake layer that owns the connection attempt.
///
/// `Resolved` and `Rejected` are terminal: exactly one of them is emitted per
/// deferral, at most once. The remaining variants can occur any number of
/// times while the evaluation is in flight. Card payloads are opaque JSON
/// strings; the engine never inspects them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeferralEvent {
    /// Every gate agreed; the client may finish connecting.
    Resolved,
    /// A gate refused the client. `message` is shown to the user.
    Rejected { message: String },
    /// The most recent progress text, for a "please wait: ..." display.
    Progress { message: String },
    /// A gate presented an interactive card to the connecting client.
    Card { payload: String },
    /// Periodic ping so the transport does not time out the pending handshake.
    KeepAlive,
}

impl DeferralEvent {
    /// True for the two variants that end the evaluation.
    pub fn is_terminal(&self) -> bool {
        matches!(self, DeferralEvent::Resolved | DeferralEvent::Rejected { .. })
    }
}
