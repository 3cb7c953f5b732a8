/// Closure a gate supplies when presenting a card; invoked with the raw JSON
/// the connecting client answered with.
pub type CardResponder = Box<dyn FnMut(&str) + Send>;

/// The single in-flight interactive card of one deferral.
///
/// At most one card is outstanding at a time: presenting a new one replaces
/// both the payload and the responder (last writer wins, no queue). Lives
/// inside the deferral's guarded state; the responder itself must only be run
/// after that lock is released.
#[derive(Default)]
pub struct CardChannel {
    current: Option<String>,
    responder: Option<CardResponder>,
}

impl CardChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a card payload and the responder to call when the client
    /// answers. Any previously pending card is dropped unanswered.
    pub fn present(&mut self, payload: &str, responder: Option<CardResponder>) {
        self.current = Some(payload.to_string());
        self.responder = responder;
    }

    /// Takes the pending card, if any. Returns the responder for the caller
    /// to invoke outside the state lock; `None` when no card was pending.
    pub fn take_pending(&mut self) -> Option<Option<CardResponder>> {
        self.current.take()?;
        Some(self.responder.take())
    }

    pub fn pending_payload(&self) -> Option<&str> {
        self.current.as_deref()
    }

    pub fn has_pending(&self) -> bool {
        self.current.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_present_and_take() {
        let mut channel = CardChannel::new();
        assert!(!channel.has_pending());

        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = Arc::clone(&hits);
        channel.present(
            r#"{"type":"AdaptiveCard"}"#,
            Some(Box::new(move |_| {
                hits2.fetch_add(1, Ordering::SeqCst);
            })),
        );

        assert_eq!(channel.pending_payload(), Some(r#"{"type":"AdaptiveCard"}"#));

        let responder = channel.take_pending().expect("card was pending");
        let mut responder = responder.expect("responder was set");
        responder(r#"{"submitted":true}"#);

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(!channel.has_pending());
    }

    #[test]
    fn test_take_with_nothing_pending() {
        let mut channel = CardChannel::new();
        assert!(channel.take_pending().is_none());
    }

    #[test]
    fn test_new_card_replaces_old() {
        let mut channel = CardChannel::new();

        let first_hits = Arc::new(AtomicUsize::new(0));
        let first_hits2 = Arc::clone(&first_hits);
        channel.present(
            "first",
            Some(Box::new(move |_| {
                first_hits2.fetch_add(1, Ordering::SeqCst);
            })),
        );
        channel.present("second", None);

        assert_eq!(channel.pending_payload(), Some("second"));

        // The replaced responder must never fire.
        let responder = channel.take_pending().expect("card was pending");
        assert!(responder.is_none());
        assert_eq!(first_hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_card_without_responder() {
        let mut channel = CardChannel::new();
        channel.present("{}", None);

        let responder = channel.take_pending().expect("card was pending");
        assert!(responder.is_none());
        assert!(channel.take_pending().is_none());
    }
}
