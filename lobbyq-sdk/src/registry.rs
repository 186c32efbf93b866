//! Topic subscription bookkeeping.
//!
//! One active topic per session. The registry, not the transport, is the
//! source of truth: after a reconnect the facade replays `current_topic()`
//! into the fresh session.

use crate::frame::LobbyId;

#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    current: Option<LobbyId>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a subscription. Returns the previous topic when this call
    /// actually switched topics, `None` when it was a no-op (already
    /// subscribed) or there was nothing to leave.
    pub fn subscribe(&mut self, topic: LobbyId) -> Option<LobbyId> {
        if self.current == Some(topic) {
            return None;
        }
        self.current.replace(topic)
    }

    /// Whether `subscribe` would change anything.
    pub fn is_subscribed(&self, topic: LobbyId) -> bool {
        self.current == Some(topic)
    }

    /// Clear the subscription if `topic` is the active one. Unsubscribing
    /// a topic that is not current is a no-op.
    pub fn unsubscribe(&mut self, topic: LobbyId) -> bool {
        if self.current == Some(topic) {
            self.current = None;
            true
        } else {
            false
        }
    }

    pub fn current_topic(&self) -> Option<LobbyId> {
        self.current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribe_is_idempotent() {
        let mut reg = SubscriptionRegistry::new();
        assert_eq!(reg.subscribe(1), None);
        assert_eq!(reg.current_topic(), Some(1));
        assert_eq!(reg.subscribe(1), None);
        assert_eq!(reg.current_topic(), Some(1));
    }

    #[test]
    fn switching_reports_old_topic() {
        let mut reg = SubscriptionRegistry::new();
        reg.subscribe(1);
        assert_eq!(reg.subscribe(2), Some(1));
        assert_eq!(reg.current_topic(), Some(2));
    }

    #[test]
    fn unsubscribe_only_clears_current() {
        let mut reg = SubscriptionRegistry::new();
        reg.subscribe(5);
        assert!(!reg.unsubscribe(6));
        assert_eq!(reg.current_topic(), Some(5));
        assert!(reg.unsubscribe(5));
        assert_eq!(reg.current_topic(), None);
        assert!(!reg.unsubscribe(5));
    }
}
