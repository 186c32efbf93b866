//! Ephemeral "typing" presence with time-based decay.
//!
//! Inbound: [`TypingTracker`] holds at most one entry per user and a
//! periodic sweep removes entries not refreshed within the TTL, so stale
//! typists disappear even when no further frames arrive.
//!
//! Outbound: [`TypingThrottle`] bounds the client's own typing frames to
//! one per TTL window. The window restarts on every call, suppressed or
//! not; callers that want a steady refresh must debounce before calling.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

use crate::event::TypingUser;
use crate::frame::UserId;

/// How long a typing signal stays valid without a refresh.
pub const TYPING_TTL: Duration = Duration::from_millis(3000);
/// Cadence of the expiry sweep, independent of frame arrival.
pub const SWEEP_INTERVAL: Duration = Duration::from_millis(1000);

#[derive(Debug, Default)]
pub struct TypingTracker {
    entries: HashMap<UserId, (String, Instant)>,
}

impl TypingTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or refresh a typist. A later signal always refreshes the
    /// existing entry; there is never more than one entry per user.
    pub fn on_typing(&mut self, user_id: UserId, username: &str, now: Instant) {
        self.entries.insert(user_id, (username.to_string(), now));
    }

    /// Drop every entry whose last signal is at least [`TYPING_TTL`] old.
    pub fn sweep(&mut self, now: Instant) {
        self.entries
            .retain(|_, (_, last_seen)| now.duration_since(*last_seen) < TYPING_TTL);
    }

    /// Current typists, ordered by user id for stable display.
    pub fn typists(&self) -> Vec<TypingUser> {
        let mut users: Vec<TypingUser> = self
            .entries
            .iter()
            .map(|(&user_id, (username, _))| TypingUser {
                user_id,
                username: username.clone(),
            })
            .collect();
        users.sort_by_key(|u| u.user_id);
        users
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Client-side throttle for outbound typing frames.
#[derive(Debug, Default)]
pub struct TypingThrottle {
    last_call: Option<Instant>,
}

impl TypingThrottle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a typing frame should go out for a call at `now`.
    /// Always restarts the throttle window, even when suppressing.
    pub fn should_send(&mut self, now: Instant) -> bool {
        let send = match self.last_call {
            None => true,
            Some(prev) => now.duration_since(prev) >= TYPING_TTL,
        };
        self.last_call = Some(now);
        send
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn one_entry_per_user() {
        let t0 = Instant::now();
        let mut tracker = TypingTracker::new();
        tracker.on_typing(3, "ann", t0);
        tracker.on_typing(3, "ann", t0 + ms(500));
        tracker.on_typing(3, "ann", t0 + ms(900));
        assert_eq!(tracker.typists().len(), 1);
    }

    #[test]
    fn entry_expires_after_ttl() {
        let t0 = Instant::now();
        let mut tracker = TypingTracker::new();
        tracker.on_typing(3, "ann", t0);

        tracker.sweep(t0 + ms(2000));
        assert_eq!(
            tracker.typists(),
            vec![TypingUser {
                user_id: 3,
                username: "ann".to_string()
            }]
        );

        tracker.sweep(t0 + ms(3500));
        assert!(tracker.typists().is_empty());
    }

    #[test]
    fn refresh_extends_lifetime() {
        let t0 = Instant::now();
        let mut tracker = TypingTracker::new();
        tracker.on_typing(3, "ann", t0);
        tracker.on_typing(3, "ann", t0 + ms(2500));

        tracker.sweep(t0 + ms(4000));
        assert_eq!(tracker.typists().len(), 1);

        tracker.sweep(t0 + ms(5500));
        assert!(tracker.typists().is_empty());
    }

    #[test]
    fn sweep_boundary_is_inclusive() {
        let t0 = Instant::now();
        let mut tracker = TypingTracker::new();
        tracker.on_typing(1, "bo", t0);
        tracker.sweep(t0 + ms(3000));
        assert!(tracker.typists().is_empty());
    }

    #[test]
    fn typists_sorted_by_user_id() {
        let t0 = Instant::now();
        let mut tracker = TypingTracker::new();
        tracker.on_typing(9, "zed", t0);
        tracker.on_typing(2, "ann", t0);
        let ids: Vec<u64> = tracker.typists().iter().map(|u| u.user_id).collect();
        assert_eq!(ids, vec![2, 9]);
    }

    #[test]
    fn throttle_suppresses_within_window() {
        let t0 = Instant::now();
        let mut throttle = TypingThrottle::new();
        assert!(throttle.should_send(t0));
        assert!(!throttle.should_send(t0 + ms(1000)));
        assert!(!throttle.should_send(t0 + ms(2000)));
    }

    #[test]
    fn throttle_window_restarts_on_suppressed_calls() {
        let t0 = Instant::now();
        let mut throttle = TypingThrottle::new();
        assert!(throttle.should_send(t0));
        // Suppressed, but the window now starts at t0+2500.
        assert!(!throttle.should_send(t0 + ms(2500)));
        // 3100ms after t0, but only 600ms into the restarted window.
        assert!(!throttle.should_send(t0 + ms(3100)));
        // 3000ms after the last call: window expired.
        assert!(throttle.should_send(t0 + ms(6100)));
    }
}
