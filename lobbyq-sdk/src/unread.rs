//! Reconciliation of the unread-notification count.
//!
//! Two sources feed the counter: push frames over the live connection and
//! a pull against the notifications endpoint. Push values are
//! authoritative and overwrite; the pull path is a fallback for when the
//! push channel is down, not a concurrent second source. Local mark-read
//! edits clamp at zero and are never rolled back here — the caller that
//! issued the failed confirmation re-increments.

use crate::error::ApiError;

/// Anything that can answer "how many unread notifications are there".
/// Implemented by the REST client; the facade pulls through this seam
/// while the push channel is down and folds the result in via
/// [`UnreadCounter::on_push`] (the fetch is a suspension point, the fold
/// is not).
#[allow(async_fn_in_trait)]
pub trait UnreadSource {
    async fn fetch_unread(&self) -> Result<u32, ApiError>;
}

#[derive(Debug, Default)]
pub struct UnreadCounter {
    count: u32,
}

impl UnreadCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    /// An authoritative push value. Overwrites, never adds.
    pub fn on_push(&mut self, count: u32) {
        self.count = count;
    }

    /// One more unread, implied by a `notification` push.
    pub fn on_increment_local(&mut self) {
        self.count = self.count.saturating_add(1);
    }

    /// Decrement by at most one; the count never goes negative.
    pub fn on_mark_one_read(&mut self) {
        self.count = self.count.saturating_sub(1);
    }

    pub fn on_mark_all_read(&mut self) {
        self.count = 0;
    }
}
