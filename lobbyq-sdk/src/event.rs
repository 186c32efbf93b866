//! Events emitted by the session and facade for consumers (CLI, GUI, bots).

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::frame::{LobbyAction, ServerFrame, UserId};

/// Everything a session reports to its owner: lifecycle transitions and
/// inbound frames, on one channel, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Transport is up and the `auth` frame has been sent.
    Connected,
    /// `auth_success` received; buffered sends have been flushed.
    Ready,
    /// An application frame, delivered only after decode succeeded.
    Frame(ServerFrame),
    /// Transport closed or failed. The session does not retry on its own.
    Disconnected { reason: String },
}

/// A user-facing toast produced by the dispatcher for membership, readiness
/// and match events. Delivery is best-effort; a slow consumer loses alerts,
/// never frames.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub title: String,
    pub body: String,
}

/// One entry of the lobby update log (non-chat events, newest first).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpdateEntry {
    pub action: LobbyAction,
    pub summary: String,
    pub at: DateTime<Utc>,
}

/// A member currently typing in the active lobby.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TypingUser {
    pub user_id: UserId,
    pub username: String,
}
