//! Routing of inbound frames to their sinks.
//!
//! One single-level match per frame, synchronous, in arrival order. The
//! default arm folds unrecognized topic-scoped actions into the update log
//! as generic updates instead of dropping them, so new server-side event
//! kinds are additive.

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::event::{Alert, UpdateEntry};
use crate::frame::{LobbyAction, LobbyUpdate, ServerFrame};
use crate::lobby::LobbyState;
use crate::session::Identity;

pub struct Dispatcher {
    identity: Identity,
    alert_tx: mpsc::Sender<Alert>,
}

impl Dispatcher {
    pub fn new(identity: Identity, alert_tx: mpsc::Sender<Alert>) -> Self {
        Self { identity, alert_tx }
    }

    /// Route one inbound frame. The caller holds the state lock; nothing
    /// here blocks.
    pub fn dispatch(&self, frame: ServerFrame, state: &mut LobbyState) {
        match frame {
            ServerFrame::AuthSuccess => {
                // Says nothing about whether a topic subscription took.
                state.authenticated = true;
            }
            ServerFrame::UnreadCount { count } => {
                state.unread.on_push(count);
            }
            ServerFrame::Notification { data } => {
                state.unread.on_increment_local();
                let title = data.title.unwrap_or_else(|| "Notification".to_string());
                let body = data.message.unwrap_or_default();
                self.alert(title, body);
            }
            ServerFrame::LobbyUpdate { data } => {
                self.dispatch_update(data, state);
            }
        }
    }

    fn dispatch_update(&self, update: LobbyUpdate, state: &mut LobbyState) {
        match &update.action {
            LobbyAction::NewMessage => match update.message {
                Some(msg) => state.messages.insert(0, msg),
                None => tracing::warn!("NEW_MESSAGE update without message payload"),
            },
            LobbyAction::MemberJoined => {
                let summary = format!("{} has joined the lobby", member_name(&update));
                log_update(state, LobbyAction::MemberJoined, summary.clone());
                self.alert("Player Joined", summary);
            }
            LobbyAction::MemberLeft => {
                let summary = format!("{} has left the lobby", member_name(&update));
                log_update(state, LobbyAction::MemberLeft, summary.clone());
                self.alert("Player Left", summary);
            }
            LobbyAction::ReadyStatusChanged => {
                let summary = self.ready_summary(&update);
                log_update(state, LobbyAction::ReadyStatusChanged, summary.clone());
                self.alert("Ready Status", summary);
            }
            LobbyAction::MatchStarted => {
                let summary = "The match has started".to_string();
                log_update(state, LobbyAction::MatchStarted, summary.clone());
                self.alert("Match Started", summary);
            }
            LobbyAction::Typing => {
                // Self-typing is never shown to self.
                if update.user_id == Some(self.identity.user_id) {
                    return;
                }
                let Some(user_id) = update.user_id else {
                    tracing::warn!("TYPING update without userId");
                    return;
                };
                let username = update
                    .username
                    .or(update.user.map(|u| u.username))
                    .unwrap_or_else(|| format!("player {user_id}"));
                state.typing.on_typing(user_id, &username, Instant::now());
            }
            LobbyAction::Other(action) => {
                // Forward compatibility: still a lobby update, just one we
                // have no special handling for.
                tracing::debug!(action = %action, "generic lobby update");
                let summary = action.clone();
                log_update(state, update.action.clone(), summary);
            }
        }
    }

    /// "You" for the local identity, otherwise the display name from the
    /// embedded member list, falling back to a generic label.
    fn ready_summary(&self, update: &LobbyUpdate) -> String {
        let is_self = update.user_id == Some(self.identity.user_id);
        let subject = if is_self {
            "You".to_string()
        } else {
            update
                .user_id
                .and_then(|id| {
                    update
                        .members
                        .iter()
                        .flatten()
                        .find(|m| m.user_id == id)
                        .map(|m| m.username.clone())
                })
                .unwrap_or_else(|| "A member".to_string())
        };
        let verb = if is_self { "are" } else { "is" };
        let status = if update.is_ready.unwrap_or(false) {
            "ready"
        } else {
            "not ready"
        };
        format!("{subject} {verb} {status}")
    }

    fn alert(&self, title: impl Into<String>, body: impl Into<String>) {
        let alert = Alert {
            title: title.into(),
            body: body.into(),
        };
        // Alerts are toasts: a consumer that stopped draining loses them,
        // the frame path keeps moving.
        if let Err(e) = self.alert_tx.try_send(alert) {
            tracing::debug!(error = %e, "alert dropped");
        }
    }
}

fn log_update(state: &mut LobbyState, action: LobbyAction, summary: String) {
    state.updates.insert(
        0,
        UpdateEntry {
            action,
            summary,
            at: Utc::now(),
        },
    );
}

fn member_name(update: &LobbyUpdate) -> String {
    update
        .user
        .as_ref()
        .map(|u| u.username.clone())
        .or_else(|| update.username.clone())
        .unwrap_or_else(|| "A player".to_string())
}
