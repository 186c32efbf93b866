//! Wire protocol for the lobbyq push channel.
//!
//! Frames are newline-delimited JSON objects tagged by a `type` field.
//! Field names follow the server's camelCase convention on the wire
//! (`userId`, `lobbyId`) regardless of the Rust names.
//!
//! Decoding is tolerant by design: an unparseable line is an error the
//! session logs and discards, and an unrecognized `LOBBY_UPDATE` action is
//! preserved as [`LobbyAction::Other`] so the dispatcher can still surface
//! it as a generic update.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of a lobby (the topic unit for subscription and fan-out).
pub type LobbyId = u64;
/// Identifier of a user, assigned by the external auth service.
pub type UserId = u64;

/// Frames the client sends to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientFrame {
    #[serde(rename = "auth")]
    Auth {
        #[serde(rename = "userId")]
        user_id: UserId,
    },
    #[serde(rename = "subscribe_lobby")]
    SubscribeLobby {
        #[serde(rename = "lobbyId")]
        lobby_id: LobbyId,
    },
    #[serde(rename = "unsubscribe_lobby")]
    UnsubscribeLobby {
        #[serde(rename = "lobbyId")]
        lobby_id: LobbyId,
    },
    #[serde(rename = "typing")]
    Typing {
        #[serde(rename = "lobbyId")]
        lobby_id: LobbyId,
        #[serde(rename = "userId")]
        user_id: UserId,
        username: String,
    },
}

/// Frames the server pushes to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerFrame {
    /// The identity sent in `auth` was accepted. Does not imply any
    /// lobby subscription succeeded.
    #[serde(rename = "auth_success")]
    AuthSuccess,

    /// Authoritative unread-notification count.
    #[serde(rename = "unread_count")]
    UnreadCount { count: u32 },

    /// A single pushed notification. Implies one more unread.
    #[serde(rename = "notification")]
    Notification { data: NotificationData },

    /// A topic-scoped lobby event, discriminated by `data.action`.
    #[serde(rename = "LOBBY_UPDATE")]
    LobbyUpdate { data: LobbyUpdate },
}

/// Payload of a `notification` push. The server's notification schema is
/// open-ended; only the display fields are modeled.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotificationData {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Payload of a `LOBBY_UPDATE` frame. Which optional fields are present
/// depends on `action`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LobbyUpdate {
    pub action: LobbyAction,
    #[serde(rename = "lobbyId", default)]
    pub lobby_id: Option<LobbyId>,
    #[serde(rename = "userId", default)]
    pub user_id: Option<UserId>,
    #[serde(default)]
    pub username: Option<String>,
    /// The affected user, for MEMBER_JOINED / MEMBER_LEFT.
    #[serde(default)]
    pub user: Option<UserRef>,
    /// The new message, for NEW_MESSAGE.
    #[serde(default)]
    pub message: Option<ChatMessage>,
    /// The lobby's member list as embedded by the server, used to resolve
    /// display names for READY_STATUS_CHANGED.
    #[serde(default)]
    pub members: Option<Vec<LobbyMember>>,
    #[serde(rename = "isReady", default)]
    pub is_ready: Option<bool>,
}

/// Discriminant of a `LOBBY_UPDATE`. Unknown actions deserialize into
/// `Other` so new server-side event kinds are additive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LobbyAction {
    #[serde(rename = "NEW_MESSAGE")]
    NewMessage,
    #[serde(rename = "MEMBER_JOINED")]
    MemberJoined,
    #[serde(rename = "MEMBER_LEFT")]
    MemberLeft,
    #[serde(rename = "READY_STATUS_CHANGED")]
    ReadyStatusChanged,
    #[serde(rename = "MATCH_STARTED")]
    MatchStarted,
    #[serde(rename = "TYPING")]
    Typing,
    #[serde(untagged)]
    Other(String),
}

impl Default for LobbyAction {
    fn default() -> Self {
        LobbyAction::Other(String::new())
    }
}

impl LobbyAction {
    /// Wire name of the action, for display and logging.
    pub fn as_str(&self) -> &str {
        match self {
            LobbyAction::NewMessage => "NEW_MESSAGE",
            LobbyAction::MemberJoined => "MEMBER_JOINED",
            LobbyAction::MemberLeft => "MEMBER_LEFT",
            LobbyAction::ReadyStatusChanged => "READY_STATUS_CHANGED",
            LobbyAction::MatchStarted => "MATCH_STARTED",
            LobbyAction::Typing => "TYPING",
            LobbyAction::Other(s) => s.as_str(),
        }
    }
}

/// A user reference as embedded in membership events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRef {
    #[serde(rename = "userId", default)]
    pub user_id: Option<UserId>,
    pub username: String,
}

/// One lobby member, as carried in the embedded member list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LobbyMember {
    #[serde(rename = "userId")]
    pub user_id: UserId,
    pub username: String,
    #[serde(rename = "isReady", default)]
    pub is_ready: bool,
}

/// A chat message as persisted by the server. Only `id` and `text` are
/// guaranteed; the rest depends on the endpoint that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: u64,
    #[serde(rename = "userId", default)]
    pub user_id: Option<UserId>,
    #[serde(default)]
    pub username: Option<String>,
    pub text: String,
    #[serde(rename = "createdAt", default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// Decode one inbound line. The caller decides what to do with errors;
/// the session logs and discards them without stopping frame processing.
pub fn decode(line: &str) -> Result<ServerFrame, serde_json::Error> {
    serde_json::from_str(line.trim())
}

/// Encode an outbound frame as one wire line (newline included).
pub fn encode(frame: &ClientFrame) -> String {
    // ClientFrame contains no map keys or non-string values serde_json
    // can fail on, so serialization is infallible here.
    let mut line = serde_json::to_string(frame).unwrap_or_default();
    line.push('\n');
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_auth_uses_wire_names() {
        let line = encode(&ClientFrame::Auth { user_id: 7 });
        assert_eq!(line, "{\"type\":\"auth\",\"userId\":7}\n");
    }

    #[test]
    fn encode_typing_carries_identity() {
        let line = encode(&ClientFrame::Typing {
            lobby_id: 42,
            user_id: 7,
            username: "nova".to_string(),
        });
        let v: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(v["type"], "typing");
        assert_eq!(v["lobbyId"], 42);
        assert_eq!(v["userId"], 7);
        assert_eq!(v["username"], "nova");
    }

    #[test]
    fn decode_auth_success() {
        let frame = decode("{\"type\":\"auth_success\"}\n").unwrap();
        assert_eq!(frame, ServerFrame::AuthSuccess);
    }

    #[test]
    fn decode_unread_count() {
        let frame = decode("{\"type\":\"unread_count\",\"count\":3}").unwrap();
        assert_eq!(frame, ServerFrame::UnreadCount { count: 3 });
    }

    #[test]
    fn decode_lobby_update_member_joined() {
        let frame = decode(
            "{\"type\":\"LOBBY_UPDATE\",\"data\":{\"action\":\"MEMBER_JOINED\",\
             \"lobbyId\":42,\"user\":{\"username\":\"rex\"}}}",
        )
        .unwrap();
        let ServerFrame::LobbyUpdate { data } = frame else {
            panic!("wrong frame kind");
        };
        assert_eq!(data.action, LobbyAction::MemberJoined);
        assert_eq!(data.lobby_id, Some(42));
        assert_eq!(data.user.unwrap().username, "rex");
    }

    #[test]
    fn decode_unknown_action_is_preserved() {
        let frame = decode(
            "{\"type\":\"LOBBY_UPDATE\",\"data\":{\"action\":\"MAP_VETOED\",\"lobbyId\":1}}",
        )
        .unwrap();
        let ServerFrame::LobbyUpdate { data } = frame else {
            panic!("wrong frame kind");
        };
        assert_eq!(data.action, LobbyAction::Other("MAP_VETOED".to_string()));
        assert_eq!(data.action.as_str(), "MAP_VETOED");
    }

    #[test]
    fn decode_rejects_junk() {
        assert!(decode("not json at all").is_err());
        assert!(decode("{\"type\":\"no_such_frame\"}").is_err());
    }

    #[test]
    fn chat_message_minimal_fields() {
        let msg: ChatMessage = serde_json::from_str("{\"id\":1,\"text\":\"gg\"}").unwrap();
        assert_eq!(msg.id, 1);
        assert_eq!(msg.text, "gg");
        assert!(msg.user_id.is_none());
        assert!(msg.created_at.is_none());
    }
}
