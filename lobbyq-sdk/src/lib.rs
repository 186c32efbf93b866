//! Client SDK for the lobbyq push channel.
//!
//! One persistent connection per authenticated identity carries
//! newline-delimited JSON frames: chat messages, membership and readiness
//! changes, typing signals, and notification counts for the subscribed
//! lobby. A request/response fallback client covers the durability paths
//! (message persistence, unread-count reconciliation, read receipts).
//!
//! Most consumers want [`lobby::LobbyClient`], which composes the session,
//! subscription registry, typing aggregator and unread reconciler behind
//! one facade with automatic reconnection. The lower-level
//! [`session`] module is there for consumers that want to drive the push
//! channel directly.

pub mod api;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod frame;
pub mod lobby;
pub mod presence;
pub mod registry;
pub mod session;
pub mod unread;
