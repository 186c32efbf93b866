//! Typed errors surfaced by the SDK.

use thiserror::Error;

/// Failure to hand a command to the session task.
///
/// The session buffers commands issued before the connection is `Ready`,
/// so the only way a send fails is the session being gone entirely.
#[derive(Debug, Error)]
pub enum SendError {
    #[error("session is closed")]
    Closed,
}

/// Failure of a request/response fallback call.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server returned {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },
}

/// Failure to send a chat message. Chat sends are never silently dropped;
/// callers must surface these to the user.
#[derive(Debug, Error)]
pub enum SendMessageError {
    #[error("no active lobby subscription")]
    NoTopic,
    #[error(transparent)]
    Api(#[from] ApiError),
}
