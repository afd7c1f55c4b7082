//! Error types shared across the toolkit

use thiserror::Error;

/// Errors surfaced by the messages center, queues and adapters.
///
/// Handling policy by variant:
///
/// - `Format`: log, drop the frame, keep the connection open.
/// - `Transport`: treat the connection as closed and detach it.
/// - `Storage`: surfaced to the enqueue caller; no partial fan-out
///   guarantee. Inside a listener it ends the listener task and the
///   connection must be resubscribed.
/// - `Route`: log, skip the failing route, continue the chain.
/// - `Config`: invalid option, reported at construction time.
/// - `Auth`: close the socket with the reason string.
#[derive(Error, Debug)]
pub enum ChatError {
    #[error("message format error: {0}")]
    Format(#[from] serde_json::Error),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("route error: {0}")]
    Route(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("authentication error: {0}")]
    Auth(String),
}
