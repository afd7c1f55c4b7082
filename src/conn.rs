//! Connection contract between the core and a WebSocket framework
//!
//! The core never touches a WebSocket directly. Any framework can plug in by
//! exposing this minimal surface per live connection; the bundled axum
//! adapter in [`crate::ws`] is one implementation.

use async_trait::async_trait;

use crate::error::ChatError;

/// A live WebSocket connection as seen by the queues and the messages
/// center.
///
/// Queue listeners poll [`is_closed`](Connection::is_closed) between blocking
/// pops, so `close` must only flip a flag and never block.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Channel this connection is subscribed to.
    fn channel(&self) -> &str;

    /// Write a text frame. An error means the connection is gone and the
    /// caller should stop using it.
    async fn write(&self, frame: String) -> Result<(), ChatError>;

    /// Whether the connection has been marked closed.
    fn is_closed(&self) -> bool;

    /// Mark the connection closed. Idempotent.
    fn close(&self);
}
