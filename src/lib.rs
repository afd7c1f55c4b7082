//! Generic WebSocket chat server toolkit
//!
//! Accepts long-lived bidirectional WebSocket connections, routes
//! application messages between clients through a pluggable routing chain,
//! and delivers them through Redis-backed queues.
//!
//! # Features
//! - Simple custom routing: implement [`Route`] and register it on the
//!   [`MessagesCenter`].
//! - Best-effort delivery queue on the Redis LPUSH / BRPOP pattern.
//! - Reliable delivery queue on the Redis BRPOPLPUSH pattern:
//!   per-message acknowledgements, sender delivery notifications, and
//!   redelivery of undelivered messages across reconnects.
//! - axum WebSocket endpoint adapter (cargo feature `axum`, on by
//!   default); any other framework can plug in through the small
//!   [`Connection`] contract.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use chatq::ws::{self, QueryChannelAuth};
//! use chatq::{ChatConfig, DirectRoute, MessagesCenter};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Reliable delivery over the local Redis.
//!     let config = ChatConfig {
//!         reliable: true,
//!         ..ChatConfig::default()
//!     };
//!     let center = Arc::new(MessagesCenter::connect(config).await?);
//!     center.add_route(Arc::new(DirectRoute)).await?;
//!
//!     // Clients connect to ws://127.0.0.1:8000/messages?channel=<id>
//!     let app = ws::router(center, Arc::new(QueryChannelAuth));
//!     let listener = tokio::net::TcpListener::bind("127.0.0.1:8000").await?;
//!     axum::serve(listener, app).await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_debug_implementations)]

/// Messages center: transport protocol, routing chain, queue dispatch
pub mod center;
/// Connection contract required from a WebSocket framework
pub mod conn;
/// Error types
pub mod error;
/// Wire protocol: message envelope and transport type codes
pub mod proto;
/// Routing chain building blocks
pub mod route;
/// Redis-backed delivery queues
pub mod queue;
/// axum WebSocket adapter
#[cfg(feature = "axum")]
pub mod ws;

pub use crate::center::MessagesCenter;
pub use crate::conn::Connection;
pub use crate::error::ChatError;
pub use crate::proto::{transport, Message, MessageType};
pub use crate::queue::reliable::ReliableQueue;
pub use crate::queue::simple::SimpleQueue;
pub use crate::queue::{ChatConfig, MessageQueue, QueueConfig, RedisConfig};
pub use crate::route::{Destination, DirectRoute, Route};
