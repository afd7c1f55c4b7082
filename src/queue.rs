//! Delivery queues on Redis
//!
//! Two queue flavors share one trait:
//!
//! - [`SimpleQueue`](simple::SimpleQueue) — best-effort fan-out on the
//!   LPUSH / BRPOP pattern. No acknowledgements, no resumption.
//! - [`ReliableQueue`](reliable::ReliableQueue) — at-least-once delivery on
//!   the BRPOPLPUSH pattern with per-message acknowledgement tracking and
//!   redelivery of undelivered messages across reconnects.
//!
//! Redis is the single source of truth: no per-channel state lives in
//! process memory, so any node may enqueue to any channel regardless of
//! where its listener runs.
//!
//! ## Key schema
//!
//! | Key | Contents |
//! |---|---|
//! | `{channel}` | incoming list, newest at the left |
//! | `{channel}:wait` | in-flight message keys awaiting ack (reliable only) |
//! | `{channel}:{id}` | two-element list `[frame, from_channel]` (reliable only) |

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::conn::Connection;
use crate::error::ChatError;
use crate::proto::Message;

pub mod reliable;
pub mod simple;

// =============================================================================
// KEY GENERATION UTILITIES
// =============================================================================

/// Helpers producing the Redis keys of the storage schema
pub mod keys {
    /// Key of the per-message list holding `[frame, from_channel]`.
    pub fn message_key(channel: &str, message_id: &str) -> String {
        format!("{}:{}", channel, message_id)
    }

    /// Key of the in-flight list for a channel.
    pub fn wait_key(channel: &str) -> String {
        format!("{}:wait", channel)
    }

    /// Prefix that distinguishes message keys from inline frames on a
    /// channel's incoming list.
    pub fn channel_prefix(channel: &str) -> String {
        format!("{}:", channel)
    }
}

// =============================================================================
// QUEUE TRAIT
// =============================================================================

/// Messages queue interface.
///
/// Implementations are polymorphic over the delivery guarantee; the
/// best-effort flavor answers the tracking operations trivially
/// (`check_delivered` is always true, `ack` yields nothing).
#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Register a connection for receiving messages from a channel.
    ///
    /// Writes the `ready` transport frame to the connection, then starts a
    /// listener task bound to the (channel, connection) pair. Multiple
    /// simultaneous connections on one channel are permitted; each gets its
    /// own listener and messages go to whichever listener pops first.
    async fn subscribe(&self, channel: &str, conn: Arc<dyn Connection>) -> Result<(), ChatError>;

    /// Unregister a connection.
    ///
    /// Marks the connection closed and posts the close sentinel onto the
    /// channel so the blocked listener wakes up promptly.
    async fn unsubscribe(&self, channel: &str, conn: &Arc<dyn Connection>)
        -> Result<(), ChatError>;

    /// Put a message on the queue of every destination channel.
    ///
    /// Per-channel pushes are not atomic across channels; a storage error
    /// may leave a partial fan-out.
    async fn enqueue(
        &self,
        channels: &[String],
        message: &Message,
        from_channel: Option<&str>,
    ) -> Result<(), ChatError>;

    /// Mark a message as delivered and hand back `(message, from_channel)`
    /// so the sender can be notified. `None` when the ack was redundant or
    /// late, or when the queue does not track delivery.
    async fn ack(
        &self,
        channel: &str,
        message_id: &str,
    ) -> Result<Option<(Message, String)>, ChatError>;

    /// Whether a message has been delivered.
    async fn check_delivered(&self, channel: &str, message_id: &str) -> Result<bool, ChatError>;
}

// =============================================================================
// CONFIGURATION
// =============================================================================

/// Redis connection parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// Database number
    pub db: i64,
}

impl RedisConfig {
    /// Connection URL for the redis client.
    pub fn url(&self) -> String {
        format!("redis://{}:{}/{}", self.host, self.port, self.db)
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6379,
            db: 0,
        }
    }
}

/// Queue tuning options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Redis connection parameters
    pub redis: RedisConfig,
    /// Blocking pop timeout. Must be finite: listeners poll the
    /// connection-closed flag once per timeout, which bounds shutdown even
    /// when the sentinel is lost.
    pub block_timeout: Duration,
    /// Reserved token posted to a channel to wake its listener for
    /// shutdown. Must not contain `:` and no channel name may equal or
    /// start with it, otherwise the sentinel is indistinguishable from
    /// queue traffic.
    pub close_sentinel: String,
}

impl QueueConfig {
    pub(crate) fn validate(&self) -> Result<(), ChatError> {
        if self.close_sentinel.is_empty() {
            return Err(ChatError::Config("close sentinel must not be empty".into()));
        }
        if self.close_sentinel.contains(':') {
            return Err(ChatError::Config(
                "close sentinel must not contain ':', it would collide with message keys".into(),
            ));
        }
        Ok(())
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis: RedisConfig::default(),
            block_timeout: Duration::from_secs(10),
            close_sentinel: "!".to_string(),
        }
    }
}

/// Top-level options recognized by [`MessagesCenter::connect`].
///
/// [`MessagesCenter::connect`]: crate::center::MessagesCenter::connect
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Queue options
    pub queue: QueueConfig,
    /// Select the reliable queue instead of the best-effort one
    pub reliable: bool,
}
