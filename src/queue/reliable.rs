//! Reliable queue on the Redis BRPOPLPUSH pattern
//!
//! Adds at-least-once delivery with sender-observable notifications on top
//! of the per-channel list schema:
//!
//! 1. Every message carrying an `id` is stored as a two-element list
//!    `[frame, from_channel]` under `{channel}:{id}`, and only that key is
//!    put on the incoming `{channel}` list. Messages without an id (and
//!    transport frames) are pushed inline.
//! 2. The listener moves entries from `{channel}` to the in-flight list
//!    `{channel}:wait` with an atomic pop-push, so a crash between pop and
//!    WebSocket write cannot lose a message.
//! 3. A receiver ack drains the per-message list and removes the key from
//!    the in-flight list; undelivered keys are replayed when the channel is
//!    subscribed again.
//!
//! A message key is in `{channel}:wait` iff its per-message list is
//! non-empty; `check_delivered` is exactly "that list is empty".

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

use crate::conn::Connection;
use crate::error::ChatError;
use crate::proto::{transport, Message};
use crate::queue::{keys, MessageQueue, QueueConfig};

/// Reliable messages queue.
pub struct ReliableQueue {
    client: redis::Client,
    /// Pre-established connection for write traffic. Blocking pops never run
    /// on it; every listener opens its own connection.
    connection: Arc<Mutex<MultiplexedConnection>>,
    config: QueueConfig,
}

impl std::fmt::Debug for ReliableQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReliableQueue")
            .field("config", &self.config)
            .finish()
    }
}

impl ReliableQueue {
    /// Connect to Redis and build the queue.
    pub async fn connect(config: QueueConfig) -> Result<Self, ChatError> {
        config.validate()?;

        let client = redis::Client::open(config.redis.url().as_str())
            .map_err(|e| ChatError::Storage(format!("failed to create redis client: {}", e)))?;
        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| ChatError::Storage(format!("failed to connect to redis: {}", e)))?;

        Ok(Self {
            client,
            connection: Arc::new(Mutex::new(connection)),
            config,
        })
    }

    async fn get_connection(&self) -> tokio::sync::MutexGuard<'_, MultiplexedConnection> {
        self.connection.lock().await
    }
}

#[async_trait]
impl MessageQueue for ReliableQueue {
    async fn subscribe(&self, channel: &str, conn: Arc<dyn Connection>) -> Result<(), ChatError> {
        let ready = Message::transport(transport::READY).encode()?;
        conn.write(ready).await?;

        tokio::spawn(listen(
            self.client.clone(),
            channel.to_string(),
            conn,
            self.config.block_timeout,
            self.config.close_sentinel.clone(),
        ));
        Ok(())
    }

    async fn unsubscribe(
        &self,
        channel: &str,
        conn: &Arc<dyn Connection>,
    ) -> Result<(), ChatError> {
        conn.close();
        let mut redis = self.get_connection().await;
        redis
            .lpush::<&str, &str, ()>(channel, &self.config.close_sentinel)
            .await
            .map_err(|e| ChatError::Storage(format!("LPUSH sentinel failed: {}", e)))?;
        Ok(())
    }

    async fn enqueue(
        &self,
        channels: &[String],
        message: &Message,
        from_channel: Option<&str>,
    ) -> Result<(), ChatError> {
        let frame = message.encode()?;
        let mut redis = self.get_connection().await;

        for channel in channels {
            match &message.id {
                // Store the message in its own list and only pass the key
                // through the queue; the listener dereferences it and the
                // record survives until the receiver acks.
                Some(id) => {
                    let message_key = keys::message_key(channel, id);
                    let values = [frame.as_str(), from_channel.unwrap_or("")];
                    redis
                        .rpush::<&str, &[&str], ()>(&message_key, &values[..])
                        .await
                        .map_err(|e| ChatError::Storage(format!("RPUSH failed: {}", e)))?;
                    redis
                        .lpush::<&str, &str, ()>(channel, &message_key)
                        .await
                        .map_err(|e| ChatError::Storage(format!("LPUSH failed: {}", e)))?;
                }
                // No id to track: pass the raw frame as is.
                None => {
                    redis
                        .lpush::<&str, &str, ()>(channel, &frame)
                        .await
                        .map_err(|e| ChatError::Storage(format!("LPUSH failed: {}", e)))?;
                }
            }
        }
        Ok(())
    }

    async fn ack(
        &self,
        channel: &str,
        message_id: &str,
    ) -> Result<Option<(Message, String)>, ChatError> {
        let message_key = keys::message_key(channel, message_id);
        let wait_key = keys::wait_key(channel);
        let mut redis = self.get_connection().await;

        // The two pops need not be atomic with each other: a concurrent ack
        // observes a half-drained record and is treated as late; LREM on the
        // wait list is idempotent.
        let frame = redis
            .lpop::<&str, Option<String>>(&message_key, None)
            .await
            .map_err(|e| ChatError::Storage(format!("LPOP failed: {}", e)))?;
        let from_channel = redis
            .lpop::<&str, Option<String>>(&message_key, None)
            .await
            .map_err(|e| ChatError::Storage(format!("LPOP failed: {}", e)))?;
        redis
            .lrem::<&str, &str, ()>(&wait_key, 1, &message_key)
            .await
            .map_err(|e| ChatError::Storage(format!("LREM failed: {}", e)))?;

        match frame {
            Some(raw) => Ok(Some((Message::parse(&raw)?, from_channel.unwrap_or_default()))),
            None => Ok(None),
        }
    }

    async fn check_delivered(&self, channel: &str, message_id: &str) -> Result<bool, ChatError> {
        let message_key = keys::message_key(channel, message_id);
        let mut redis = self.get_connection().await;
        let len = redis
            .llen::<&str, i64>(&message_key)
            .await
            .map_err(|e| ChatError::Storage(format!("LLEN failed: {}", e)))?;
        Ok(len == 0)
    }
}

/// Listener task for one (channel, connection) pair.
///
/// Runs on a dedicated Redis connection; blocking pops must never share a
/// connection with write traffic.
async fn listen(
    client: redis::Client,
    channel: String,
    conn: Arc<dyn Connection>,
    block_timeout: Duration,
    sentinel: String,
) {
    let mut redis = match client.get_multiplexed_async_connection().await {
        Ok(c) => c,
        Err(e) => {
            error!(channel = %channel, error = %e, "listener could not open redis connection");
            return;
        }
    };

    let wait_key = keys::wait_key(&channel);
    let prefix = keys::channel_prefix(&channel);

    // Redeliver undelivered messages from previous sessions before any new
    // traffic. The wait list is fed by left-pushes, so the oldest entry is
    // rightmost: iterate back to front.
    let pending = match redis.lrange::<&str, Vec<String>>(&wait_key, 0, -1).await {
        Ok(v) => v,
        Err(e) => {
            error!(channel = %channel, error = %e, "listener could not read in-flight list");
            return;
        }
    };
    for entry in pending.iter().rev() {
        if !entry.starts_with(&prefix) {
            // Not a message key of this channel: stale trash, drop it.
            if let Err(e) = redis.lrem::<&str, &str, ()>(&wait_key, 1, entry).await {
                error!(channel = %channel, error = %e, "listener cleanup failed, shutting down");
                return;
            }
            continue;
        }
        let frame = match redis.lindex::<&str, Option<String>>(entry, 0).await {
            Ok(v) => v,
            Err(e) => {
                error!(channel = %channel, error = %e, "listener lookup failed, shutting down");
                return;
            }
        };
        if let Some(frame) = frame {
            if let Err(e) = conn.write(frame).await {
                warn!(channel = %channel, error = %e, "websocket write failed, listener exits");
                conn.close();
                return;
            }
        }
    }

    loop {
        // Atomic transfer from incoming to in-flight: a crash after the pop
        // but before the WebSocket write cannot lose the message.
        let popped = match redis
            .brpoplpush::<&str, &str, Option<String>>(
                &channel,
                &wait_key,
                block_timeout.as_secs_f64(),
            )
            .await
        {
            Ok(v) => v,
            Err(e) => {
                // Caller must resubscribe to resume listening.
                error!(channel = %channel, error = %e, "listener pop failed, shutting down");
                return;
            }
        };

        let Some(value) = popped else {
            if conn.is_closed() {
                debug!(channel = %channel, "connection closed, listener exits");
                return;
            }
            continue;
        };

        if value == sentinel {
            if let Err(e) = redis.lrem::<&str, &str, ()>(&wait_key, 0, &sentinel).await {
                error!(channel = %channel, error = %e, "sentinel cleanup failed");
            }
            debug!(channel = %channel, "close sentinel received, listener exits");
            return;
        }

        if conn.is_closed() {
            // The popped value stays in the wait list and is replayed on the
            // next subscribe.
            debug!(channel = %channel, "connection closed, listener exits");
            return;
        }

        if value.starts_with(&prefix) {
            // Message key: deliver the stored frame and keep the key
            // in-flight until the receiver acks.
            match redis.lindex::<&str, Option<String>>(&value, 0).await {
                Ok(Some(frame)) => {
                    if let Err(e) = conn.write(frame).await {
                        warn!(channel = %channel, error = %e, "websocket write failed, listener exits");
                        conn.close();
                        return;
                    }
                }
                // Already acked, nothing left to deliver.
                Ok(None) => {}
                Err(e) => {
                    error!(channel = %channel, error = %e, "listener lookup failed, shutting down");
                    return;
                }
            }
        } else {
            // Inline frame, no ack expected: take it straight back off the
            // wait list and deliver.
            if let Err(e) = redis.lpop::<&str, Option<String>>(&wait_key, None).await {
                error!(channel = %channel, error = %e, "listener cleanup failed, shutting down");
                return;
            }
            if let Err(e) = conn.write(value).await {
                warn!(channel = %channel, error = %e, "websocket write failed, listener exits");
                conn.close();
                return;
            }
        }
    }
}
