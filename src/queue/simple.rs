//! Best-effort queue on the Redis LPUSH / BRPOP pattern
//!
//! Messages are LPUSH'ed to the `{channel}` list; one listener per
//! (channel, connection) pair BRPOP's them and writes them to the
//! WebSocket. Nothing is tracked: `ack` is a no-op and `check_delivered`
//! always answers true.

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
use crate::queue::{MessageQueue, QueueConfig};

/// Best-effort messages queue.
pub struct SimpleQueue {
    client: redis::Client,
    /// Pre-established connection for write traffic. Blocking pops never run
    /// on it; every listener opens its own connection.
    connection: Arc<Mutex<MultiplexedConnection>>,
    config: QueueConfig,
}

impl std::fmt::Debug for SimpleQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimpleQueue")
            .field("config", &self.config)
            .finish()
    }
}

impl SimpleQueue {
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
impl MessageQueue for SimpleQueue {
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
        _from_channel: Option<&str>,
    ) -> Result<(), ChatError> {
        let frame = message.encode()?;
        let mut redis = self.get_connection().await;
        for channel in channels {
            redis
                .lpush::<&str, &str, ()>(channel, &frame)
                .await
                .map_err(|e| ChatError::Storage(format!("LPUSH failed: {}", e)))?;
        }
        Ok(())
    }

    async fn ack(
        &self,
        _channel: &str,
        _message_id: &str,
    ) -> Result<Option<(Message, String)>, ChatError> {
        Ok(None)
    }

    async fn check_delivered(&self, _channel: &str, _message_id: &str) -> Result<bool, ChatError> {
        Ok(true)
    }
}

/// Listener task for one (channel, connection) pair.
///
/// Opens a dedicated Redis connection: a blocking pop serializes its
/// connection for the duration of the block, so sharing one with publish
/// traffic would stall unrelated writes.
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

    loop {
        let popped = match redis
            .brpop::<&str, Option<(String, String)>>(&channel, block_timeout.as_secs_f64())
            .await
        {
            Ok(v) => v,
            Err(e) => {
                // Caller must resubscribe to resume listening.
                error!(channel = %channel, error = %e, "listener pop failed, shutting down");
                return;
            }
        };

        if conn.is_closed() {
            debug!(channel = %channel, "connection closed, listener exits");
            return;
        }

        let Some((_, frame)) = popped else { continue };
        if frame == sentinel {
            // Wake-up token for a listener whose connection already closed.
            continue;
        }

        if let Err(e) = conn.write(frame).await {
            warn!(channel = %channel, error = %e, "websocket write failed, listener exits");
            conn.close();
            return;
        }
    }
}
