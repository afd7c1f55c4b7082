//! Shared test support: in-memory doubles for the connection and queue
//! contracts, and the Redis configuration used by the integration suites.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chatq::proto::transport;
use chatq::{ChatError, Connection, Destination, Message, MessageQueue, QueueConfig, RedisConfig, Route};
use tokio::sync::Mutex;

/// Install the tracing subscriber once so `RUST_LOG=chatq=debug` surfaces
/// listener activity during test runs.
pub fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    });
}

/// Queue config pointing at the test Redis database.
///
/// Honors `REDIS_HOST` / `REDIS_PORT` so CI can point the suite elsewhere;
/// database 9 keeps test keys away from any local data.
pub fn test_queue_config() -> QueueConfig {
    let host = std::env::var("REDIS_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port = std::env::var("REDIS_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(6379);
    QueueConfig {
        redis: RedisConfig { host, port, db: 9 },
        ..QueueConfig::default()
    }
}

/// In-memory connection that records every frame written to it.
pub struct TestConnection {
    channel: String,
    written: Mutex<Vec<String>>,
    closed: AtomicBool,
}

impl TestConnection {
    pub fn new(channel: &str) -> Arc<Self> {
        Arc::new(Self {
            channel: channel.to_string(),
            written: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        })
    }

    pub async fn written(&self) -> Vec<String> {
        self.written.lock().await.clone()
    }

    /// Poll until at least `count` frames arrived or five seconds passed.
    pub async fn wait_for_frames(&self, count: usize) -> Vec<String> {
        for _ in 0..100 {
            if self.written.lock().await.len() >= count {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        self.written().await
    }
}

#[async_trait]
impl Connection for TestConnection {
    fn channel(&self) -> &str {
        &self.channel
    }

    async fn write(&self, frame: String) -> Result<(), ChatError> {
        if self.is_closed() {
            return Err(ChatError::Transport("test connection closed".into()));
        }
        self.written.lock().await.push(frame);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Queue double that records calls instead of touching Redis.
#[derive(Default)]
pub struct RecordingQueue {
    pub enqueued: Mutex<Vec<(Vec<String>, Message, Option<String>)>>,
    pub acked: Mutex<Vec<(String, String)>>,
    /// Handed out once by the next `ack` call.
    pub ack_result: Mutex<Option<(Message, String)>>,
}

impl RecordingQueue {
    pub async fn enqueued(&self) -> Vec<(Vec<String>, Message, Option<String>)> {
        self.enqueued.lock().await.clone()
    }
}

#[async_trait]
impl MessageQueue for RecordingQueue {
    async fn subscribe(&self, _channel: &str, conn: Arc<dyn Connection>) -> Result<(), ChatError> {
        let ready = Message::transport(transport::READY).encode()?;
        conn.write(ready).await
    }

    async fn unsubscribe(
        &self,
        _channel: &str,
        conn: &Arc<dyn Connection>,
    ) -> Result<(), ChatError> {
        conn.close();
        Ok(())
    }

    async fn enqueue(
        &self,
        channels: &[String],
        message: &Message,
        from_channel: Option<&str>,
    ) -> Result<(), ChatError> {
        self.enqueued.lock().await.push((
            channels.to_vec(),
            message.clone(),
            from_channel.map(ToOwned::to_owned),
        ));
        Ok(())
    }

    async fn ack(
        &self,
        channel: &str,
        message_id: &str,
    ) -> Result<Option<(Message, String)>, ChatError> {
        self.acked
            .lock()
            .await
            .push((channel.to_string(), message_id.to_string()));
        Ok(self.ack_result.lock().await.take())
    }

    async fn check_delivered(&self, _channel: &str, _message_id: &str) -> Result<bool, ChatError> {
        Ok(true)
    }
}

/// Route that always claims the message for a fixed channel.
pub struct StaticRoute {
    pub to_channel: String,
    pub processed: AtomicUsize,
    pub post_processed: Mutex<Vec<String>>,
}

impl StaticRoute {
    pub fn new(to_channel: &str) -> Arc<Self> {
        Arc::new(Self {
            to_channel: to_channel.to_string(),
            processed: AtomicUsize::new(0),
            post_processed: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl Route for StaticRoute {
    async fn process(
        &self,
        _message: &Message,
        _conn: Option<&Arc<dyn Connection>>,
    ) -> Result<Destination, ChatError> {
        self.processed.fetch_add(1, Ordering::SeqCst);
        Ok(Destination::Channel(self.to_channel.clone()))
    }

    async fn post_process(
        &self,
        _message: &Message,
        to_channel: &str,
        _queue: &Arc<dyn MessageQueue>,
    ) -> Result<(), ChatError> {
        self.post_processed.lock().await.push(to_channel.to_string());
        Ok(())
    }
}

/// Route that halts the chain.
#[derive(Default)]
pub struct StopRoute;

#[async_trait]
impl Route for StopRoute {
    async fn process(
        &self,
        _message: &Message,
        _conn: Option<&Arc<dyn Connection>>,
    ) -> Result<Destination, ChatError> {
        Ok(Destination::Stop)
    }
}

/// Route that never claims anything.
#[derive(Default)]
pub struct SkipRoute;

#[async_trait]
impl Route for SkipRoute {
    async fn process(
        &self,
        _message: &Message,
        _conn: Option<&Arc<dyn Connection>>,
    ) -> Result<Destination, ChatError> {
        Ok(Destination::Skip)
    }
}

/// Route whose `process` always fails.
#[derive(Default)]
pub struct FailingRoute;

#[async_trait]
impl Route for FailingRoute {
    async fn process(
        &self,
        _message: &Message,
        _conn: Option<&Arc<dyn Connection>>,
    ) -> Result<Destination, ChatError> {
        Err(ChatError::Route("synthetic route failure".into()))
    }
}
