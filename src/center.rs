//! Messages center: top-level message routing
//!
//! One center per process (or per Redis database) multiplexes the transport
//! protocol, the routing chain and queue dispatch. Its only mutable state is
//! the route list; everything per-channel lives in Redis.

use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::conn::Connection;
use crate::error::ChatError;
use crate::proto::{transport, Message, MessageType};
use crate::queue::reliable::ReliableQueue;
use crate::queue::simple::SimpleQueue;
use crate::queue::{ChatConfig, MessageQueue};
use crate::route::{Destination, Route};

/// Top-level messages router.
///
/// Inbound frames enter through [`handle_frame`](Self::handle_frame) (or
/// [`handle`](Self::handle) for messages created server-side), transport
/// messages are answered from the connection context, and data messages walk
/// the route chain and are put on the delivery queue.
pub struct MessagesCenter {
    queue: Arc<dyn MessageQueue>,
    routes: RwLock<Vec<Arc<dyn Route>>>,
}

impl std::fmt::Debug for MessagesCenter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessagesCenter")
            .field("queue", &"dyn MessageQueue")
            .finish()
    }
}

impl MessagesCenter {
    /// Build a center over an already constructed queue.
    pub fn new(queue: Arc<dyn MessageQueue>) -> Self {
        Self {
            queue,
            routes: RwLock::new(Vec::new()),
        }
    }

    /// Connect to Redis and build a center with the queue flavor selected
    /// by `config.reliable`.
    pub async fn connect(config: ChatConfig) -> Result<Self, ChatError> {
        let queue: Arc<dyn MessageQueue> = if config.reliable {
            Arc::new(ReliableQueue::connect(config.queue).await?)
        } else {
            Arc::new(SimpleQueue::connect(config.queue).await?)
        };
        Ok(Self::new(queue))
    }

    /// The delivery queue.
    pub fn queue(&self) -> &Arc<dyn MessageQueue> {
        &self.queue
    }

    /// Register a WebSocket for receiving messages from a channel.
    pub async fn attach(&self, channel: &str, conn: Arc<dyn Connection>) -> Result<(), ChatError> {
        self.queue.subscribe(channel, conn).await
    }

    /// Unregister a WebSocket from a channel.
    pub async fn detach(&self, channel: &str, conn: &Arc<dyn Connection>) -> Result<(), ChatError> {
        self.queue.unsubscribe(channel, conn).await
    }

    /// Append a route to the routing chain.
    ///
    /// Routes are processed in registration order; the same instance may be
    /// registered only once.
    pub async fn add_route(&self, route: Arc<dyn Route>) -> Result<(), ChatError> {
        let mut routes = self.routes.write().await;
        if routes.iter().any(|r| Arc::ptr_eq(r, &route)) {
            return Err(ChatError::Config("route is already registered".into()));
        }
        routes.push(route);
        Ok(())
    }

    /// Remove a route from the chain. Returns whether it was registered.
    pub async fn remove_route(&self, route: &Arc<dyn Route>) -> bool {
        let mut routes = self.routes.write().await;
        match routes.iter().position(|r| Arc::ptr_eq(r, route)) {
            Some(idx) => {
                routes.remove(idx);
                true
            }
            None => false,
        }
    }

    /// Main ingress for raw frames.
    ///
    /// Malformed frames and handler failures are logged here; the
    /// connection stays open either way.
    pub async fn handle_frame(&self, raw: &str, conn: Option<&Arc<dyn Connection>>) {
        match Message::parse(raw) {
            Ok(message) => {
                if let Err(e) = self.handle(message, conn).await {
                    warn!(error = %e, "message handling failed");
                }
            }
            Err(e) => {
                warn!(error = %e, "dropping malformed frame");
            }
        }
    }

    /// Process a parsed message: transport layer first, then the routing
    /// chain, then queue dispatch.
    ///
    /// `conn` is the connection the message arrived on; pass `None` for
    /// messages created server-side (they skip the transport layer).
    pub async fn handle(
        &self,
        message: Message,
        conn: Option<&Arc<dyn Connection>>,
    ) -> Result<(), ChatError> {
        if let Some(conn) = conn {
            self.transport_layer(&message, conn).await?;
        }
        // Transport messages are answered above and never routed.
        if message.is_transport() {
            return Ok(());
        }

        let routes: Vec<Arc<dyn Route>> = self.routes.read().await.clone();
        let mut destinations: Vec<(Arc<dyn Route>, String)> = Vec::new();
        for route in routes {
            match route.process(&message, conn).await {
                Ok(Destination::Stop) => break,
                Ok(Destination::Channel(to_channel)) => destinations.push((route, to_channel)),
                Ok(Destination::Skip) => {}
                Err(e) => warn!(error = %e, "route failed, skipping"),
            }
        }
        if destinations.is_empty() {
            debug!("no route claimed the message, dropping");
            return Ok(());
        }

        let from_channel = conn.map(|c| c.channel().to_string());
        let to_channels: Vec<String> = destinations.iter().map(|(_, ch)| ch.clone()).collect();
        self.queue
            .enqueue(&to_channels, &message, from_channel.as_deref())
            .await?;

        for (route, to_channel) in destinations {
            let message = message.clone();
            let queue = Arc::clone(&self.queue);
            tokio::spawn(async move {
                if let Err(e) = route.post_process(&message, &to_channel, &queue).await {
                    warn!(channel = %to_channel, error = %e, "post_process failed");
                }
            });
        }
        Ok(())
    }

    /// Transport layer: reliable delivery handshake and keep-alive.
    async fn transport_layer(
        &self,
        message: &Message,
        conn: &Arc<dyn Connection>,
    ) -> Result<(), ChatError> {
        if message.is_transport() {
            match message.kind {
                // Ping, say pong.
                MessageType::Transport(transport::PING) => {
                    let pong = Message::transport(transport::PONG).encode()?;
                    conn.write(pong).await?;
                }
                // Receiver confirms receipt: settle the in-flight record and
                // notify the original sender.
                MessageType::Transport(transport::RECEIVER_GOT_IT) => {
                    self.transport_delivered(message, conn).await?;
                }
                _ => {}
            }
        } else {
            // Data message arriving on a connection: tell the sender the
            // server has it, before anything else reaches that connection.
            let mut got_it = Message::transport(transport::SERVER_GOT_IT);
            if let Some(id) = &message.id {
                got_it = got_it.with_data(id.as_str());
            }
            conn.write(got_it.encode()?).await?;
        }
        Ok(())
    }

    /// Settle an acknowledged message and queue the `delivered`
    /// notification back to its sender.
    async fn transport_delivered(
        &self,
        message: &Message,
        conn: &Arc<dyn Connection>,
    ) -> Result<(), ChatError> {
        let Some(message_id) = message.data_str() else {
            debug!("ack without message id, ignoring");
            return Ok(());
        };

        let delivered = self.queue.ack(conn.channel(), message_id).await?;
        if let Some((delivered_message, from_channel)) = delivered {
            // An empty stored sender means there is no one to notify.
            if from_channel.is_empty() {
                return Ok(());
            }
            let mut notify = Message::transport(transport::DELIVERED);
            if let Some(id) = &delivered_message.id {
                notify = notify.with_data(id.as_str());
            }
            self.queue
                .enqueue(&[from_channel], &notify, None)
                .await?;
        }
        Ok(())
    }
}
