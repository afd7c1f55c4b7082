//! WebSocket adapter for axum
//!
//! Glue between an axum WebSocket endpoint and the messages center: upgrade
//! the request, resolve the connection's channel through the
//! [`ChannelAuth`] hook, attach, pump text frames into
//! [`MessagesCenter::handle_frame`], detach on close.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::ws::{close_code, CloseFrame, Message as WsFrame, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::center::MessagesCenter;
use crate::conn::Connection;
use crate::error::ChatError;

/// Resolves the channel for an incoming connection.
///
/// The default [`QueryChannelAuth`] trusts a `channel` query parameter;
/// real applications derive the channel from an authenticated user instead.
#[async_trait]
pub trait ChannelAuth: Send + Sync {
    /// Authenticate the upgrade request and return the connection's
    /// channel. An `Err` closes the socket with the error text as reason.
    async fn authenticate(&self, params: &HashMap<String, String>) -> Result<String, ChatError>;
}

/// Authentication-free channels: the `channel` query parameter is the
/// channel identifier.
#[derive(Debug, Default)]
pub struct QueryChannelAuth;

#[async_trait]
impl ChannelAuth for QueryChannelAuth {
    async fn authenticate(&self, params: &HashMap<String, String>) -> Result<String, ChatError> {
        match params.get("channel") {
            Some(channel) if !channel.is_empty() => Ok(channel.clone()),
            _ => Err(ChatError::Auth("not authorized for channel access".into())),
        }
    }
}

/// Shared state of the WebSocket endpoint.
#[derive(Clone)]
pub struct WsState {
    pub center: Arc<MessagesCenter>,
    pub auth: Arc<dyn ChannelAuth>,
}

impl std::fmt::Debug for WsState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsState")
            .field("auth", &"dyn ChannelAuth")
            .finish()
    }
}

/// Router with the messages endpoint mounted at `/messages`.
pub fn router(center: Arc<MessagesCenter>, auth: Arc<dyn ChannelAuth>) -> Router {
    Router::new()
        .route("/messages", get(messages_handler))
        .with_state(WsState { center, auth })
}

/// Upgrade handler for the messages endpoint.
pub async fn messages_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<HashMap<String, String>>,
    State(state): State<WsState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| serve_socket(socket, params, state))
}

async fn serve_socket(socket: WebSocket, params: HashMap<String, String>, state: WsState) {
    let channel = match state.auth.authenticate(&params).await {
        Ok(channel) => channel,
        Err(e) => {
            debug!(error = %e, "rejecting connection");
            close_with_reason(socket, &e.to_string()).await;
            return;
        }
    };

    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    // Writer task owns the sink; everything else writes through the
    // connection handle.
    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if sink.send(WsFrame::Text(frame)).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let conn: Arc<dyn Connection> = Arc::new(WsConnection {
        channel: channel.clone(),
        tx,
        closed: AtomicBool::new(false),
    });

    if let Err(e) = state.center.attach(&channel, Arc::clone(&conn)).await {
        error!(channel = %channel, error = %e, "attach failed, closing connection");
        conn.close();
        writer.abort();
        return;
    }
    info!(channel = %channel, "connection attached");

    while let Some(received) = stream.next().await {
        match received {
            Ok(WsFrame::Text(text)) => state.center.handle_frame(&text, Some(&conn)).await,
            Ok(WsFrame::Close(_)) => break,
            // Binary frames are not part of the protocol; control frames
            // are answered by the framework.
            Ok(_) => {}
            Err(e) => {
                warn!(channel = %channel, error = %e, "websocket receive failed");
                break;
            }
        }
    }

    if let Err(e) = state.center.detach(&channel, &conn).await {
        warn!(channel = %channel, error = %e, "detach failed");
    }
    writer.abort();
    info!(channel = %channel, "connection closed");
}

async fn close_with_reason(mut socket: WebSocket, reason: &str) {
    let _ = socket
        .send(WsFrame::Close(Some(CloseFrame {
            code: close_code::POLICY,
            reason: reason.to_string().into(),
        })))
        .await;
}

/// [`Connection`] backed by an axum WebSocket.
pub struct WsConnection {
    channel: String,
    tx: mpsc::UnboundedSender<String>,
    closed: AtomicBool,
}

impl std::fmt::Debug for WsConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsConnection")
            .field("channel", &self.channel)
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish()
    }
}

#[async_trait]
impl Connection for WsConnection {
    fn channel(&self) -> &str {
        &self.channel
    }

    async fn write(&self, frame: String) -> Result<(), ChatError> {
        self.tx.send(frame).map_err(|_| {
            self.closed.store(true, Ordering::SeqCst);
            ChatError::Transport("connection writer is gone".into())
        })
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
