//! Message routing chain
//!
//! Routes are registered in the messages center; each one is responsible for
//! a single kind of message, i.e. direct user messages, group chat messages,
//! system notifications. The center walks them in registration order and
//! collects destination channels.

use std::sync::Arc;

use async_trait::async_trait;

use crate::conn::Connection;
use crate::error::ChatError;
use crate::proto::Message;
use crate::queue::MessageQueue;

/// Outcome of a single routing step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    /// This route does not claim the message; the chain continues.
    Skip,
    /// Halt the chain; the message is not enqueued.
    Stop,
    /// Deliver to this channel. The chain continues so later routes may
    /// fan the message out further.
    Channel(String),
}

/// A single step of the routing pipeline. User-extensible.
///
/// Routes share one message record per chain walk and must not mutate state
/// in ways that affect later routes.
#[async_trait]
pub trait Route: Send + Sync {
    /// Decide the destination channel for a message.
    ///
    /// `conn` is the connection the message arrived on, absent for messages
    /// created server-side. Errors are logged by the center and the chain
    /// continues with the next route.
    async fn process(
        &self,
        message: &Message,
        conn: Option<&Arc<dyn Connection>>,
    ) -> Result<Destination, ChatError>;

    /// Hook invoked as a detached task after the message was put on the
    /// delivery queue. Never on the critical path; failures are logged and
    /// isolated.
    ///
    /// Typical uses: check delivery after a timeout and escalate to another
    /// channel (email, push), send a follow-up service message, audit.
    async fn post_process(
        &self,
        _message: &Message,
        _to_channel: &str,
        _queue: &Arc<dyn MessageQueue>,
    ) -> Result<(), ChatError> {
        Ok(())
    }
}

/// Stock route delivering to the channel named by the `dest` field.
#[derive(Debug, Default)]
pub struct DirectRoute;

#[async_trait]
impl Route for DirectRoute {
    async fn process(
        &self,
        message: &Message,
        _conn: Option<&Arc<dyn Connection>>,
    ) -> Result<Destination, ChatError> {
        match &message.dest {
            Some(dest) if !dest.is_empty() => Ok(Destination::Channel(dest.clone())),
            _ => Ok(Destination::Skip),
        }
    }
}
