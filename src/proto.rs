//! Wire protocol for chat messages
//!
//! Messages travel as JSON text frames over a WebSocket and share a single
//! envelope. The `type` field splits them into two families:
//!
//! - **Data messages** carry application payload and have a *string* `type`
//!   (`"chat"`, `"group"`, ...). Routes filter on it.
//! - **Transport messages** drive the delivery protocol and have an *integer*
//!   `type` drawn from the closed set in [`transport`].
//!
//! Data message envelope:
//!
//! ```json
//! {
//!     "id":   "unique message id",
//!     "type": "chat",
//!     "time": 1700000000000,
//!     "from": "sender channel",
//!     "dest": "destination understood by routes",
//!     "data": "text or nested object",
//!     "sign": "optional signature"
//! }
//! ```
//!
//! Transport messages reference a data message by id:
//!
//! ```json
//! {"type": 200, "data": "message id"}
//! ```
//!
//! The codec performs no semantic validation beyond the type split; absent
//! fields never appear in the encoded output, and unrecognized envelope
//! fields survive a parse/encode round trip untouched.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ChatError;

// =============================================================================
// TRANSPORT TYPE CODES
// =============================================================================

/// Transport-layer message type codes (closed set)
pub mod transport {
    /// server => sender, message accepted for delivery
    pub const SERVER_GOT_IT: i64 = 100;
    /// receiver => server, receiver acknowledges receipt
    pub const RECEIVER_GOT_IT: i64 = 200;
    /// server => sender, delivery to receiver confirmed
    pub const DELIVERED: i64 = 300;
    /// server => client, channel subscription is ready
    pub const READY: i64 = 1000;
    /// client => server, ping
    pub const PING: i64 = 1001;
    /// server => client, pong
    pub const PONG: i64 = 1002;

    /// Every recognized transport code. Integer `type` values outside this
    /// set are treated as data messages.
    pub const CODES: [i64; 6] = [
        SERVER_GOT_IT,
        RECEIVER_GOT_IT,
        DELIVERED,
        READY,
        PING,
        PONG,
    ];
}

// =============================================================================
// MESSAGE MODEL
// =============================================================================

/// The `type` field of a wire message.
///
/// Integers are reserved for the transport layer; applications must use
/// string types for their own messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageType {
    /// Integer type, transport layer (see [`transport`])
    Transport(i64),
    /// String type, application data
    Data(String),
}

/// A wire message in parsed form.
///
/// All fields except `type` are optional and are omitted from the encoded
/// frame when absent. Fields outside the envelope are collected in `extra`
/// and written back verbatim on encode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique message id, required for reliable delivery
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Message type, the data/transport discriminator
    #[serde(rename = "type")]
    pub kind: MessageType,
    /// Unix timestamp in milliseconds, not enforced by the core
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<i64>,
    /// Sender channel, may be empty for messages "by system"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    /// Destination identifier, interpreted by routes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dest: Option<String>,
    /// Payload: a string, or a nested record. For transport messages this
    /// holds the referenced message id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Optional signature
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sign: Option<String>,
    /// Envelope fields this crate does not interpret
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl Message {
    /// Create a data message with the given string type.
    pub fn data(kind: impl Into<String>) -> Self {
        Self::with_kind(MessageType::Data(kind.into()))
    }

    /// Create a transport message with the given type code.
    pub fn transport(code: i64) -> Self {
        Self::with_kind(MessageType::Transport(code))
    }

    fn with_kind(kind: MessageType) -> Self {
        Self {
            id: None,
            kind,
            time: None,
            from: None,
            dest: None,
            data: None,
            sign: None,
            extra: serde_json::Map::new(),
        }
    }

    /// Set the message id.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Set the timestamp, milliseconds since epoch.
    pub fn with_time(mut self, time: i64) -> Self {
        self.time = Some(time);
        self
    }

    /// Set the sender channel.
    pub fn with_from(mut self, from: impl Into<String>) -> Self {
        self.from = Some(from.into());
        self
    }

    /// Set the destination.
    pub fn with_dest(mut self, dest: impl Into<String>) -> Self {
        self.dest = Some(dest.into());
        self
    }

    /// Set the payload.
    pub fn with_data(mut self, data: impl Into<Value>) -> Self {
        self.data = Some(data.into());
        self
    }

    /// Set the signature.
    pub fn with_sign(mut self, sign: impl Into<String>) -> Self {
        self.sign = Some(sign.into());
        self
    }

    /// Parse a raw text frame.
    ///
    /// Malformed frames yield [`ChatError::Format`]; the caller is expected
    /// to log and drop them without closing the connection.
    pub fn parse(raw: &str) -> Result<Self, ChatError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Encode to a text frame. Total on structurally valid records.
    pub fn encode(&self) -> Result<String, ChatError> {
        Ok(serde_json::to_string(self)?)
    }

    /// True when `type` is an integer belonging to the closed transport set.
    ///
    /// Unknown integer codes classify as data messages.
    pub fn is_transport(&self) -> bool {
        matches!(self.kind, MessageType::Transport(code) if transport::CODES.contains(&code))
    }

    /// The payload as a string slice, when it is one. For transport messages
    /// this is the referenced message id.
    pub fn data_str(&self) -> Option<&str> {
        self.data.as_ref().and_then(Value::as_str)
    }

    /// Current time in the wire format of the `time` field.
    pub fn now_millis() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}
