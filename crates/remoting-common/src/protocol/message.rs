//! Remoting Message Envelope
//!
//! Requests and responses share one envelope. A response copies the `id` of
//! the request it answers; correlation beyond that belongs to the transport.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

pub type MessageId = u64;

static MESSAGE_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Direction of a message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Request,
    Response,
}

/// Envelope exchanged with the server.
///
/// # Fields
///
/// - `id`: correlation id, copied from request to response
/// - `kind`: request or response
/// - `action`: the action being invoked
/// - `one_way`: the sender expects no reply
/// - `flag`: opaque application tag, copied verbatim
/// - `code`: response code, 0 on success
/// - `payload`: encoded arguments (request) or result/error text (response)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub id: MessageId,
    pub kind: MessageKind,
    pub action: String,
    #[serde(default)]
    pub one_way: bool,
    #[serde(default)]
    pub flag: u8,
    #[serde(default)]
    pub code: i32,
    #[serde(default, with = "base64_payload")]
    pub payload: Vec<u8>,
}

impl Message {
    /// Creates a request for `action` with a fresh correlation id.
    pub fn request(action: impl Into<String>, payload: Vec<u8>) -> Self {
        Message {
            id: generate_message_id(),
            kind: MessageKind::Request,
            action: action.into(),
            one_way: false,
            flag: 0,
            code: 0,
            payload,
        }
    }

    /// Creates the response to `request`.
    pub fn response_to(request: &Message, code: i32, payload: Vec<u8>) -> Self {
        Message {
            id: request.id,
            kind: MessageKind::Response,
            action: request.action.clone(),
            one_way: false,
            flag: request.flag,
            code,
            payload,
        }
    }

    pub fn with_flag(mut self, flag: u8) -> Self {
        self.flag = flag;
        self
    }

    /// Marks the message as not expecting a reply.
    pub fn into_one_way(mut self) -> Self {
        self.one_way = true;
        self
    }

    pub fn is_response(&self) -> bool {
        self.kind == MessageKind::Response
    }

    /// Whether the sender waits for a reply to this message.
    pub fn expects_reply(&self) -> bool {
        self.kind == MessageKind::Request && !self.one_way
    }
}

fn generate_message_id() -> MessageId {
    let timestamp = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);

    let counter = MESSAGE_ID_COUNTER.fetch_add(1, Ordering::SeqCst);

    // Upper 32 bits from the clock, lower 32 bits from the counter
    (timestamp & 0xFFFFFFFF00000000) | (counter & 0xFFFFFFFF)
}

mod base64_payload {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        STANDARD.decode(text).map_err(serde::de::Error::custom)
    }
}
