//! Encoder Capability
//!
//! The engine never touches payload bytes itself. It asks an [`Encoder`] to
//! turn `(action, args)` into a request envelope and to take a response
//! envelope apart again.

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::{PoisonError, RwLock};

use super::error::{RemotingError, Result};
use super::message::Message;
use crate::auth;

/// Decoded response: the application code and the raw payload.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiReply {
    pub code: i32,
    pub payload: Vec<u8>,
}

impl ApiReply {
    pub fn is_success(&self) -> bool {
        self.code == 0
    }

    /// Payload rendered as text for error messages.
    pub fn payload_text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

/// Turns calls into request envelopes and response envelopes into values.
///
/// Implementations must be total over well-formed input and raise
/// [`RemotingError::Decode`] on malformed input.
pub trait Encoder: Send + Sync {
    /// Builds the request envelope for `action`.
    fn create_request(&self, action: &str, args: &Value) -> Result<Message>;

    /// Splits a response envelope into code and payload.
    fn decode(&self, message: &Message) -> Result<ApiReply>;

    /// Parses a successful payload into a value.
    fn decode_result(&self, action: &str, payload: &[u8]) -> Result<Value>;

    /// Installs or clears the session key. Encoders that do not protect
    /// payloads ignore it.
    fn set_key(&self, _key: Option<&[u8]>) {}
}

/// Converts a decoded value to the caller's requested type.
pub fn convert<T: DeserializeOwned>(value: Value) -> Result<T> {
    serde_json::from_value(value)
        .map_err(|e| RemotingError::Decode(format!("Cannot convert result: {e}")))
}

/// JSON encoder.
///
/// Arguments and results travel as JSON documents. With payload encryption
/// enabled and a session key installed, request payloads are sealed and
/// successful response payloads are opened with that key.
///
/// # Example
///
/// ```
/// use remoting_common::{Encoder, JsonEncoder};
/// use serde_json::json;
///
/// let encoder = JsonEncoder::new();
/// let request = encoder.create_request("Add", &json!({"a": 1, "b": 2})).unwrap();
/// assert_eq!(request.action, "Add");
/// ```
#[derive(Debug, Default)]
pub struct JsonEncoder {
    key: RwLock<Option<Vec<u8>>>,
    encrypt_payloads: bool,
}

impl JsonEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seals payloads with the session key once one is installed.
    pub fn with_payload_encryption() -> Self {
        Self {
            key: RwLock::new(None),
            encrypt_payloads: true,
        }
    }

    /// The session key currently installed.
    pub fn key(&self) -> Option<Vec<u8>> {
        self.key
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn active_key(&self) -> Option<Vec<u8>> {
        if self.encrypt_payloads {
            self.key()
        } else {
            None
        }
    }
}

impl Encoder for JsonEncoder {
    fn create_request(&self, action: &str, args: &Value) -> Result<Message> {
        let mut payload = if args.is_null() {
            Vec::new()
        } else {
            serde_json::to_vec(args).map_err(|e| RemotingError::Encode(e.to_string()))?
        };

        if let Some(key) = self.active_key() {
            if !payload.is_empty() {
                payload = auth::seal(&key, &payload)?;
            }
        }

        Ok(Message::request(action, payload))
    }

    fn decode(&self, message: &Message) -> Result<ApiReply> {
        if !message.is_response() {
            return Err(RemotingError::Decode(format!(
                "Expected a response for '{}', got a request",
                message.action
            )));
        }

        let mut payload = message.payload.clone();
        if message.code == 0 && !payload.is_empty() {
            if let Some(key) = self.active_key() {
                payload = auth::open(&key, &payload)?;
            }
        }

        Ok(ApiReply {
            code: message.code,
            payload,
        })
    }

    fn decode_result(&self, action: &str, payload: &[u8]) -> Result<Value> {
        if payload.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_slice(payload).map_err(|e| {
            RemotingError::Decode(format!("Malformed result for '{}': {}", action, e))
        })
    }

    fn set_key(&self, key: Option<&[u8]>) {
        *self.key.write().unwrap_or_else(PoisonError::into_inner) = key.map(|k| k.to_vec());
    }
}
