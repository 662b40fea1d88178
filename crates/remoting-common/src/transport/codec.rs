use crate::protocol::error::{RemotingError, Result};
use crate::protocol::Message;

/// Largest frame body accepted by the transports (100 MB).
pub const MAX_MESSAGE_SIZE: usize = 100 * 1024 * 1024;

/// Codec attached to a socket client for encoding/decoding envelopes.
///
/// Currently only JSON is supported, but the enum allows for future
/// extensibility (e.g., a compact binary header).
///
/// # Example
///
/// ```
/// use remoting_common::transport::MessageCodec;
/// use remoting_common::Message;
///
/// let codec = MessageCodec::default();
/// let message = Message::request("Echo", b"{}".to_vec());
///
/// let encoded = codec.encode(&message).unwrap();
/// let decoded = codec.decode(&encoded).unwrap();
/// assert_eq!(message, decoded);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MessageCodec {
    #[default]
    Json,
}

impl MessageCodec {
    /// Encodes an envelope into a frame body.
    pub fn encode(&self, message: &Message) -> Result<Vec<u8>> {
        match self {
            MessageCodec::Json => serde_json::to_vec(message)
                .map_err(|e| RemotingError::Encode(e.to_string())),
        }
    }

    /// Decodes a frame body into an envelope.
    pub fn decode(&self, data: &[u8]) -> Result<Message> {
        match self {
            MessageCodec::Json => serde_json::from_slice(data).map_err(|e| {
                RemotingError::Decode(format!("Malformed message frame: {}", e))
            }),
        }
    }
}
