use std::sync::Arc;
use thiserror::Error;

/// Response code reserved for "session expired, log in again and retry".
pub const SESSION_EXPIRED: i32 = 401;

/// Errors surfaced by the remoting client.
///
/// The enum is `Clone` so that one login outcome can be handed to every caller
/// waiting on the same handshake.
#[derive(Error, Debug, Clone)]
pub enum RemotingError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Pool acquisition timed out after {0}ms")]
    PoolTimeout(u64),

    #[error("Invocation of '{action}' timed out after {timeout_ms}ms")]
    Timeout { action: String, timeout_ms: u64 },

    #[error("Api error {code}: {message}")]
    Api { code: i32, message: String },

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Decoding error: {0}")]
    Decode(String),

    #[error("Encoding error: {0}")]
    Encode(String),

    #[error("IO error: {0}")]
    Io(Arc<std::io::Error>),
}

impl RemotingError {
    /// Whether this is an application error carrying the session-expired code.
    pub fn is_session_expired(&self) -> bool {
        matches!(self, RemotingError::Api { code, .. } if *code == SESSION_EXPIRED)
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, RemotingError::Timeout { .. })
    }

    /// Whether the failure came from reaching or holding a connection.
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            RemotingError::Connection(_) | RemotingError::PoolTimeout(_) | RemotingError::Io(_)
        )
    }
}

impl From<std::io::Error> for RemotingError {
    fn from(err: std::io::Error) -> Self {
        RemotingError::Io(Arc::new(err))
    }
}

impl From<serde_json::Error> for RemotingError {
    fn from(err: serde_json::Error) -> Self {
        RemotingError::Decode(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RemotingError>;
