//! Credentials and Session Keys
//!
//! This module holds the account credentials used by the login handshake and
//! the primitives that protect secrets on the wire.
//!
//! # Security Model
//!
//! - Passwords never leave the client in clear text: the default login sends
//!   the hex-encoded SHA-256 digest of the secret
//! - A server may hand back a session key sealed with ChaCha20-Poly1305 under
//!   `sha256(secret)`; only a client holding the same secret can open it
//! - Sealed values are `[12-byte nonce][ciphertext + 16-byte tag]`
//!
//! # Example
//!
//! ```
//! use remoting_common::auth::{open_session_key, seal_session_key};
//!
//! let sealed = seal_session_key("s3cret", b"session-key").unwrap();
//! let key = open_session_key("s3cret", &sealed).unwrap();
//! assert_eq!(key, b"session-key");
//! ```

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chacha20poly1305::{aead::Aead, ChaCha20Poly1305, Key, KeyInit, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::fmt;

use crate::protocol::error::{RemotingError, Result};

/// Nonce length for ChaCha20-Poly1305 (12 bytes)
pub const NONCE_LEN: usize = 12;

/// Account identity and secret presented during login.
#[derive(Clone, Deserialize, PartialEq, Eq)]
pub struct Credentials {
    pub identity: String,
    pub secret: String,
}

impl Credentials {
    pub fn new(identity: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            secret: secret.into(),
        }
    }

    /// Fails with a configuration error when the identity is blank.
    pub fn validate(&self) -> Result<()> {
        if self.identity.trim().is_empty() {
            return Err(RemotingError::Configuration(
                "login identity must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("identity", &self.identity)
            .field("secret", &"*****")
            .finish()
    }
}

impl fmt::Display for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(*****)", self.identity)
    }
}

/// Hex-encoded SHA-256 digest of a secret.
pub fn hash_secret(secret: &str) -> String {
    hex::encode(Sha256::digest(secret.as_bytes()))
}

/// Derives a 256-bit cipher key from arbitrary key material.
pub fn derive_key(material: &[u8]) -> [u8; 32] {
    Sha256::digest(material).into()
}

/// Encrypts `plaintext` under a key derived from `key_material`.
pub fn seal(key_material: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
    let key = derive_key(key_material);
    let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));

    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|e| RemotingError::Encode(format!("Encryption failed: {e}")))?;

    let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    sealed.extend_from_slice(&nonce);
    sealed.extend_from_slice(&ciphertext);
    Ok(sealed)
}

/// Decrypts a value produced by [`seal`] with the same key material.
pub fn open(key_material: &[u8], sealed: &[u8]) -> Result<Vec<u8>> {
    if sealed.len() < NONCE_LEN {
        return Err(RemotingError::Decode(format!(
            "Sealed value too short: {} bytes",
            sealed.len()
        )));
    }

    let key = derive_key(key_material);
    let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));
    let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);

    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| RemotingError::Decode("Decryption failed: wrong key or corrupted data".to_string()))
}

/// Seals a session key for transport, keyed by the account secret.
///
/// Servers use this to hand out keys; the client only needs the inverse.
pub fn seal_session_key(secret: &str, session_key: &[u8]) -> Result<String> {
    Ok(STANDARD.encode(seal(secret.as_bytes(), session_key)?))
}

/// Opens a base64 sealed session key using the account secret.
pub fn open_session_key(secret: &str, sealed: &str) -> Result<Vec<u8>> {
    let raw = STANDARD
        .decode(sealed.trim())
        .map_err(|e| RemotingError::Decode(format!("Invalid session key encoding: {e}")))?;
    open(secret.as_bytes(), &raw)
}
