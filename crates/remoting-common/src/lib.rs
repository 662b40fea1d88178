//! Remoting Common Types and Transport
//!
//! This crate provides the protocol definitions and transport capabilities
//! shared by the remoting client engine.
//!
//! # Overview
//!
//! The client engine turns an action name and an argument object into a network
//! call and decodes the typed result. Everything the engine consumes at its
//! boundaries lives here:
//!
//! - **Protocol Layer**: the [`Message`] envelope, the [`Encoder`] capability
//!   with its JSON implementation, and the [`RemotingError`] taxonomy
//! - **Transport Layer**: the [`SocketClient`] capability, the length-prefixed
//!   TCP reference transport and the [`TransportRegistry`] mapping schemes to
//!   providers
//! - **Auth**: credential hashing and session-key sealing used by the login
//!   handshake
//!
//! # Example
//!
//! ```
//! use remoting_common::{Encoder, JsonEncoder, Message};
//! use serde_json::json;
//!
//! let encoder = JsonEncoder::new();
//! let request = encoder.create_request("Echo", &json!({"x": 1})).unwrap();
//!
//! let response = Message::response_to(&request, 0, request.payload.clone());
//! let reply = encoder.decode(&response).unwrap();
//! let value = encoder.decode_result("Echo", &reply.payload).unwrap();
//! assert_eq!(value, json!({"x": 1}));
//! ```

pub mod auth;
pub mod protocol;
pub mod transport;

pub use auth::Credentials;
pub use protocol::*;
pub use transport::{
    read_frame, write_frame, Endpoint, MessageCodec, SocketClient, TcpSocketClient,
    TransportCounters, TransportProvider, TransportRegistry, TransportStats,
};
