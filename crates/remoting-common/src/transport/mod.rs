//! Remoting Transport Layer
//!
//! This module defines the socket-client capability the engine talks to, the
//! message codec attached to each socket, and the registry that maps endpoint
//! schemes to transport providers.
//!
//! # Components
//!
//! - **[`SocketClient`]**: one live connection to one endpoint
//! - **[`MessageCodec`]**: turns envelopes into frame bodies and back
//! - **[`TcpSocketClient`]**: reference transport over TCP
//! - **[`TransportRegistry`]**: explicit scheme to provider map, handed to the
//!   client at construction
//!
//! # Wire Format (TCP)
//!
//! `[4-byte length prefix as u32 big-endian] + [JSON envelope]`, at most 100 MB.
//!
//! # Example
//!
//! ```no_run
//! use remoting_common::transport::TransportRegistry;
//! use remoting_common::{Message, SocketClient};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = TransportRegistry::default();
//! let client = registry.create("tcp://127.0.0.1:8080")?;
//!
//! let session = client.open().await?;
//! let reply = client
//!     .send_message(session, Message::request("Ping", b"{}".to_vec()))
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod registry;
pub mod socket;
pub mod tcp;

pub use codec::{MessageCodec, MAX_MESSAGE_SIZE};
pub use registry::{Endpoint, TcpProvider, TransportProvider, TransportRegistry};
pub use socket::{SocketClient, TransportCounters, TransportStats};
pub use tcp::{read_frame, write_frame, TcpSocketClient};
