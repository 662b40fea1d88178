//! Remoting Client
//!
//! Invocation engine on top of [`remoting_common`]: cluster policies, the
//! login handshake, per-call timeouts and the periodic stats loop.
//!
//! - [`ApiClient`]: `invoke(action, args)` with typed results
//! - [`Cluster`]: single shared connection or bounded pool
//! - [`SessionManager`]: single-flight login and re-login on expiry

mod blocking;
pub mod client;
pub mod cluster;
pub mod config;
pub mod connection;
mod exchange;
mod heartbeat;
pub mod latency;
pub mod pool;
pub mod session;

pub use client::{ApiClient, ApiClientBuilder};
pub use cluster::{Cluster, ConnectionSetup, NoSessionHook, SessionHook};
pub use config::{parse_endpoints, ApiConfig, ClusterPolicy, PoolConfig};
pub use connection::Connection;
pub use latency::{LatencyTracker, PingReply, PingRequest};
pub use pool::{ConnectionPool, PoolStats, PooledConnection};
pub use session::{LoginOutcome, LoginState, LoginStrategy, PasswordLogin, SessionManager};
