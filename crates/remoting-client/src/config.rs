//! Client Configuration
//!
//! [`ApiConfig`] gathers every knob of the client: where to connect, which
//! cluster policy to use, timeouts, stats reporting and login credentials.
//! It can be built in code or deserialized from JSON.
//!
//! # Example
//!
//! ```
//! use remoting_client::{ApiConfig, ClusterPolicy};
//! use std::time::Duration;
//!
//! let config = ApiConfig::new("tcp://10.0.0.1:9000; 10.0.0.2:9000")
//!     .with_policy(ClusterPolicy::pool(8))
//!     .with_timeout(Duration::from_secs(5))
//!     .with_credentials("alice", "s3cret");
//!
//! assert_eq!(config.endpoints.len(), 2);
//! ```

use remoting_common::{Credentials, RemotingError, Result};
use serde::{Deserialize, Deserializer};
use std::time::Duration;

/// Default per-call timeout in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 15_000;

/// Default slow-call threshold in milliseconds
pub const DEFAULT_SLOW_TRACE_MS: u64 = 5_000;

/// Default stats reporting interval in seconds
pub const DEFAULT_STATS_INTERVAL_SECS: u64 = 600;

/// Connection pool limits.
///
/// # Default Configuration
///
/// - `max_size`: 10
/// - `acquire_timeout_ms`: 30000 (30 seconds)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum number of live connections in the pool
    pub max_size: usize,
    /// Maximum time to wait for a free connection in milliseconds
    pub acquire_timeout_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: 10,
            acquire_timeout_ms: 30_000,
        }
    }
}

/// How the cluster maintains its connections. Fixed for the client's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClusterPolicy {
    /// One shared persistent connection (lowest latency)
    #[default]
    Single,
    /// Many pooled connections (higher throughput)
    Pool(PoolConfig),
}

impl ClusterPolicy {
    /// Pool policy with `max_size` connections and the default acquire timeout.
    pub fn pool(max_size: usize) -> Self {
        ClusterPolicy::Pool(PoolConfig {
            max_size,
            ..PoolConfig::default()
        })
    }
}

/// Client configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Server endpoints; in JSON either a delimited string or an array
    #[serde(deserialize_with = "deserialize_endpoints")]
    pub endpoints: Vec<String>,
    pub policy: ClusterPolicy,
    /// Per-call timeout in milliseconds
    pub timeout_ms: u64,
    /// Calls slower than this are logged; 0 disables
    pub slow_trace_ms: u64,
    /// Stats loop interval in seconds; 0 disables the loop
    pub stats_interval_secs: u64,
    /// Ping the server on every stats tick
    pub heartbeat: bool,
    pub credentials: Option<Credentials>,
    pub login_action: String,
    pub ping_action: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            policy: ClusterPolicy::default(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            slow_trace_ms: DEFAULT_SLOW_TRACE_MS,
            stats_interval_secs: DEFAULT_STATS_INTERVAL_SECS,
            heartbeat: false,
            credentials: None,
            login_action: "Login".to_string(),
            ping_action: "Ping".to_string(),
        }
    }
}

impl ApiConfig {
    /// Configuration for a comma/semicolon-delimited endpoint list.
    pub fn new(endpoints: &str) -> Self {
        Self {
            endpoints: parse_endpoints(endpoints),
            ..Self::default()
        }
    }

    /// Loads a configuration from a JSON document.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| RemotingError::Configuration(format!("Invalid client configuration: {e}")))
    }

    pub fn with_policy(mut self, policy: ClusterPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_slow_trace(mut self, threshold_ms: u64) -> Self {
        self.slow_trace_ms = threshold_ms;
        self
    }

    pub fn with_stats_interval(mut self, secs: u64) -> Self {
        self.stats_interval_secs = secs;
        self
    }

    pub fn with_heartbeat(mut self, enabled: bool) -> Self {
        self.heartbeat = enabled;
        self
    }

    pub fn with_credentials(mut self, identity: impl Into<String>, secret: impl Into<String>) -> Self {
        self.credentials = Some(Credentials::new(identity, secret));
        self
    }

    pub fn with_login_action(mut self, action: impl Into<String>) -> Self {
        self.login_action = action.into();
        self
    }

    pub fn with_ping_action(mut self, action: impl Into<String>) -> Self {
        self.ping_action = action.into();
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn slow_trace(&self) -> Option<Duration> {
        (self.slow_trace_ms > 0).then(|| Duration::from_millis(self.slow_trace_ms))
    }

    pub fn stats_interval(&self) -> Option<Duration> {
        (self.stats_interval_secs > 0).then(|| Duration::from_secs(self.stats_interval_secs))
    }
}

/// Splits an endpoint list on commas and semicolons, dropping blank entries.
///
/// Duplicates are kept; the list is a set to draw from, not a priority order.
pub fn parse_endpoints(text: &str) -> Vec<String> {
    text.split([',', ';'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn deserialize_endpoints<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Vec<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Endpoints {
        Delimited(String),
        List(Vec<String>),
    }

    Ok(match Endpoints::deserialize(deserializer)? {
        Endpoints::Delimited(text) => parse_endpoints(&text),
        Endpoints::List(list) => list
            .iter()
            .flat_map(|entry| parse_endpoints(entry))
            .collect(),
    })
}
