use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::socket::SocketClient;
use super::tcp::TcpSocketClient;
use crate::protocol::error::{RemotingError, Result};

/// Scheme assumed for endpoints written as a bare `host:port`.
pub const DEFAULT_SCHEME: &str = "tcp";

/// A parsed endpoint: transport scheme plus transport-specific address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub scheme: String,
    pub address: String,
}

impl Endpoint {
    /// Parses `scheme://address` or a bare address (treated as `tcp`).
    ///
    /// # Example
    ///
    /// ```
    /// use remoting_common::transport::Endpoint;
    ///
    /// let ep = Endpoint::parse("WS://10.0.0.1:80").unwrap();
    /// assert_eq!(ep.scheme, "ws");
    /// assert_eq!(ep.address, "10.0.0.1:80");
    ///
    /// let bare = Endpoint::parse("127.0.0.1:9000").unwrap();
    /// assert_eq!(bare.scheme, "tcp");
    /// ```
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim();
        let (scheme, address) = match text.split_once("://") {
            Some((scheme, address)) => (scheme.to_ascii_lowercase(), address.trim()),
            None => (DEFAULT_SCHEME.to_string(), text),
        };

        if scheme.is_empty() || address.is_empty() {
            return Err(RemotingError::Configuration(format!(
                "Invalid endpoint '{}'",
                text
            )));
        }

        Ok(Self {
            scheme,
            address: address.to_string(),
        })
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme, self.address)
    }
}

/// Builds socket clients for one transport scheme.
pub trait TransportProvider: Send + Sync {
    fn create(&self, endpoint: &Endpoint) -> Result<Arc<dyn SocketClient>>;
}

/// Provider for the `tcp` scheme.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpProvider;

impl TransportProvider for TcpProvider {
    fn create(&self, endpoint: &Endpoint) -> Result<Arc<dyn SocketClient>> {
        Ok(Arc::new(TcpSocketClient::new(endpoint.address.clone())))
    }
}

/// Maps endpoint schemes to transport providers.
///
/// The registry is an explicit value handed to the client rather than global
/// state, so tests and applications can plug in their own transports (`udp`,
/// `http`, `ws`, in-memory fakes) without affecting anyone else.
///
/// # Example
///
/// ```
/// use remoting_common::transport::{TcpProvider, TransportRegistry};
///
/// let registry = TransportRegistry::empty().with("tcp", TcpProvider);
/// assert!(registry.supports("tcp"));
/// assert!(registry.create("udp://127.0.0.1:9000").is_err());
/// ```
#[derive(Clone)]
pub struct TransportRegistry {
    providers: HashMap<String, Arc<dyn TransportProvider>>,
}

impl TransportRegistry {
    /// A registry without any provider.
    pub fn empty() -> Self {
        Self {
            providers: HashMap::new(),
        }
    }

    /// Registers (or replaces) the provider for `scheme`.
    pub fn register(&mut self, scheme: &str, provider: impl TransportProvider + 'static) {
        self.providers
            .insert(scheme.to_ascii_lowercase(), Arc::new(provider));
    }

    /// Builder-style [`register`](Self::register).
    pub fn with(mut self, scheme: &str, provider: impl TransportProvider + 'static) -> Self {
        self.register(scheme, provider);
        self
    }

    pub fn supports(&self, scheme: &str) -> bool {
        self.providers.contains_key(&scheme.to_ascii_lowercase())
    }

    /// Creates an unconnected socket client for an endpoint string.
    pub fn create(&self, endpoint: &str) -> Result<Arc<dyn SocketClient>> {
        let endpoint = Endpoint::parse(endpoint)?;
        let provider = self.providers.get(&endpoint.scheme).ok_or_else(|| {
            RemotingError::Configuration(format!(
                "No transport registered for scheme '{}' ({})",
                endpoint.scheme, endpoint
            ))
        })?;
        provider.create(&endpoint)
    }
}

impl Default for TransportRegistry {
    fn default() -> Self {
        Self::empty().with(DEFAULT_SCHEME, TcpProvider)
    }
}

impl fmt::Debug for TransportRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut schemes: Vec<_> = self.providers.keys().collect();
        schemes.sort();
        f.debug_struct("TransportRegistry")
            .field("schemes", &schemes)
            .finish()
    }
}
