//! Invocation Engine
//!
//! [`ApiClient`] turns `invoke(action, args)` into a request envelope, runs
//! it on a cluster connection and decodes the reply. Around every call it:
//!
//! - opens the client on first use
//! - enforces the configured per-call timeout
//! - logs in on new sessions and once more when the server answers
//!   [`SESSION_EXPIRED`](remoting_common::SESSION_EXPIRED)
//! - counts the call and warns about slow ones
//!
//! # Example
//!
//! ```no_run
//! use remoting_client::{ApiClient, ApiConfig};
//! use serde_json::{json, Value};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let client = ApiClient::new(ApiConfig::new("127.0.0.1:9000").with_credentials("alice", "pw"));
//!
//! let reply: Value = client.invoke("Echo", json!({"x": 1})).await?;
//! client.close("done").await;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use remoting_common::{
    convert, ApiReply, Encoder, JsonEncoder, Message, MessageCodec, RemotingError, Result,
    TransportCounters, TransportRegistry,
};
use remoting_metrics::{summary, Counter, CounterSnapshot};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::runtime::Handle;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::blocking;
use crate::cluster::{Cluster, ConnectionSetup, NoSessionHook};
use crate::config::{parse_endpoints, ApiConfig};
use crate::exchange::Exchange;
use crate::heartbeat::{Heartbeat, HeartbeatTarget};
use crate::latency::{now_ms, LatencyTracker, PingReply, PingRequest};
use crate::session::{LoginState, LoginStrategy, SessionManager};

/// Builder for [`ApiClient`] with non-default collaborators.
pub struct ApiClientBuilder {
    config: ApiConfig,
    encoder: Option<Arc<dyn Encoder>>,
    registry: TransportRegistry,
    strategy: Option<Arc<dyn LoginStrategy>>,
    codec: MessageCodec,
    runtime: Option<Handle>,
}

impl ApiClientBuilder {
    pub fn encoder(mut self, encoder: Arc<dyn Encoder>) -> Self {
        self.encoder = Some(encoder);
        self
    }

    /// Transport registry used to resolve endpoint schemes.
    pub fn registry(mut self, registry: TransportRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Custom login handshake. Enables login even without credentials.
    pub fn login_strategy(mut self, strategy: Arc<dyn LoginStrategy>) -> Self {
        self.strategy = Some(strategy);
        self
    }

    pub fn codec(mut self, codec: MessageCodec) -> Self {
        self.codec = codec;
        self
    }

    /// Runtime used by blocking calls made outside any runtime.
    pub fn runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    pub fn build(self) -> ApiClient {
        let config = self.config;
        let encoder = self
            .encoder
            .unwrap_or_else(|| Arc::new(JsonEncoder::new()));
        let exchange = Exchange::new(encoder);
        let counters = ClientCounters::new();
        let runtime = self.runtime.or_else(|| Handle::try_current().ok());

        let setup = ConnectionSetup {
            timeout: config.timeout(),
            codec: self.codec,
            counters: counters.transport(),
        };
        let mut cluster = Cluster::new(config.policy, config.endpoints.clone(), self.registry, setup);
        if let Some(handle) = &runtime {
            cluster = cluster.with_runtime(handle.clone());
        }

        let session = SessionManager::new(
            exchange.clone(),
            config.login_action.clone(),
            config.credentials.clone(),
            self.strategy,
        );

        let inner = Arc::new_cyclic(|me| ClientInner {
            me: me.clone(),
            config,
            cluster,
            session,
            exchange,
            counters,
            latency: LatencyTracker::new(),
            active: AtomicBool::new(false),
            heartbeat: Mutex::new(None),
            runtime,
        });

        ApiClient { inner }
    }
}

/// Remoting client.
///
/// Cheap to clone; clones share connections, session and counters.
#[derive(Clone)]
pub struct ApiClient {
    inner: Arc<ClientInner>,
}

impl ApiClient {
    /// Creates a client with the default JSON encoder, TCP transport and
    /// password login.
    pub fn new(config: ApiConfig) -> Self {
        Self::builder(config).build()
    }

    pub fn builder(config: ApiConfig) -> ApiClientBuilder {
        ApiClientBuilder {
            config,
            encoder: None,
            registry: TransportRegistry::default(),
            strategy: None,
            codec: MessageCodec::default(),
            runtime: None,
        }
    }

    pub fn config(&self) -> &ApiConfig {
        &self.inner.config
    }

    /// Opens the cluster and starts the stats loop. Idempotent; every call
    /// opens implicitly.
    pub async fn open(&self) -> Result<()> {
        self.inner.open().await
    }

    /// Stops the stats loop, closes all connections and forgets the session.
    pub async fn close(&self, reason: &str) {
        self.inner.close(reason).await
    }

    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::Acquire)
    }

    /// Replaces the endpoint list. Connections created from now on use it.
    pub fn set_servers(&self, endpoints: &str) {
        self.inner.cluster.set_endpoints(parse_endpoints(endpoints));
    }

    /// Invokes `action` and converts the result to `T`.
    ///
    /// # Errors
    ///
    /// - `Configuration` when no endpoint is configured
    /// - `Timeout` when the call exceeds the configured timeout
    /// - `Api` when the server answers with a non-zero code
    /// - `Authentication` when the login handshake fails
    /// - `Decode` when the result cannot be converted to `T`
    pub async fn invoke<T: DeserializeOwned>(&self, action: &str, args: impl Serialize) -> Result<T> {
        self.inner.invoke(action, to_args(args)?, 0).await
    }

    /// Like [`invoke`](Self::invoke), tagging the request with `flag`.
    pub async fn invoke_with_flag<T: DeserializeOwned>(
        &self,
        action: &str,
        args: impl Serialize,
        flag: u8,
    ) -> Result<T> {
        self.inner.invoke(action, to_args(args)?, flag).await
    }

    /// Invokes `action` and returns the whole response envelope.
    pub async fn invoke_message(&self, action: &str, args: impl Serialize) -> Result<Message> {
        let (message, _) = self.inner.call(action, to_args(args)?, 0).await?;
        Ok(message)
    }

    /// Invokes `action` and returns the undecoded result payload.
    pub async fn invoke_raw(&self, action: &str, args: impl Serialize) -> Result<Vec<u8>> {
        let (_, reply) = self.inner.call(action, to_args(args)?, 0).await?;
        Ok(reply.payload)
    }

    /// Blocking [`invoke`](Self::invoke) for synchronous callers.
    ///
    /// Works from a multi-thread runtime worker or from a thread outside any
    /// runtime when the client captured a runtime handle at construction.
    pub fn invoke_blocking<T: DeserializeOwned>(&self, action: &str, args: impl Serialize) -> Result<T> {
        let args = to_args(args)?;
        blocking::block_on(self.inner.runtime.as_ref(), self.inner.invoke(action, args, 0))?
    }

    /// Sends `action` without waiting for a reply.
    ///
    /// Never fails; returns whether the message was handed to a connection.
    pub async fn invoke_one_way(&self, action: &str, args: impl Serialize) -> bool {
        self.invoke_one_way_with_flag(action, args, 0).await
    }

    pub async fn invoke_one_way_with_flag(&self, action: &str, args: impl Serialize, flag: u8) -> bool {
        match to_args(args) {
            Ok(args) => self.inner.send_one_way(action, args, flag).await,
            Err(e) => {
                debug!(action, error = %e, "One-way send failed");
                false
            }
        }
    }

    /// Runs the login handshake now and returns the server's login response.
    pub async fn login(&self) -> Result<Value> {
        self.inner.login().await
    }

    /// Pings the server, updating the delay and server clock estimates.
    pub async fn ping(&self) -> Result<PingReply> {
        self.inner.ping().await
    }

    pub fn login_state(&self) -> LoginState {
        self.inner.session.state()
    }

    /// Session key issued by the latest login, if any.
    pub fn session_key(&self) -> Option<Vec<u8>> {
        self.inner.session.session_key()
    }

    /// Response of the latest successful login.
    pub fn login_response(&self) -> Option<Value> {
        self.inner.session.last_response()
    }

    /// Smoothed round-trip delay in milliseconds, 0 before the first ping.
    pub fn delay_ms(&self) -> i64 {
        self.inner.latency.delay_ms()
    }

    /// Estimated server clock in unix milliseconds.
    pub fn server_time(&self) -> i64 {
        self.inner.latency.server_time_ms(now_ms())
    }

    /// Lifetime snapshots of the Invoke, Send and Receive counters.
    pub fn stats(&self) -> Vec<CounterSnapshot> {
        self.inner.counters.snapshots()
    }

    /// One-line summary of [`stats`](Self::stats), `None` before any traffic.
    pub fn stats_report(&self) -> Option<String> {
        summary(&self.stats())
    }

    /// Number of connections the cluster has built.
    pub fn connections_created(&self) -> u64 {
        self.inner.cluster.connections_created()
    }
}

impl fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiClient")
            .field("endpoints", &self.inner.cluster.endpoints())
            .field("policy", &self.inner.config.policy)
            .field("active", &self.is_active())
            .field("login_state", &self.login_state())
            .finish()
    }
}

struct ClientCounters {
    invoke: Arc<Counter>,
    send: Arc<Counter>,
    receive: Arc<Counter>,
}

impl ClientCounters {
    fn new() -> Self {
        Self {
            invoke: Arc::new(Counter::new("Invoke")),
            send: Arc::new(Counter::new("Send")),
            receive: Arc::new(Counter::new("Receive")),
        }
    }

    fn transport(&self) -> TransportCounters {
        TransportCounters {
            send: Some(Arc::clone(&self.send)),
            receive: Some(Arc::clone(&self.receive)),
        }
    }

    fn snapshots(&self) -> Vec<CounterSnapshot> {
        vec![self.invoke.snapshot(), self.send.snapshot(), self.receive.snapshot()]
    }

    /// Windowed samples; rolls the rate window.
    fn samples(&self) -> Vec<CounterSnapshot> {
        vec![self.invoke.sample(), self.send.sample(), self.receive.sample()]
    }
}

struct ClientInner {
    me: Weak<ClientInner>,
    config: ApiConfig,
    cluster: Cluster,
    session: SessionManager,
    exchange: Exchange,
    counters: ClientCounters,
    latency: LatencyTracker,
    active: AtomicBool,
    heartbeat: Mutex<Option<JoinHandle<()>>>,
    runtime: Option<Handle>,
}

impl ClientInner {
    async fn open(&self) -> Result<()> {
        if self.active.load(Ordering::Acquire) {
            return Ok(());
        }

        let mut heartbeat = self.heartbeat.lock().await;
        if self.active.load(Ordering::Acquire) {
            return Ok(());
        }

        self.cluster.open().await?;

        if let Some(interval) = self.config.stats_interval() {
            let target: Weak<dyn HeartbeatTarget> = self.me.clone();
            *heartbeat = Some(Heartbeat::new(target, interval, self.config.heartbeat).spawn());
        }

        self.active.store(true, Ordering::Release);
        info!(
            endpoints = ?self.cluster.endpoints(),
            policy = ?self.config.policy,
            login = self.session.is_enabled(),
            "Client opened"
        );
        Ok(())
    }

    async fn close(&self, reason: &str) {
        let mut heartbeat = self.heartbeat.lock().await;
        if !self.active.swap(false, Ordering::AcqRel) {
            return;
        }

        if let Some(task) = heartbeat.take() {
            task.abort();
        }
        // An aborted handshake releases its connection for the close below
        self.session.reset();
        self.cluster.close(reason).await;

        info!(reason, "Client closed");
    }

    async fn invoke<T: DeserializeOwned>(&self, action: &str, args: Value, flag: u8) -> Result<T> {
        let (_, reply) = self.call(action, args, flag).await?;
        let value = self.exchange.encoder().decode_result(action, &reply.payload)?;
        convert(value)
    }

    /// Runs one call end to end and returns the successful response.
    async fn call(&self, action: &str, args: Value, flag: u8) -> Result<(Message, ApiReply)> {
        self.open().await?;
        let request = self.create_request(action, &args, flag)?;

        let started = self.counters.invoke.start_count();
        let timeout = self.config.timeout();
        let result = match tokio::time::timeout(timeout, self.dispatch(request, &args)).await {
            Ok(result) => result,
            Err(_) => Err(RemotingError::Timeout {
                action: action.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            }),
        };
        let cost = self.counters.invoke.stop_count(started);

        if let Some(threshold) = self.config.slow_trace() {
            if cost >= threshold {
                warn!(action, cost_ms = cost.as_millis() as u64, "Slow invocation");
            }
        }
        if let Err(e) = &result {
            debug!(action, error = %e, "Invocation failed");
        }
        result
    }

    /// Sends `request` on a cluster connection. On an expired session the
    /// client logs in again and re-sends once; a second expiry is returned.
    async fn dispatch(&self, request: Message, args: &Value) -> Result<(Message, ApiReply)> {
        let exchange = &self.exchange;
        let session = &self.session;

        self.cluster
            .invoke(session, |conn, session_id| async move {
                let logins = conn.login_count();
                let flag = request.flag;
                let action = request.action.clone();

                match exchange.send(&conn, session_id, request).await {
                    Err(e) if e.is_session_expired() && session.is_enabled() => {
                        debug!(action = %action, connection = conn.id(), "Session expired, logging in again");
                        session.relogin(&conn, logins).await?;
                        // Re-encode: the login may have replaced the payload key
                        let retry = self.create_request(&action, args, flag)?;
                        exchange.send(&conn, conn.logged_in_session(), retry).await
                    }
                    other => other,
                }
            })
            .await
    }

    async fn send_one_way(&self, action: &str, args: Value, flag: u8) -> bool {
        if let Err(e) = self.open().await {
            debug!(action, error = %e, "One-way send failed");
            return false;
        }
        let request = match self.create_request(action, &args, flag) {
            Ok(request) => request.into_one_way(),
            Err(e) => {
                debug!(action, error = %e, "One-way send failed");
                return false;
            }
        };

        let started = self.counters.invoke.start_count();
        let sent = tokio::time::timeout(
            self.config.timeout(),
            self.cluster.invoke(&self.session, |conn, session_id| async move {
                conn.send(session_id, request).await.map(|_| ())
            }),
        )
        .await;
        self.counters.invoke.stop_count(started);

        match sent {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                debug!(action, error = %e, "One-way send failed");
                false
            }
            Err(_) => {
                debug!(action, "One-way send timed out");
                false
            }
        }
    }

    async fn login(&self) -> Result<Value> {
        if !self.session.is_enabled() {
            return Err(RemotingError::Configuration("Login is not configured".to_string()));
        }
        self.open().await?;

        let session = &self.session;
        let outcome = self
            .cluster
            .invoke(&NoSessionHook, |conn, _session_id| async move { session.login(&conn).await })
            .await?;
        Ok(outcome.response)
    }

    async fn ping(&self) -> Result<PingReply> {
        let request = PingRequest { time: now_ms() };
        let reply: PingReply = self
            .invoke(&self.config.ping_action, to_args(request)?, 0)
            .await?;

        let delay = self.latency.observe(&reply, now_ms());
        debug!(delay_ms = delay, offset_ms = self.latency.offset_ms(), "Ping");
        Ok(reply)
    }

    fn create_request(&self, action: &str, args: &Value, flag: u8) -> Result<Message> {
        let request = self.exchange.encoder().create_request(action, args)?;
        Ok(if flag != 0 { request.with_flag(flag) } else { request })
    }
}

#[async_trait]
impl HeartbeatTarget for ClientInner {
    fn stats_line(&self) -> Option<String> {
        let line = summary(&self.counters.samples())?;
        if self.latency.samples() > 0 {
            Some(format!("{line} | Delay={}ms", self.latency.delay_ms()))
        } else {
            Some(line)
        }
    }

    async fn ping(&self) -> Result<()> {
        ClientInner::ping(self).await.map(|_| ())
    }
}

fn to_args(args: impl Serialize) -> Result<Value> {
    serde_json::to_value(args).map_err(|e| RemotingError::Encode(format!("Cannot encode arguments: {e}")))
}
