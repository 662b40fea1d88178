//! Cluster management
//!
//! A [`Cluster`] owns the connections to the configured endpoints and decides,
//! per [`ClusterPolicy`], which connection a call runs on:
//!
//! - `Single` keeps one shared connection. After a network failure the
//!   connection is discarded and the next one is built against the next
//!   endpoint.
//! - `Pool` lends connections from a bounded [`ConnectionPool`], spreading
//!   new connections over the endpoints round-robin.
//!
//! Before any work runs on a connection, the cluster makes sure the
//! connection has a live session and asks its [`SessionHook`] to initialize
//! sessions that have not been set up yet (typically: log in). The work is
//! handed the id of that session and sends only on it, so a socket that
//! reconnected in the meantime refuses the send instead of carrying traffic
//! on a session nobody initialized.

use async_trait::async_trait;
use remoting_common::{MessageCodec, RemotingError, Result, TransportCounters, TransportRegistry};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::blocking;
use crate::config::{ClusterPolicy, PoolConfig, DEFAULT_TIMEOUT_MS};
use crate::connection::Connection;
use crate::pool::{ConnectionPool, PoolStats, PooledConnection};

/// Called when a connection runs on a physical session that has not been
/// initialized yet.
#[async_trait]
pub trait SessionHook: Send + Sync {
    async fn on_new_session(&self, conn: &Arc<Connection>, session: u64) -> Result<()>;
}

/// Hook that leaves sessions untouched.
pub struct NoSessionHook;

#[async_trait]
impl SessionHook for NoSessionHook {
    async fn on_new_session(&self, _conn: &Arc<Connection>, _session: u64) -> Result<()> {
        Ok(())
    }
}

/// Settings applied to every socket client the cluster creates.
#[derive(Debug, Clone)]
pub struct ConnectionSetup {
    pub timeout: Duration,
    pub codec: MessageCodec,
    pub counters: TransportCounters,
}

impl Default for ConnectionSetup {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            codec: MessageCodec::default(),
            counters: TransportCounters::default(),
        }
    }
}

enum Members {
    Single(Mutex<Option<Arc<Connection>>>),
    Pool(PoolConfig, RwLock<Option<Arc<ConnectionPool>>>),
}

/// A connection lent out for one call.
enum Lease {
    Shared(Arc<Connection>),
    Pooled(PooledConnection),
}

impl Lease {
    fn connection(&self) -> &Arc<Connection> {
        match self {
            Lease::Shared(conn) => conn,
            Lease::Pooled(pooled) => pooled.connection(),
        }
    }
}

/// Set of connections to the configured endpoints.
pub struct Cluster {
    policy: ClusterPolicy,
    registry: TransportRegistry,
    setup: ConnectionSetup,
    endpoints: RwLock<Vec<String>>,
    cursor: AtomicUsize,
    next_id: AtomicU64,
    active: AtomicBool,
    members: Members,
    runtime: Option<Handle>,
}

impl Cluster {
    pub fn new(
        policy: ClusterPolicy,
        endpoints: Vec<String>,
        registry: TransportRegistry,
        setup: ConnectionSetup,
    ) -> Self {
        let members = match policy {
            ClusterPolicy::Single => Members::Single(Mutex::new(None)),
            ClusterPolicy::Pool(config) => Members::Pool(config, RwLock::new(None)),
        };

        Self {
            policy,
            registry,
            setup,
            endpoints: RwLock::new(endpoints),
            cursor: AtomicUsize::new(0),
            next_id: AtomicU64::new(0),
            active: AtomicBool::new(false),
            members,
            runtime: Handle::try_current().ok(),
        }
    }

    /// Runtime used by [`invoke_blocking`](Self::invoke_blocking) when called
    /// from outside any runtime.
    pub fn with_runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    pub fn policy(&self) -> ClusterPolicy {
        self.policy
    }

    pub fn endpoints(&self) -> Vec<String> {
        self.endpoints
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replaces the endpoint list. Existing connections are kept; new ones use
    /// the new list.
    pub fn set_endpoints(&self, endpoints: Vec<String>) {
        *self.endpoints.write().unwrap_or_else(PoisonError::into_inner) = endpoints;
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Number of connections built over the cluster's lifetime.
    pub fn connections_created(&self) -> u64 {
        self.next_id.load(Ordering::Acquire)
    }

    /// Pool occupancy, `None` for the single policy or before open.
    pub fn pool_stats(&self) -> Option<PoolStats> {
        match &self.members {
            Members::Single(_) => None,
            Members::Pool(_, pool) => pool
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .as_ref()
                .map(|pool| pool.stats()),
        }
    }

    /// Builds the members for the policy. Idempotent.
    ///
    /// No socket is connected here; connections open on first use.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` when no endpoints are configured or an
    /// endpoint uses an unsupported scheme.
    pub async fn open(&self) -> Result<()> {
        if self.endpoints().is_empty() {
            return Err(RemotingError::Configuration("No endpoints configured".to_string()));
        }

        match &self.members {
            Members::Single(slot) => {
                let mut slot = slot.lock().await;
                if slot.is_none() {
                    *slot = Some(self.create_connection()?);
                }
            }
            Members::Pool(config, pool) => {
                let mut pool = pool.write().unwrap_or_else(PoisonError::into_inner);
                if pool.is_none() {
                    *pool = Some(Arc::new(ConnectionPool::new(*config)));
                }
            }
        }

        if !self.active.swap(true, Ordering::AcqRel) {
            info!(policy = ?self.policy, endpoints = ?self.endpoints(), "Cluster opened");
        }
        Ok(())
    }

    /// Closes every member connection. Idempotent.
    pub async fn close(&self, reason: &str) {
        if !self.active.swap(false, Ordering::AcqRel) {
            return;
        }

        match &self.members {
            Members::Single(slot) => {
                let conn = slot.lock().await.take();
                if let Some(conn) = conn {
                    conn.close(reason).await;
                }
            }
            Members::Pool(_, pool) => {
                let pool = pool.write().unwrap_or_else(PoisonError::into_inner).take();
                if let Some(pool) = pool {
                    for conn in pool.close() {
                        conn.close(reason).await;
                    }
                }
            }
        }

        info!(reason, "Cluster closed");
    }

    /// Runs `work` on a connection and the session it may send on.
    ///
    /// The connection's session is opened and, when new, handed to `hook`
    /// first. Pooled connections go back to the pool whatever the outcome.
    pub async fn invoke<T, F, Fut>(&self, hook: &dyn SessionHook, work: F) -> Result<T>
    where
        F: FnOnce(Arc<Connection>, u64) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let lease = self.acquire().await?;
        let conn = Arc::clone(lease.connection());

        let result = match self.ensure_session(&conn, hook).await {
            Ok(session) => work(Arc::clone(&conn), session).await,
            Err(e) => Err(e),
        };

        if let Err(e) = &result {
            if e.is_network() {
                self.discard(&conn).await;
            }
        }

        drop(lease);
        result
    }

    /// Blocking variant of [`invoke`](Self::invoke).
    pub fn invoke_blocking<T, F, Fut>(&self, hook: &dyn SessionHook, work: F) -> Result<T>
    where
        F: FnOnce(Arc<Connection>, u64) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        blocking::block_on(self.runtime.as_ref(), self.invoke(hook, work))?
    }

    async fn acquire(&self) -> Result<Lease> {
        if !self.is_active() {
            return Err(RemotingError::Connection("Cluster is not open".to_string()));
        }

        match &self.members {
            Members::Single(slot) => {
                let mut slot = slot.lock().await;
                let conn = match slot.as_ref() {
                    Some(conn) => Arc::clone(conn),
                    None => {
                        let conn = self.create_connection()?;
                        *slot = Some(Arc::clone(&conn));
                        conn
                    }
                };
                Ok(Lease::Shared(conn))
            }
            Members::Pool(_, pool) => {
                let pool = pool
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clone()
                    .ok_or_else(|| RemotingError::Connection("Cluster is not open".to_string()))?;
                let pooled = pool.acquire(|| self.create_connection()).await?;
                Ok(Lease::Pooled(pooled))
            }
        }
    }

    /// Returns the session `work` may send on.
    async fn ensure_session(&self, conn: &Arc<Connection>, hook: &dyn SessionHook) -> Result<u64> {
        let mut session = conn.client().current_session();
        if session == 0 {
            session = conn.open().await?;
        }
        if conn.logged_in_session() < session {
            hook.on_new_session(conn, session).await?;
        }
        // The hook may have reconnected and initialized a newer session
        Ok(session.max(conn.logged_in_session()))
    }

    /// Drops the shared connection after a network failure so the next call
    /// builds one against the next endpoint. Pooled connections stay in the
    /// pool and reopen their socket on next use.
    async fn discard(&self, conn: &Arc<Connection>) {
        if let Members::Single(slot) = &self.members {
            let mut slot = slot.lock().await;
            if slot.as_ref().is_some_and(|current| current.id() == conn.id()) {
                *slot = None;
                debug!(id = conn.id(), endpoint = conn.endpoint(), "Discarded connection after network failure");
            }
        }
    }

    /// Builds a connection against the next endpoint in round-robin order.
    fn create_connection(&self) -> Result<Arc<Connection>> {
        let endpoints = self.endpoints();
        if endpoints.is_empty() {
            return Err(RemotingError::Configuration("No endpoints configured".to_string()));
        }

        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % endpoints.len();
        let endpoint = &endpoints[index];

        let client = self.registry.create(endpoint)?;
        client.set_timeout(self.setup.timeout);
        client.set_codec(self.setup.codec);
        client.set_counters(self.setup.counters.clone());

        let id = self.next_id.fetch_add(1, Ordering::AcqRel) + 1;
        debug!(id, endpoint = %endpoint, "Created connection");
        Ok(Arc::new(Connection::new(id, endpoint.clone(), client)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use remoting_common::{Endpoint, Message, SocketClient, TransportProvider, TransportStats};
    use std::sync::atomic::AtomicUsize;

    /// In-memory client: `fail` endpoints reject every send with a
    /// connection error, others answer with an empty response.
    struct MemClient {
        address: String,
        session: AtomicU64,
        opened: AtomicU64,
        stats: TransportStats,
    }

    #[async_trait]
    impl SocketClient for MemClient {
        fn remote(&self) -> &str {
            &self.address
        }
        async fn open(&self) -> Result<u64> {
            if self.session.load(Ordering::Acquire) == 0 {
                let next = self.opened.fetch_add(1, Ordering::AcqRel) + 1;
                let _ = self.session.compare_exchange(0, next, Ordering::AcqRel, Ordering::Acquire);
            }
            Ok(self.session.load(Ordering::Acquire))
        }
        fn current_session(&self) -> u64 {
            self.session.load(Ordering::Acquire)
        }
        async fn send_message(&self, session: u64, message: Message) -> Result<Option<Message>> {
            if self.address == "fail" || session != self.current_session() {
                return Err(RemotingError::Connection("refused".to_string()));
            }
            Ok(Some(Message::response_to(&message, 0, Vec::new())))
        }
        async fn close(&self, _reason: &str) {
            self.session.store(0, Ordering::Release);
        }
        fn timeout(&self) -> Duration {
            Duration::from_secs(1)
        }
        fn set_timeout(&self, _timeout: Duration) {}
        fn set_codec(&self, _codec: MessageCodec) {}
        fn set_counters(&self, _counters: TransportCounters) {}
        fn stats(&self) -> &TransportStats {
            &self.stats
        }
    }

    struct MemProvider;

    impl TransportProvider for MemProvider {
        fn create(&self, endpoint: &Endpoint) -> Result<Arc<dyn SocketClient>> {
            Ok(Arc::new(MemClient {
                address: endpoint.address.clone(),
                session: AtomicU64::new(0),
                opened: AtomicU64::new(0),
                stats: TransportStats::default(),
            }))
        }
    }

    struct CountingHook(AtomicUsize);

    #[async_trait]
    impl SessionHook for CountingHook {
        async fn on_new_session(&self, conn: &Arc<Connection>, session: u64) -> Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            conn.mark_logged_in(session);
            Ok(())
        }
    }

    fn cluster(policy: ClusterPolicy, endpoints: &[&str]) -> Cluster {
        Cluster::new(
            policy,
            endpoints.iter().map(|e| e.to_string()).collect(),
            TransportRegistry::empty().with("mem", MemProvider),
            ConnectionSetup::default(),
        )
    }

    #[tokio::test]
    async fn test_open_without_endpoints_fails() {
        let cluster = cluster(ClusterPolicy::Single, &[]);
        let err = cluster.open().await.unwrap_err();
        assert!(matches!(err, RemotingError::Configuration(_)));
        assert!(!cluster.is_active());
    }

    #[tokio::test]
    async fn test_invoke_before_open_fails() {
        let cluster = cluster(ClusterPolicy::Single, &["mem://a"]);
        let err = cluster
            .invoke(&NoSessionHook, |_conn, _session| async { Ok(()) })
            .await
            .unwrap_err();
        assert!(matches!(err, RemotingError::Connection(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_open_creates_one_connection() {
        let cluster = Arc::new(cluster(ClusterPolicy::Single, &["mem://a"]));

        let opens = (0..8).map(|_| {
            let cluster = Arc::clone(&cluster);
            tokio::spawn(async move { cluster.open().await })
        });
        for result in futures::future::join_all(opens).await {
            result.unwrap().unwrap();
        }

        assert!(cluster.is_active());
        assert_eq!(cluster.connections_created(), 1);
    }

    #[tokio::test]
    async fn test_hook_runs_once_per_session() {
        let cluster = cluster(ClusterPolicy::Single, &["mem://a"]);
        cluster.open().await.unwrap();
        let hook = CountingHook(AtomicUsize::new(0));

        for _ in 0..3 {
            let session = cluster
                .invoke(&hook, |_conn, session| async move { Ok(session) })
                .await
                .unwrap();
            assert_eq!(session, 1);
        }
        assert_eq!(hook.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_hook_runs_again_after_reconnect() {
        let cluster = cluster(ClusterPolicy::Single, &["mem://a"]);
        cluster.open().await.unwrap();
        let hook = CountingHook(AtomicUsize::new(0));

        let conn = cluster
            .invoke(&hook, |conn, _session| async move { Ok(conn) })
            .await
            .unwrap();
        conn.close("test").await;

        cluster
            .invoke(&hook, |conn, session| async move {
                conn.send(session, Message::request("Echo", Vec::new())).await
            })
            .await
            .unwrap();
        assert_eq!(hook.0.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_invoke_blocking_from_blocking_thread() {
        let cluster = Arc::new(cluster(ClusterPolicy::Single, &["mem://a"]));
        cluster.open().await.unwrap();
        let hook = Arc::new(CountingHook(AtomicUsize::new(0)));

        let worker_cluster = Arc::clone(&cluster);
        let worker_hook = Arc::clone(&hook);
        let endpoint = tokio::task::spawn_blocking(move || {
            worker_cluster.invoke_blocking(worker_hook.as_ref(), |conn, session| async move {
                conn.send(session, Message::request("Echo", Vec::new())).await?;
                Ok::<_, RemotingError>(conn.endpoint().to_string())
            })
        })
        .await
        .unwrap()
        .unwrap();

        assert_eq!(endpoint, "mem://a");
        assert_eq!(hook.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invoke_blocking_rejected_on_current_thread_runtime() {
        let cluster = cluster(ClusterPolicy::Single, &["mem://a"]);
        cluster.open().await.unwrap();

        let err = cluster
            .invoke_blocking(&NoSessionHook, |_conn, _session| async { Ok(()) })
            .unwrap_err();
        assert!(matches!(err, RemotingError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_single_rotates_endpoint_after_network_failure() {
        let cluster = cluster(ClusterPolicy::Single, &["mem://fail", "mem://ok"]);
        cluster.open().await.unwrap();

        let send = |conn: Arc<Connection>, session: u64| async move {
            conn.send(session, Message::request("Echo", Vec::new())).await?;
            Ok::<_, RemotingError>(conn.endpoint().to_string())
        };

        let err = cluster.invoke(&NoSessionHook, send).await.unwrap_err();
        assert!(err.is_network());

        let endpoint = cluster.invoke(&NoSessionHook, send).await.unwrap();
        assert_eq!(endpoint, "mem://ok");
        assert_eq!(cluster.connections_created(), 2);
    }

    #[tokio::test]
    async fn test_pool_spreads_connections_over_endpoints() {
        let cluster = Arc::new(cluster(ClusterPolicy::pool(2), &["mem://a", "mem://b"]));
        cluster.open().await.unwrap();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let barrier = Arc::new(tokio::sync::Barrier::new(2));

        let tasks: Vec<_> = (0..2)
            .map(|_| {
                let cluster = Arc::clone(&cluster);
                let barrier = Arc::clone(&barrier);
                let tx = tx.clone();
                tokio::spawn(async move {
                    cluster
                        .invoke(&NoSessionHook, |conn, _session| async move {
                            // Hold both connections at once
                            barrier.wait().await;
                            let _ = tx.send(conn.endpoint().to_string());
                            Ok(())
                        })
                        .await
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }
        drop(tx);

        let mut seen = Vec::new();
        while let Some(endpoint) = rx.recv().await {
            seen.push(endpoint);
        }
        seen.sort();
        assert_eq!(seen, vec!["mem://a", "mem://b"]);
    }

    #[tokio::test]
    async fn test_pool_returns_connection_after_failed_work() {
        let cluster = cluster(
            ClusterPolicy::Pool(PoolConfig {
                max_size: 1,
                acquire_timeout_ms: 100,
            }),
            &["mem://a"],
        );
        cluster.open().await.unwrap();

        for _ in 0..3 {
            let err = cluster
                .invoke(&NoSessionHook, |_conn, _session| async {
                    Err::<(), _>(RemotingError::Decode("bad".to_string()))
                })
                .await
                .unwrap_err();
            assert!(matches!(err, RemotingError::Decode(_)));
        }

        let stats = cluster.pool_stats().unwrap();
        assert_eq!(stats.in_use, 0);
        assert_eq!(stats.created, 1);
        cluster
            .invoke(&NoSessionHook, |_conn, _session| async { Ok(()) })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_close_and_reopen() {
        let cluster = cluster(ClusterPolicy::Single, &["mem://a"]);
        cluster.open().await.unwrap();
        cluster.close("test").await;
        assert!(!cluster.is_active());

        cluster.open().await.unwrap();
        cluster
            .invoke(&NoSessionHook, |_conn, _session| async { Ok(()) })
            .await
            .unwrap();
        assert_eq!(cluster.connections_created(), 2);
    }

    #[tokio::test]
    async fn test_unknown_scheme_fails_open() {
        let cluster = cluster(ClusterPolicy::Single, &["quic://a"]);
        let err = cluster.open().await.unwrap_err();
        assert!(matches!(err, RemotingError::Configuration(_)));
    }
}
