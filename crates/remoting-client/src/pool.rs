use remoting_common::{RemotingError, Result};
use std::ops::Deref;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::config::PoolConfig;
use crate::connection::Connection;

/// Connection pool bounded by [`PoolConfig::max_size`].
///
/// A semaphore caps how many connections are checked out at once; the idle
/// list only ever holds connections nobody is using. Because a connection is
/// only created when a permit was granted and the idle list was empty, the
/// number of live connections never exceeds `max_size`.
///
/// # Architecture
///
/// - Permits are acquired with the configured acquire timeout
/// - Idle connections are reused LIFO (most recently used first)
/// - The guard returned by [`acquire`](Self::acquire) puts the connection back
///   on drop, on success and failure paths alike
///
/// # Example
///
/// ```rust,ignore
/// let pool = ConnectionPool::new(PoolConfig::default());
/// let conn = pool.acquire(|| make_connection()).await?;
/// let session = conn.open().await?;
/// conn.send(session, message).await?;
/// // `conn` goes back to the pool here
/// ```
pub struct ConnectionPool {
    config: PoolConfig,
    permits: Arc<Semaphore>,
    inner: Arc<Mutex<PoolInner>>,
}

struct PoolInner {
    idle: Vec<Arc<Connection>>,
    created: usize,
    closed: bool,
}

/// Point-in-time view of a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub created: usize,
    pub idle: usize,
    pub in_use: usize,
}

impl ConnectionPool {
    pub fn new(config: PoolConfig) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(config.max_size.max(1))),
            inner: Arc::new(Mutex::new(PoolInner {
                idle: Vec::new(),
                created: 0,
                closed: false,
            })),
            config,
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Checks out an idle connection, or creates one with `create` when none
    /// is idle.
    ///
    /// # Errors
    ///
    /// - `PoolTimeout` if no connection frees up within the acquire timeout
    /// - `Connection` if the pool was closed
    /// - Whatever `create` returns
    pub async fn acquire<F>(&self, create: F) -> Result<PooledConnection>
    where
        F: FnOnce() -> Result<Arc<Connection>>,
    {
        let timeout = Duration::from_millis(self.config.acquire_timeout_ms);
        let permit = tokio::time::timeout(timeout, Arc::clone(&self.permits).acquire_owned())
            .await
            .map_err(|_| RemotingError::PoolTimeout(self.config.acquire_timeout_ms))?
            .map_err(|_| RemotingError::Connection("Connection pool is closed".to_string()))?;

        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if inner.closed {
            return Err(RemotingError::Connection("Connection pool is closed".to_string()));
        }

        let conn = match inner.idle.pop() {
            Some(conn) => conn,
            None => {
                // `create` does no IO; sockets connect on first use
                let conn = create()?;
                inner.created += 1;
                tracing::debug!(id = conn.id(), endpoint = conn.endpoint(), "Created pooled connection");
                conn
            }
        };

        Ok(PooledConnection {
            conn,
            pool: Arc::clone(&self.inner),
            _permit: permit,
        })
    }

    pub fn stats(&self) -> PoolStats {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        PoolStats {
            created: inner.created,
            idle: inner.idle.len(),
            in_use: self.config.max_size.max(1) - self.permits.available_permits(),
        }
    }

    /// Closes the pool and hands back the idle connections for shutdown.
    ///
    /// Waiting acquirers fail; connections still checked out are dropped when
    /// their guards are released.
    pub fn close(&self) -> Vec<Arc<Connection>> {
        self.permits.close();
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.closed = true;
        std::mem::take(&mut inner.idle)
    }
}

/// A checked-out pool connection. Returns to the pool when dropped.
pub struct PooledConnection {
    conn: Arc<Connection>,
    pool: Arc<Mutex<PoolInner>>,
    _permit: OwnedSemaphorePermit,
}

impl PooledConnection {
    pub fn connection(&self) -> &Arc<Connection> {
        &self.conn
    }
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        self.connection()
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        // Runs before the permit field is dropped, so the next acquirer
        // finds this connection idle instead of creating a new one.
        let mut inner = self.pool.lock().unwrap_or_else(PoisonError::into_inner);
        if !inner.closed {
            inner.idle.push(Arc::clone(&self.conn));
        }
    }
}
