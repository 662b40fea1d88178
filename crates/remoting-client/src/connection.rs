use remoting_common::{Message, Result, SocketClient};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// One cluster member: a socket client plus its login bookkeeping.
///
/// A connection survives reconnects of its socket. Each reconnect yields a new
/// physical session id, and the connection remembers the latest session that
/// completed the login handshake so the cluster knows when to run it again.
pub struct Connection {
    id: u64,
    endpoint: String,
    client: Arc<dyn SocketClient>,
    logged_in_session: AtomicU64,
    logins: AtomicU64,
}

impl Connection {
    pub fn new(id: u64, endpoint: impl Into<String>, client: Arc<dyn SocketClient>) -> Self {
        Self {
            id,
            endpoint: endpoint.into(),
            client,
            logged_in_session: AtomicU64::new(0),
            logins: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// The configured endpoint string this connection was built from.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn client(&self) -> &Arc<dyn SocketClient> {
        &self.client
    }

    /// Ensures the socket has a live session and returns its id.
    pub async fn open(&self) -> Result<u64> {
        self.client.open().await
    }

    /// Sends on physical session `session`; refused once that session is gone.
    pub async fn send(&self, session: u64, message: Message) -> Result<Option<Message>> {
        self.client.send_message(session, message).await
    }

    pub async fn close(&self, reason: &str) {
        self.client.close(reason).await
    }

    /// Latest session id that completed login, 0 if none did.
    pub fn logged_in_session(&self) -> u64 {
        self.logged_in_session.load(Ordering::Acquire)
    }

    /// Number of successful logins on this connection.
    pub fn login_count(&self) -> u64 {
        self.logins.load(Ordering::Acquire)
    }

    pub(crate) fn mark_logged_in(&self, session: u64) {
        self.logged_in_session.fetch_max(session, Ordering::AcqRel);
        self.logins.fetch_add(1, Ordering::AcqRel);
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("endpoint", &self.endpoint)
            .field("logged_in_session", &self.logged_in_session())
            .finish()
    }
}
