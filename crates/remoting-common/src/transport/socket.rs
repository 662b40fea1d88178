use async_trait::async_trait;
use remoting_metrics::Counter;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::codec::MessageCodec;
use crate::protocol::error::Result;
use crate::protocol::Message;

/// Shared counters a socket client reports its sends and receives to.
#[derive(Debug, Clone, Default)]
pub struct TransportCounters {
    pub send: Option<Arc<Counter>>,
    pub receive: Option<Arc<Counter>>,
}

/// Raw byte totals of one socket client.
#[derive(Debug, Default)]
pub struct TransportStats {
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
}

impl TransportStats {
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::Relaxed)
    }

    pub fn record_sent(&self, bytes: usize) {
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_received(&self, bytes: usize) {
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }
}

/// One live connection to one endpoint.
///
/// A socket client owns at most one physical session at a time. Every time it
/// establishes a new one (first connect or reconnect after a drop) the session
/// id returned by [`open`](Self::open) changes; that change is the "opened"
/// notification the cluster uses to run the login handshake for the
/// connection.
///
/// A socket client never reconnects on its own: a broken session stays gone
/// until the next [`open`](Self::open), so whoever opens it gets the chance to
/// initialize the new session before anything else is sent on it.
#[async_trait]
pub trait SocketClient: Send + Sync {
    /// Endpoint address this client talks to.
    fn remote(&self) -> &str;

    /// Ensures a physical session exists and returns its id.
    ///
    /// Ids start at 1 and grow by one per new session.
    async fn open(&self) -> Result<u64>;

    /// Id of the live session without waiting on in-flight calls, 0 when
    /// there is none.
    fn current_session(&self) -> u64;

    /// Sends a message on physical session `session` and, unless it is
    /// one-way, waits for the reply.
    ///
    /// Fails with `Connection` without sending anything when `session` is not
    /// the live session.
    async fn send_message(&self, session: u64, message: Message) -> Result<Option<Message>>;

    /// Tears down the current physical session.
    async fn close(&self, reason: &str);

    fn timeout(&self) -> Duration;

    fn set_timeout(&self, timeout: Duration);

    fn set_codec(&self, codec: MessageCodec);

    fn set_counters(&self, counters: TransportCounters);

    fn stats(&self) -> &TransportStats;
}
