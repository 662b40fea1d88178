use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::debug;

use super::codec::{MessageCodec, MAX_MESSAGE_SIZE};
use super::socket::{SocketClient, TransportCounters, TransportStats};
use crate::protocol::error::{RemotingError, Result};
use crate::protocol::Message;

/// Default timeout for TCP operations (15 seconds)
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// TCP socket client.
///
/// Holds one keep-alive TCP stream to a single endpoint and exchanges framed
/// envelopes over it. Calls through the same client are serialized on the
/// stream, so overlapping callers observe head-of-line blocking; use a pool of
/// clients for concurrency.
///
/// # Wire Protocol
///
/// Messages are sent with a 4-byte length prefix (big-endian u32) followed
/// by the encoded envelope:
///
/// ```text
/// [4-byte length] [JSON envelope]
/// ```
///
/// # Broken Sessions
///
/// The stream is taken out of its slot for the duration of an exchange and
/// only put back when the exchange completes. A failed, timed-out or cancelled
/// exchange drops the stream and marks the session dead. Sends then fail until
/// the next [`open`](SocketClient::open) connects a new session with a new id.
///
/// # Example
///
/// ```no_run
/// use remoting_common::{Message, SocketClient, TcpSocketClient};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let client = TcpSocketClient::new("127.0.0.1:8080");
/// let session = client.open().await?;
///
/// let request = Message::request("Echo", b"{\"x\":1}".to_vec());
/// let reply = client.send_message(session, request).await?;
/// # Ok(())
/// # }
/// ```
pub struct TcpSocketClient {
    addr: String,
    stream: Mutex<Option<TcpStream>>,
    session: AtomicU64,
    live: AtomicBool,
    timeout_ms: AtomicU64,
    codec: RwLock<MessageCodec>,
    counters: RwLock<TransportCounters>,
    stats: TransportStats,
}

impl TcpSocketClient {
    /// Creates a client for `addr` (`host:port`). No connection is made yet.
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            stream: Mutex::new(None),
            session: AtomicU64::new(0),
            live: AtomicBool::new(false),
            timeout_ms: AtomicU64::new(DEFAULT_TIMEOUT.as_millis() as u64),
            codec: RwLock::new(MessageCodec::default()),
            counters: RwLock::new(TransportCounters::default()),
            stats: TransportStats::default(),
        }
    }

    /// Id of the current physical session, 0 before the first connect.
    pub fn session(&self) -> u64 {
        self.session.load(Ordering::Acquire)
    }

    /// Resolves the address and connects to the first reachable socket address.
    async fn connect(&self) -> Result<TcpStream> {
        let timeout = self.timeout();

        let socket_addrs = tokio::time::timeout(timeout, tokio::net::lookup_host(&self.addr))
            .await
            .map_err(|_| {
                RemotingError::Connection(format!("Timed out resolving '{}'", self.addr))
            })?
            .map_err(|e| {
                RemotingError::Connection(format!("Invalid address '{}': {}", self.addr, e))
            })?;

        // Try each resolved address until one succeeds
        let mut last_err = None;
        for socket_addr in socket_addrs {
            match tokio::time::timeout(timeout, TcpStream::connect(socket_addr)).await {
                Ok(Ok(stream)) => {
                    let _ = stream.set_nodelay(true);
                    return Ok(stream);
                }
                Ok(Err(e)) => last_err = Some(e.to_string()),
                Err(_) => {
                    last_err = Some(format!("connect timed out after {}ms", timeout.as_millis()))
                }
            }
        }

        Err(RemotingError::Connection(format!(
            "Failed to connect to {}: {}",
            self.addr,
            last_err.unwrap_or_else(|| "no addresses resolved".to_string())
        )))
    }

    /// Connects and records a new session.
    async fn start_session(&self) -> Result<TcpStream> {
        let stream = self.connect().await?;
        let session = self.session.fetch_add(1, Ordering::AcqRel) + 1;
        self.live.store(true, Ordering::Release);
        debug!(addr = %self.addr, session, "Opened new session");
        Ok(stream)
    }

    fn codec(&self) -> MessageCodec {
        *self.codec.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn counters(&self) -> TransportCounters {
        self.counters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Writes one encoded message and reads its reply.
    async fn exchange(
        &self,
        stream: &mut TcpStream,
        message: &Message,
        data: &[u8],
    ) -> Result<Option<Message>> {
        let codec = self.codec();
        let counters = self.counters();

        let started = Instant::now();
        write_frame(stream, data)
            .await
            .map_err(|e| Self::map_io_error(e, &message.action, self.timeout(), "writing frame"))?;
        self.stats.record_sent(data.len() + 4);
        if let Some(counter) = &counters.send {
            counter.stop_count(started);
        }

        if !message.expects_reply() {
            return Ok(None);
        }

        let started = Instant::now();
        let frame = read_frame(stream)
            .await
            .map_err(|e| Self::map_io_error(e, &message.action, self.timeout(), "reading frame"))?;
        self.stats.record_received(frame.len() + 4);
        if let Some(counter) = &counters.receive {
            counter.stop_count(started);
        }

        let reply = codec.decode(&frame)?;
        if reply.id != message.id {
            return Err(RemotingError::Decode(format!(
                "Reply id {} does not match request id {} for '{}'",
                reply.id, message.id, message.action
            )));
        }

        Ok(Some(reply))
    }

    /// Map IO errors to appropriate RemotingError variants
    ///
    /// - Timeouts/would block -> `Timeout`
    /// - Connection errors and early EOF -> `Connection`
    /// - Other IO errors -> `Io`
    fn map_io_error(err: std::io::Error, action: &str, timeout: Duration, context: &str) -> RemotingError {
        match err.kind() {
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => RemotingError::Timeout {
                action: action.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            },
            std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::NotConnected
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::UnexpectedEof => {
                RemotingError::Connection(format!("{}: Connection lost", context))
            }
            _ => RemotingError::from(err),
        }
    }
}

#[async_trait]
impl SocketClient for TcpSocketClient {
    fn remote(&self) -> &str {
        &self.addr
    }

    async fn open(&self) -> Result<u64> {
        let mut slot = self.stream.lock().await;
        if slot.is_none() {
            *slot = Some(self.start_session().await?);
        }
        Ok(self.session())
    }

    fn current_session(&self) -> u64 {
        if self.live.load(Ordering::Acquire) {
            self.session()
        } else {
            0
        }
    }

    async fn send_message(&self, session: u64, message: Message) -> Result<Option<Message>> {
        let data = self.codec().encode(&message)?;
        if data.len() > MAX_MESSAGE_SIZE {
            return Err(RemotingError::Encode(format!(
                "Message '{}' too large: {} bytes (max {} bytes)",
                message.action,
                data.len(),
                MAX_MESSAGE_SIZE
            )));
        }

        let timeout = self.timeout();
        let mut slot = self.stream.lock().await;

        let mut stream = match slot.take() {
            Some(stream) if self.session() == session => stream,
            other => {
                *slot = other;
                return Err(RemotingError::Connection(format!(
                    "Session {} to {} is not live",
                    session, self.addr
                )));
            }
        };

        let guard = LiveGuard::new(&self.live);
        let outcome = tokio::time::timeout(timeout, self.exchange(&mut stream, &message, &data)).await;
        match outcome {
            Ok(Ok(reply)) => {
                *slot = Some(stream);
                guard.disarm();
                Ok(reply)
            }
            Ok(Err(e)) => {
                debug!(addr = %self.addr, action = %message.action, error = %e, "Dropping session after failed exchange");
                Err(e)
            }
            Err(_) => {
                debug!(addr = %self.addr, action = %message.action, "Dropping session after timeout");
                Err(RemotingError::Timeout {
                    action: message.action.clone(),
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    async fn close(&self, reason: &str) {
        let mut slot = self.stream.lock().await;
        if let Some(mut stream) = slot.take() {
            self.live.store(false, Ordering::Release);
            let _ = stream.shutdown().await;
            debug!(addr = %self.addr, reason, "Closed session");
        }
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.load(Ordering::Relaxed))
    }

    fn set_timeout(&self, timeout: Duration) {
        self.timeout_ms
            .store(timeout.as_millis() as u64, Ordering::Relaxed);
    }

    fn set_codec(&self, codec: MessageCodec) {
        *self.codec.write().unwrap_or_else(PoisonError::into_inner) = codec;
    }

    fn set_counters(&self, counters: TransportCounters) {
        *self.counters.write().unwrap_or_else(PoisonError::into_inner) = counters;
    }

    fn stats(&self) -> &TransportStats {
        &self.stats
    }
}

/// Clears the live flag when an exchange ends without handing its stream back,
/// including when the calling future is dropped mid-exchange.
struct LiveGuard<'a> {
    live: &'a AtomicBool,
    armed: bool,
}

impl<'a> LiveGuard<'a> {
    fn new(live: &'a AtomicBool) -> Self {
        Self { live, armed: true }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for LiveGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.live.store(false, Ordering::Release);
        }
    }
}

/// Writes a frame with length prefix.
///
/// Wire format: `[4-byte length as u32 big-endian] + [data]`. Bodies larger
/// than [`MAX_MESSAGE_SIZE`] are rejected before anything is written.
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, data: &[u8]) -> std::io::Result<()> {
    if data.len() > MAX_MESSAGE_SIZE {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("Message too large: {} bytes (max {} bytes)", data.len(), MAX_MESSAGE_SIZE),
        ));
    }

    let len = data.len() as u32;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(data).await?;
    writer.flush().await
}

/// Reads a frame with length prefix.
///
/// Frames larger than [`MAX_MESSAGE_SIZE`] are rejected before allocating.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> std::io::Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_MESSAGE_SIZE {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("Message too large: {} bytes (max {} bytes)", len, MAX_MESSAGE_SIZE),
        ));
    }

    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    Ok(buf)
}
