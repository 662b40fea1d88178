use async_trait::async_trait;
use remoting_common::Result;
use std::sync::Weak;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// What the heartbeat loop reports on and pings through.
#[async_trait]
pub(crate) trait HeartbeatTarget: Send + Sync {
    /// Current one-line stats summary, `None` when there is nothing to report.
    fn stats_line(&self) -> Option<String>;

    async fn ping(&self) -> Result<()>;
}

/// Suppresses stats lines identical to the previous one.
#[derive(Debug, Default)]
pub(crate) struct StatsReporter {
    last: Option<String>,
}

impl StatsReporter {
    pub fn next(&mut self, line: Option<String>) -> Option<String> {
        let line = line?;
        if self.last.as_deref() == Some(line.as_str()) {
            return None;
        }
        self.last = Some(line.clone());
        Some(line)
    }
}

/// Periodic stats and keep-alive loop of an open client.
///
/// Holds the client weakly; the loop ends on its own once the client is gone,
/// and `close` aborts it earlier.
pub(crate) struct Heartbeat {
    target: Weak<dyn HeartbeatTarget>,
    interval: Duration,
    ping: bool,
}

impl Heartbeat {
    pub fn new(target: Weak<dyn HeartbeatTarget>, interval: Duration, ping: bool) -> Self {
        Self {
            target,
            interval,
            ping,
        }
    }

    /// Starts the heartbeat task.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(self) {
        let mut interval = tokio::time::interval(self.interval);
        let mut reporter = StatsReporter::default();

        // The first tick completes immediately
        interval.tick().await;

        loop {
            interval.tick().await;
            let Some(target) = self.target.upgrade() else {
                debug!("Client dropped, stopping heartbeat");
                break;
            };

            if let Some(line) = reporter.next(target.stats_line()) {
                info!(stats = %line, "Client stats");
            }

            if self.ping {
                if let Err(e) = target.ping().await {
                    warn!(error = %e, "Heartbeat ping failed");
                }
            }
        }
    }
}
