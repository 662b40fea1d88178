use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Ping request body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingRequest {
    /// Local send time in unix milliseconds
    pub time: i64,
}

/// Ping response body: the echoed send time and the server clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PingReply {
    pub time: i64,
    #[serde(default)]
    pub server_time: i64,
}

/// Smoothed round-trip delay and server clock offset.
///
/// The delay is an exponentially weighted moving average: the first sample is
/// taken as is, later ones are blended as `(old * 3 + sample) / 4`.
#[derive(Debug, Default)]
pub struct LatencyTracker {
    delay_ms: AtomicI64,
    offset_ms: AtomicI64,
    samples: AtomicU64,
}

impl LatencyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds a delay sample into the average and returns the new average.
    pub fn record_delay(&self, sample_ms: i64) -> i64 {
        self.samples.fetch_add(1, Ordering::Relaxed);
        let blend = |old: i64| if old == 0 { sample_ms } else { (old * 3 + sample_ms) / 4 };
        let previous = self
            .delay_ms
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |old| Some(blend(old)))
            .unwrap_or_else(|old| old);
        blend(previous)
    }

    pub fn record_server_time(&self, local_now_ms: i64, server_time_ms: i64) {
        self.offset_ms
            .store(local_now_ms - server_time_ms, Ordering::Release);
    }

    /// Applies a ping reply received at `now_ms` and returns the new delay.
    pub fn observe(&self, reply: &PingReply, now_ms: i64) -> i64 {
        let delay = self.record_delay((now_ms - reply.time).max(0));
        if reply.server_time > 0 {
            self.record_server_time(now_ms, reply.server_time);
        }
        delay
    }

    pub fn delay_ms(&self) -> i64 {
        self.delay_ms.load(Ordering::Acquire)
    }

    /// Local clock minus server clock.
    pub fn offset_ms(&self) -> i64 {
        self.offset_ms.load(Ordering::Acquire)
    }

    /// Estimated server clock at local time `local_now_ms`.
    pub fn server_time_ms(&self, local_now_ms: i64) -> i64 {
        local_now_ms - self.offset_ms()
    }

    pub fn samples(&self) -> u64 {
        self.samples.load(Ordering::Relaxed)
    }
}

/// Local clock in unix milliseconds.
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
