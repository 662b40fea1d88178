// Copyright 2025 Remoting Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::snapshot::CounterSnapshot;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Monotonic performance counter.
///
/// A `Counter` tracks how many units of work completed and how long they took
/// in total. All updates are lock-free atomic increments so the counter can be
/// shared through an `Arc` by every in-flight call.
///
/// Work is measured by bracketing it with [`start_count`](Self::start_count)
/// and [`stop_count`](Self::stop_count):
///
/// ```rust
/// use remoting_metrics::Counter;
///
/// let counter = Counter::new("Send");
/// let started = counter.start_count();
/// // ... send a message ...
/// counter.stop_count(started);
/// ```
///
/// Values that are not timed (for example byte totals) go through
/// [`increment`](Self::increment).
#[derive(Debug)]
pub struct Counter {
    name: String,
    count: AtomicU64,
    total_us: AtomicU64,
    created: Instant,
    /// Microseconds since `created` at which the current sampling window began
    window_start_us: AtomicU64,
    /// Value of `count` when the current sampling window began
    window_count: AtomicU64,
}

impl Counter {
    /// Creates an empty counter with a display name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            count: AtomicU64::new(0),
            total_us: AtomicU64::new(0),
            created: Instant::now(),
            window_start_us: AtomicU64::new(0),
            window_count: AtomicU64::new(0),
        }
    }

    /// Display name used in reports.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Begins measuring one unit of work.
    pub fn start_count(&self) -> Instant {
        Instant::now()
    }

    /// Finishes measuring one unit of work started with `start_count`.
    ///
    /// Returns the elapsed time so callers can act on it (slow-call logging).
    pub fn stop_count(&self, started: Instant) -> Duration {
        let elapsed = started.elapsed();
        self.increment(1, elapsed);
        elapsed
    }

    /// Adds `value` to the count and `cost` to the duration total.
    pub fn increment(&self, value: u64, cost: Duration) {
        self.count.fetch_add(value, Ordering::Relaxed);
        self.total_us
            .fetch_add(cost.as_micros() as u64, Ordering::Relaxed);
    }

    /// Total units recorded.
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Accumulated duration of all recorded work.
    pub fn total(&self) -> Duration {
        Duration::from_micros(self.total_us.load(Ordering::Relaxed))
    }

    /// Average duration per unit in microseconds, 0 when nothing was recorded.
    pub fn average_us(&self) -> u64 {
        let count = self.count();
        if count == 0 {
            return 0;
        }
        self.total_us.load(Ordering::Relaxed) / count
    }

    /// Takes a snapshot whose rate covers the counter's whole lifetime.
    pub fn snapshot(&self) -> CounterSnapshot {
        let count = self.count();
        let elapsed = self.created.elapsed().as_secs_f64();
        let rate = if elapsed > 0.0 {
            count as f64 / elapsed
        } else {
            0.0
        };
        CounterSnapshot {
            name: self.name.clone(),
            count,
            average_us: self.average_us(),
            rate,
        }
    }

    /// Takes a snapshot whose rate covers the time since the previous `sample`
    /// call, then starts a new sampling window.
    ///
    /// Concurrent samplers may split a window between them; each still gets a
    /// sensible rate for the span it observed.
    pub fn sample(&self) -> CounterSnapshot {
        let count = self.count();
        let now_us = self.created.elapsed().as_micros() as u64;

        let window_start = self.window_start_us.swap(now_us, Ordering::AcqRel);
        let window_count = self.window_count.swap(count, Ordering::AcqRel);

        let span_us = now_us.saturating_sub(window_start);
        let rate = if span_us > 0 {
            count.saturating_sub(window_count) as f64 * 1_000_000.0 / span_us as f64
        } else {
            0.0
        };

        CounterSnapshot {
            name: self.name.clone(),
            count,
            average_us: self.average_us(),
            rate,
        }
    }
}
