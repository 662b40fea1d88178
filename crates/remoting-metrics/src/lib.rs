//! Remoting Performance Counters
//!
//! This crate provides the lock-free counters the remoting client uses to track
//! invocations and transport traffic.
//!
//! # Architecture
//!
//! - [`Counter`]: monotonic count plus a timing accumulator, updated with atomic
//!   increments from any number of concurrent calls
//! - [`CounterSnapshot`]: serializable point-in-time view of a counter
//! - [`summary`]: formats a set of counters into the one-line report used by the
//!   client's stats loop
//!
//! # Usage Example
//!
//! ```rust
//! use remoting_metrics::Counter;
//!
//! let counter = Counter::new("Invoke");
//!
//! let started = counter.start_count();
//! // ... perform the call ...
//! let cost = counter.stop_count(started);
//!
//! assert_eq!(counter.count(), 1);
//! assert!(cost.as_micros() < 1_000_000);
//! ```
//!
//! # Thread Safety
//!
//! Reads never lock. Under concurrent writes a snapshot may observe a count and
//! a duration total from slightly different instants, so averages and rates are
//! approximate.

mod counter;
mod snapshot;

pub use counter::Counter;
pub use snapshot::{summary, CounterSnapshot};
