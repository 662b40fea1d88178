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

use serde::{Deserialize, Serialize};
use std::fmt;

/// Point-in-time view of a [`Counter`](crate::Counter).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CounterSnapshot {
    pub name: String,
    pub count: u64,
    pub average_us: u64,
    /// Units per second
    pub rate: f64,
}

impl fmt::Display for CounterSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: Total={} Speed={:.0}/s Cost={:.2}ms",
            self.name,
            self.count,
            self.rate,
            self.average_us as f64 / 1000.0
        )
    }
}

/// Formats snapshots into a single report line.
///
/// Counters that never recorded anything are left out. Returns `None` when
/// every counter is empty so callers can skip logging entirely.
pub fn summary(snapshots: &[CounterSnapshot]) -> Option<String> {
    let parts: Vec<String> = snapshots
        .iter()
        .filter(|s| s.count > 0)
        .map(|s| s.to_string())
        .collect();

    if parts.is_empty() {
        None
    } else {
        Some(parts.join(" | "))
    }
}
