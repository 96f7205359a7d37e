// Copyright 2020 Google LLC
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

//! Statistics Aggregator (component C4): per-target counters behind a
//! single lock, exposed through a non-destructive snapshot and an optional
//! reset for gauge-style sampling.
//!
//! `sent` only ever advances together with or ahead of `received` because it
//! counts *resolved* sends (received or timed out), never "transmit
//! issued" — see spec discussion of the two competing definitions. That
//! makes `received <= sent` true by construction, not by a runtime check.

use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Default)]
struct Inner {
    sent: u64,
    received: u64,
    latency_sum: Duration,
}

/// A point-in-time read of one target's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub sent: u64,
    pub received: u64,
    pub latency_sum: Duration,
}

impl Snapshot {
    /// `1 - received/sent`, or `0` when there's nothing to divide by or the
    /// ratio would be nonsensical (shouldn't happen given the invariant,
    /// but a snapshot is a defensive read).
    pub fn loss_fraction(&self) -> f64 {
        if self.sent == 0 || self.received > self.sent {
            return 0.0;
        }
        1.0 - (self.received as f64 / self.sent as f64)
    }

    /// `latency_sum / received`, or zero when nothing has been received.
    pub fn mean_latency(&self) -> Duration {
        if self.received == 0 {
            Duration::ZERO
        } else {
            self.latency_sum / self.received as u32
        }
    }
}

/// Per-target counters, mutated under one lock. No cross-target lock is
/// ever needed because each target owns its own `Statistics`.
#[derive(Debug, Default)]
pub struct Statistics {
    inner: Mutex<Inner>,
}

impl Statistics {
    pub fn new() -> Self {
        Self::default()
    }

    /// A send was resolved by a matching reply: counts as both sent and
    /// received, with the measured round-trip latency folded in.
    pub fn record_received(&self, latency: Duration) {
        let mut inner = self.inner.lock().expect("statistics lock poisoned");
        inner.sent += 1;
        inner.received += 1;
        inner.latency_sum += latency;
    }

    /// A send was resolved by aging out: counts as sent, not received.
    pub fn record_lost(&self) {
        let mut inner = self.inner.lock().expect("statistics lock poisoned");
        inner.sent += 1;
    }

    /// Non-destructive read, safe to call on every scrape.
    pub fn snapshot(&self) -> Snapshot {
        let inner = self.inner.lock().expect("statistics lock poisoned");
        Snapshot {
            sent: inner.sent,
            received: inner.received,
            latency_sum: inner.latency_sum,
        }
    }

    /// Read-and-clear, for callers that want gauge-style sampling between
    /// scrapes instead of monotonic counters. A caller that wants monotonic
    /// counters simply never calls this.
    pub fn reset(&self) -> Snapshot {
        let mut inner = self.inner.lock().expect("statistics lock poisoned");
        let snap = Snapshot {
            sent: inner.sent,
            received: inner.received,
            latency_sum: inner.latency_sum,
        };
        *inner = Inner::default();
        snap
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn received_never_exceeds_sent() {
        let stats = Statistics::new();
        stats.record_received(Duration::from_millis(10));
        stats.record_lost();
        stats.record_received(Duration::from_millis(20));
        let snap = stats.snapshot();
        assert!(snap.received <= snap.sent);
        assert_eq!(snap.sent, 3);
        assert_eq!(snap.received, 2);
    }

    #[test]
    fn mean_latency_is_zero_until_first_reply() {
        let stats = Statistics::new();
        stats.record_lost();
        assert_eq!(stats.snapshot().mean_latency(), Duration::ZERO);
    }

    #[test]
    fn reset_clears_counters_and_returns_pre_reset_values() {
        let stats = Statistics::new();
        stats.record_received(Duration::from_millis(5));
        stats.record_lost();
        let before = stats.snapshot();
        let reset = stats.reset();
        assert_eq!(before, reset);
        assert_eq!(stats.snapshot(), Snapshot::default());
    }
}
