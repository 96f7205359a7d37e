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

//! Target Pinger (component C2): one per target. Drives the send cadence,
//! matches replies against outstanding sends, ages out losses, and folds
//! everything into that target's `Statistics`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::socket::{self, IcmpSocket, Response};
use crate::stats::Statistics;
use crate::target::Target;

/// Tuning knobs for one target's send/timeout cadence.
#[derive(Debug, Clone, Copy)]
pub struct PingerConfig {
    /// How often an Echo Request is sent. Default 1s.
    pub interval: Duration,
    /// How long an unmatched send waits before counting as lost. Default 5s.
    pub timeout: Duration,
    /// Payload length in bytes.
    pub payload_size: usize,
    /// IP-layer hop limit; `0` leaves the socket's default untouched.
    pub ttl: u8,
}

impl Default for PingerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            timeout: Duration::from_secs(5),
            payload_size: 56,
            ttl: 64,
        }
    }
}

/// The receiving half of a target's depth-1 reply queue. The coordinator
/// holds the paired `watch::Sender` and overwrites it on every inbound
/// reply; a slow pinger therefore only ever sees the latest undelivered
/// reply, never an unbounded backlog.
pub type ReplyReceiver = watch::Receiver<Option<Response>>;

/// Drives one target's ping loop until `cancel` fires.
pub struct TargetPinger {
    target: Target,
    socket: Arc<IcmpSocket>,
    stats: Arc<Statistics>,
    config: PingerConfig,
    reply_rx: ReplyReceiver,
    next_sequence: u16,
    outstanding: HashMap<u16, Instant>,
}

impl TargetPinger {
    pub fn new(
        target: Target,
        socket: Arc<IcmpSocket>,
        stats: Arc<Statistics>,
        config: PingerConfig,
        reply_rx: ReplyReceiver,
    ) -> Self {
        Self {
            target,
            socket,
            stats,
            config,
            reply_rx,
            next_sequence: 0,
            outstanding: HashMap::new(),
        }
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    /// Run until cancellation. Shutdown is cooperative: the loop only exits
    /// between iterations, never mid-send.
    pub async fn run(mut self, cancel: CancellationToken) {
        // Stagger the first send across targets so a large target list
        // doesn't put every echo request on the wire in the same instant.
        let jitter = rand::thread_rng().gen_range(0..self.config.interval.as_millis().max(1) as u64);
        tokio::time::sleep(Duration::from_millis(jitter)).await;

        let mut send_tick = tokio::time::interval(self.config.interval);
        let mut timeout_tick = tokio::time::interval(self.config.timeout);
        send_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        timeout_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        let payload = vec![0u8; self.config.payload_size];

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    log::debug!("{}: pinger stopping", self.target.display_name);
                    return;
                }
                _ = send_tick.tick() => {
                    self.send(&payload).await;
                }
                _ = timeout_tick.tick() => {
                    self.age_out_losses();
                }
                changed = self.reply_rx.changed() => {
                    if changed.is_err() {
                        // Coordinator dropped the sender: socket is gone.
                        continue;
                    }
                    let reply = self.reply_rx.borrow_and_update().clone();
                    if let Some(resp) = reply {
                        self.handle_reply(resp);
                    }
                }
            }
        }
    }

    async fn send(&mut self, payload: &[u8]) {
        let seq = self.next_sequence;
        self.next_sequence = self.next_sequence.wrapping_add(1);

        match self
            .socket
            .ping(self.target.ip, seq, self.config.ttl, payload)
            .await
        {
            Ok(()) => {
                self.outstanding.insert(seq, Instant::now());
            }
            Err(e) => {
                log::warn!("{}: failed to send echo request: {e}", self.target.display_name);
            }
        }
    }

    fn handle_reply(&mut self, resp: Response) {
        if socket::is_timeout(&resp) {
            return;
        }
        let Some(seq) = resp.sequence else {
            return;
        };
        let Some(sent_at) = self.outstanding.remove(&seq) else {
            // Late, duplicate, or already timed out: drop silently.
            return;
        };
        let latency = resp.received_at.saturating_duration_since(sent_at);
        self.stats.record_received(latency);
    }

    fn age_out_losses(&mut self) {
        let now = Instant::now();
        let timeout = self.config.timeout;
        let expired: Vec<u16> = self
            .outstanding
            .iter()
            .filter(|(_, sent_at)| now.duration_since(**sent_at) > timeout)
            .map(|(seq, _)| *seq)
            .collect();

        for seq in expired {
            self.outstanding.remove(&seq);
            self.stats.record_lost();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::Family;
    use std::net::IpAddr;

    fn make_target() -> Target {
        Target::new("127.0.0.1", None, IpAddr::from([127, 0, 0, 1]))
    }

    #[test]
    fn display_name_defaults_to_host() {
        let t = make_target();
        assert_eq!(t.display_name, "127.0.0.1");
        assert_eq!(t.family, Family::V4);
    }

    // Exercises age-out bookkeeping directly, without a live socket: builds
    // a TargetPinger-shaped outstanding map and checks the invariant that a
    // reply for an unknown sequence changes nothing.
    #[test]
    fn unknown_sequence_reply_changes_no_counter() {
        let stats = Arc::new(Statistics::new());
        let mut outstanding: HashMap<u16, Instant> = HashMap::new();
        outstanding.insert(5, Instant::now());

        // Simulate handle_reply's lookup-or-drop logic directly.
        let seq: u16 = 99;
        if outstanding.remove(&seq).is_none() {
            // dropped: no stats call
        } else {
            stats.record_received(Duration::ZERO);
        }
        assert_eq!(stats.snapshot(), crate::stats::Snapshot::default());
        assert!(outstanding.contains_key(&5));
    }

    #[test]
    fn sequence_wraps_at_u16_max() {
        let mut seq: u16 = 0xFFFE;
        seq = seq.wrapping_add(1);
        assert_eq!(seq, 0xFFFF);
        seq = seq.wrapping_add(1);
        assert_eq!(seq, 0x0000);
    }
}
