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

//! Ping Coordinator (component C3): owns the socket and every target
//! pinger, runs the single receiver that demultiplexes replies by source
//! address, and coordinates shutdown.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::pinger::{PingerConfig, TargetPinger};
use crate::socket::{self, IcmpSocket};
use crate::stats::{Snapshot, Statistics};
use crate::target::{Target, TransportMask};

/// How long the receiver's `socket.receive()` call blocks before looping
/// around to check for cancellation. Bounds worst-case shutdown latency.
const RECEIVE_DEADLINE: Duration = Duration::from_secs(5);

/// A target as configured, before resolution.
#[derive(Debug, Clone)]
pub struct TargetSpec {
    pub host: String,
    pub display_name: Option<String>,
}

struct Handle {
    target: Target,
    stats: Arc<Statistics>,
    reply_tx: watch::Sender<Option<socket::Response>>,
}

/// Owns the socket and every target's pinger; runs a single demultiplexing
/// receiver task plus one task per target.
pub struct Coordinator {
    socket: Arc<IcmpSocket>,
    handles: Vec<Handle>,
    config: PingerConfig,
}

impl Coordinator {
    /// Open the socket and resolve every configured target. Targets that
    /// fail to resolve, or whose only addresses are in an unsupported
    /// family, are logged and skipped — they never appear in a snapshot.
    pub async fn build(
        specs: &[TargetSpec],
        mask: TransportMask,
        config: PingerConfig,
    ) -> Result<Self, crate::error::SocketError> {
        let socket = Arc::new(IcmpSocket::open(mask)?);
        let mut handles = Vec::with_capacity(specs.len());

        for spec in specs {
            match socket.resolve(&spec.host).await {
                Ok(ip) => {
                    let target = Target::new(spec.host.clone(), spec.display_name.clone(), ip);
                    let (reply_tx, _reply_rx) = watch::channel(None);
                    handles.push(Handle {
                        target,
                        stats: Arc::new(Statistics::new()),
                        reply_tx,
                    });
                }
                Err(e) => {
                    log::warn!("skipping target {}: {e}", spec.host);
                }
            }
        }

        Ok(Self {
            socket,
            handles,
            config,
        })
    }

    /// Snapshot of every resolved target's current statistics, keyed by
    /// display name. A target that never resolved is simply absent.
    pub fn snapshots(&self) -> Vec<(Target, Snapshot)> {
        self.handles
            .iter()
            .map(|h| (h.target.clone(), h.stats.snapshot()))
            .collect()
    }

    /// Like `snapshots()`, but reads each target's statistics via
    /// `Statistics::reset()` instead of `snapshot()`: the returned values are
    /// the counters accumulated since the previous call (or since start, on
    /// the first call), and every target's counters are zeroed as a side
    /// effect. For callers that fold these into their own monotonic
    /// counters on a fixed sampling cadence, never plain `snapshots()`.
    pub fn reset_snapshots(&self) -> Vec<(Target, Snapshot)> {
        self.handles
            .iter()
            .map(|h| (h.target.clone(), h.stats.reset()))
            .collect()
    }

    /// Run every target pinger plus the shared receiver until `cancel`
    /// fires, then join everything before returning. Takes `&self` so a
    /// caller holding an `Arc<Coordinator>` can read `snapshots()` from
    /// another task while this one runs.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut tasks = JoinSet::new();

        // Demultiplex index: source IP (textual form) -> every sender whose
        // target resolved to that address. More than one target can share
        // an IP; all of them get credited for each reply.
        let mut index: HashMap<String, Vec<watch::Sender<Option<socket::Response>>>> =
            HashMap::new();
        for handle in &self.handles {
            index
                .entry(handle.target.ip.to_string())
                .or_default()
                .push(handle.reply_tx.clone());
        }

        {
            let socket = self.socket.clone();
            let cancel = cancel.clone();
            tasks.spawn(async move {
                receiver_loop(socket, index, cancel).await;
            });
        }

        for handle in &self.handles {
            let reply_rx = handle.reply_tx.subscribe();
            let pinger = TargetPinger::new(
                handle.target.clone(),
                self.socket.clone(),
                handle.stats.clone(),
                self.config,
                reply_rx,
            );
            let cancel = cancel.clone();
            tasks.spawn(async move {
                pinger.run(cancel).await;
            });
        }

        while tasks.join_next().await.is_some() {}
    }
}

async fn receiver_loop(
    socket: Arc<IcmpSocket>,
    index: HashMap<String, Vec<watch::Sender<Option<socket::Response>>>>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                log::debug!("receiver stopping");
                return;
            }
            resp = socket.receive(RECEIVE_DEADLINE) => {
                if socket::is_timeout(&resp) {
                    continue;
                }
                match index.get(&resp.source_ip.to_string()) {
                    Some(senders) => {
                        for tx in senders {
                            // Overwrites any undelivered reply: the queue is
                            // depth-1 by design, so a slow target drops the
                            // older reply rather than stalling the receiver.
                            let _ = tx.send(Some(resp.clone()));
                        }
                    }
                    None => {
                        log::debug!("dropping reply from unrecognized source {}", resp.source_ip);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unresolvable_target_is_absent_from_build() {
        let specs = vec![TargetSpec {
            host: "not.a.valid.host.invalid".to_owned(),
            display_name: None,
        }];
        let coordinator =
            match Coordinator::build(&specs, TransportMask::both(), PingerConfig::default()).await {
                Ok(c) => c,
                Err(_) => return, // no CAP_NET_RAW / ping group in this environment
            };
        assert!(coordinator.snapshots().is_empty());
    }
}
