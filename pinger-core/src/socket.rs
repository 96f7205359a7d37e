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

//! ICMP Socket (component C1): one non-privileged "ping" endpoint per live
//! address family, a wire-format encoder/decoder, and a pull-style
//! `receive()` fed by a background reader per family.
//!
//! Identifier policy: containerized environments and some NAT middleboxes
//! rewrite the ICMP identifier field on unprivileged sockets. This is a
//! known, accepted limitation of the "ping socket" (`SOCK_DGRAM`) approach,
//! so replies are matched on `{source address, sequence number}` alone —
//! never on identifier.

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use socket2::{Domain, Protocol, SockAddr, Socket as RawSocket, Type as SockType};
use tokio::net::UdpSocket;
use tokio::sync::Mutex;
use tokio::time::timeout;

use crate::error::SocketError;
use crate::target::{Family, TransportMask};
use crate::wire::{self, MessageKind};

/// A single parsed inbound ICMP message, timestamped at the moment it was
/// read off the wire.
#[derive(Debug, Clone)]
pub struct Response {
    pub source_ip: IpAddr,
    pub message_type: MessageKind,
    pub sequence: Option<u16>,
    pub received_at: Instant,
}

const DEFAULT_PAYLOAD_LEN: usize = 56;

struct Endpoint {
    io: Arc<UdpSocket>,
    /// Kept so TTL/hop-limit can be changed per-send without tearing down
    /// the async socket; shares the same underlying file descriptor.
    control: RawSocket,
}

/// Opens one endpoint per enabled family and serves incoming ICMP messages
/// into an internal queue that `receive()` drains.
pub struct IcmpSocket {
    v4: Option<Endpoint>,
    v6: Option<Endpoint>,
    queue_rx: Mutex<tokio::sync::mpsc::UnboundedReceiver<Response>>,
    _readers: Vec<tokio::task::JoinHandle<()>>,
}

impl IcmpSocket {
    /// Open endpoints for every family requested in `mask`. Succeeds as long
    /// as at least one family opens; fails with `SocketUnavailable` if none
    /// do (e.g. no `CAP_NET_RAW` and no ping-group membership).
    pub fn open(mask: TransportMask) -> Result<Self, SocketError> {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let mut readers = Vec::new();

        let v4 = if mask.v4 {
            open_endpoint(Domain::IPV4, Protocol::ICMPV4)
                .map(|ep| {
                    readers.push(spawn_reader(ep.io.clone(), Family::V4, tx.clone()));
                    ep
                })
                .map_err(|e| log::warn!("failed to open ICMPv4 socket: {e}"))
                .ok()
        } else {
            None
        };

        let v6 = if mask.v6 {
            open_endpoint(Domain::IPV6, Protocol::ICMPV6)
                .map(|ep| {
                    readers.push(spawn_reader(ep.io.clone(), Family::V6, tx.clone()));
                    ep
                })
                .map_err(|e| log::warn!("failed to open ICMPv6 socket: {e}"))
                .ok()
        } else {
            None
        };

        if v4.is_none() && v6.is_none() {
            return Err(SocketError::SocketUnavailable);
        }

        Ok(Self {
            v4,
            v6,
            queue_rx: Mutex::new(rx),
            _readers: readers,
        })
    }

    /// Families this socket actually managed to open (may be a subset of
    /// what was requested).
    pub fn live_families(&self) -> TransportMask {
        TransportMask {
            v4: self.v4.is_some(),
            v6: self.v6.is_some(),
        }
    }

    /// Resolve `host` via the system resolver, returning the first address
    /// whose family is live on this socket.
    pub async fn resolve(&self, host: &str) -> Result<IpAddr, SocketError> {
        let lookup = format!("{host}:0");
        let addrs = tokio::net::lookup_host(&lookup)
            .await
            .map_err(|source| SocketError::ResolutionFailed {
                host: host.to_owned(),
                source,
            })?;

        for addr in addrs {
            let ip = addr.ip();
            let supported = match Family::of(ip) {
                Family::V4 => self.v4.is_some(),
                Family::V6 => self.v6.is_some(),
            };
            if supported {
                return Ok(ip);
            }
        }
        Err(SocketError::NoSupportedAddress {
            host: host.to_owned(),
        })
    }

    /// Send an Echo Request to `ip`. `ttl` of `0` leaves the socket's
    /// existing hop-limit untouched.
    pub async fn ping(
        &self,
        ip: IpAddr,
        sequence: u16,
        ttl: u8,
        payload: &[u8],
    ) -> Result<(), SocketError> {
        let family = Family::of(ip);
        let endpoint = match family {
            Family::V4 => self.v4.as_ref(),
            Family::V6 => self.v6.as_ref(),
        }
        .ok_or(SocketError::FamilyUnsupported(family))?;

        if ttl != 0 {
            let result = match family {
                Family::V4 => endpoint.control.set_ttl(ttl as u32),
                Family::V6 => endpoint.control.set_unicast_hops_v6(ttl as u32),
            };
            if let Err(e) = result {
                log::warn!("failed to set hop limit for {ip}: {e}");
            }
        }

        let identifier = process_identifier();
        let datagram = wire::encode_echo_request(family, identifier, sequence, payload);
        endpoint
            .io
            .send_to(&datagram, SocketAddr::new(ip, 0))
            .await
            .map(|_| ())
            .map_err(|source| SocketError::TransmitFailed { addr: ip, source })
    }

    /// Block until a parseable ICMP message arrives or `deadline` elapses.
    /// A timeout is not an error: it comes back as a `Response` carrying
    /// `MessageKind::Other(0xff)`-shaped benign marker so callers can loop
    /// without special-casing a distinct error type.
    pub async fn receive(&self, deadline: Duration) -> Response {
        let mut rx = self.queue_rx.lock().await;
        match timeout(deadline, rx.recv()).await {
            Ok(Some(resp)) => resp,
            Ok(None) | Err(_) => Response {
                source_ip: std::net::Ipv4Addr::UNSPECIFIED.into(),
                message_type: MessageKind::Other(TIMEOUT_MARKER),
                sequence: None,
                received_at: Instant::now(),
            },
        }
    }

    /// A sensible default payload: fixed length, content unused by matching.
    pub fn default_payload() -> Vec<u8> {
        vec![0u8; DEFAULT_PAYLOAD_LEN]
    }
}

/// Sentinel `MessageKind::Other` tag used to signal a `receive()` timeout.
/// Not a real ICMP type (those fit in 0..=255 but this value is unused by
/// both v4 and v6 echo-family messages we construct or accept).
const TIMEOUT_MARKER: u8 = 0xff;

/// True if a response came from `receive()` timing out rather than a real
/// wire message.
pub fn is_timeout(resp: &Response) -> bool {
    matches!(resp.message_type, MessageKind::Other(TIMEOUT_MARKER)) && resp.sequence.is_none()
}

fn open_endpoint(domain: Domain, protocol: Protocol) -> io::Result<Endpoint> {
    let socket = RawSocket::new(domain, SockType::DGRAM, Some(protocol))?;
    socket.set_nonblocking(true)?;
    let bind_addr: SocketAddr = match domain {
        Domain::IPV4 => (std::net::Ipv4Addr::UNSPECIFIED, 0).into(),
        _ => (std::net::Ipv6Addr::UNSPECIFIED, 0).into(),
    };
    socket.bind(&SockAddr::from(bind_addr))?;

    let control = socket.try_clone()?;
    let std_socket: std::net::UdpSocket = socket.into();
    let io = Arc::new(UdpSocket::from_std(std_socket)?);
    Ok(Endpoint { io, control })
}

fn spawn_reader(
    io: Arc<UdpSocket>,
    family: Family,
    tx: tokio::sync::mpsc::UnboundedSender<Response>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut buf = [0u8; 2048];
        loop {
            let (n, from) = match io.recv_from(&mut buf).await {
                Ok(v) => v,
                Err(e) => {
                    log::warn!("icmp read error ({family}): {e}");
                    continue;
                }
            };
            let received_at = Instant::now();
            match wire::decode(family, &buf[..n]) {
                Ok(msg) => {
                    let resp = Response {
                        source_ip: from.ip(),
                        message_type: msg.kind,
                        sequence: msg.sequence,
                        received_at,
                    };
                    if tx.send(resp).is_err() {
                        // Receiver side gone: socket is shutting down.
                        return;
                    }
                }
                Err(e) => log::debug!("dropping unparseable datagram from {from}: {e}"),
            }
        }
    })
}

/// A process-stable 16-bit value used as the Echo identifier. Unprivileged
/// sockets may have this rewritten by the kernel regardless (see module
/// docs), so it's informational rather than load-bearing.
fn process_identifier() -> u16 {
    (std::process::id() & 0xffff) as u16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn loopback_v4_round_trip() {
        let socket = match IcmpSocket::open(TransportMask::v4_only()) {
            Ok(s) => s,
            Err(_) => return, // no CAP_NET_RAW / ping group in this environment
        };
        let ip = "127.0.0.1".parse().unwrap();
        if socket.ping(ip, 1, 64, &IcmpSocket::default_payload()).await.is_err() {
            return;
        }
        let resp = socket.receive(Duration::from_secs(2)).await;
        if is_timeout(&resp) {
            return; // environment without ICMP loopback support; not a bug
        }
        assert_eq!(resp.source_ip, ip);
    }

    #[test]
    fn opening_nothing_is_unavailable() {
        let mask = TransportMask { v4: false, v6: false };
        let err = IcmpSocket::open(mask).unwrap_err();
        assert!(matches!(err, SocketError::SocketUnavailable));
    }
}
