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

//! Error taxonomy for the ICMP socket and ping engine.
//!
//! Every variant here corresponds to one row of the error policy table: what
//! is fatal at startup, what gets logged and skipped, and what never leaves
//! the socket's own read loop.

use std::net::IpAddr;

use crate::target::Family;

/// Errors raised while opening or operating the ICMP socket (component C1).
#[derive(Debug, thiserror::Error)]
pub enum SocketError {
    /// Neither IPv4 nor IPv6 could be opened. Fatal at startup.
    #[error("no ICMP socket family could be opened (need CAP_NET_RAW or a ping-group match)")]
    SocketUnavailable,

    /// `host` resolved to at least one address, but none in a family this
    /// socket has open.
    #[error("{host} has no address in a family supported by this socket")]
    NoSupportedAddress {
        /// The hostname or literal address that was requested.
        host: String,
    },

    /// DNS resolution itself failed.
    #[error("failed to resolve {host}: {source}")]
    ResolutionFailed {
        /// The hostname that failed to resolve.
        host: String,
        #[source]
        source: std::io::Error,
    },

    /// `ping` was asked to send to a family this socket never opened.
    #[error("family {0} is not open on this socket")]
    FamilyUnsupported(Family),

    /// The kernel rejected the send call.
    #[error("failed to transmit echo request to {addr}: {source}")]
    TransmitFailed {
        /// Destination address of the failed send.
        addr: IpAddr,
        #[source]
        source: std::io::Error,
    },
}
