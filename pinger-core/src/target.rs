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

//! The `Target` data model: a single host this process repeatedly probes.

use std::fmt;
use std::net::IpAddr;

/// Address family of a resolved target or a socket endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family {
    V4,
    V6,
}

impl Family {
    /// The family of a concrete address.
    pub fn of(ip: IpAddr) -> Self {
        match ip {
            IpAddr::V4(_) => Family::V4,
            IpAddr::V6(_) => Family::V6,
        }
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Family::V4 => "ipv4",
            Family::V6 => "ipv6",
        })
    }
}

/// A bitmask of which address families a socket should attempt to open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportMask {
    pub v4: bool,
    pub v6: bool,
}

impl TransportMask {
    pub fn both() -> Self {
        Self { v4: true, v6: true }
    }

    pub fn v4_only() -> Self {
        Self { v4: true, v6: false }
    }

    pub fn v6_only() -> Self {
        Self { v4: false, v6: true }
    }
}

impl Default for TransportMask {
    fn default() -> Self {
        Self::both()
    }
}

/// A single host that the system repeatedly probes.
///
/// Resolution happens once, at startup; the resolved `ip` is fixed for the
/// lifetime of the process. Owned exclusively by the coordinator (C3) and
/// referenced by the pinger (C2) and the receiver's demultiplex index.
#[derive(Debug, Clone)]
pub struct Target {
    /// Human label. Defaults to `host` when the caller supplies none.
    pub display_name: String,
    /// Original hostname or literal address, as configured.
    pub host: String,
    /// The resolved address.
    pub ip: IpAddr,
    /// Family of `ip`, cached so callers don't need to re-derive it.
    pub family: Family,
}

impl Target {
    pub fn new(host: impl Into<String>, display_name: Option<String>, ip: IpAddr) -> Self {
        let host = host.into();
        let display_name = display_name
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| host.clone());
        Self {
            display_name,
            host,
            ip,
            family: Family::of(ip),
        }
    }
}
