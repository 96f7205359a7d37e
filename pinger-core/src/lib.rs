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

//! The ping engine: ICMP socket, per-target send/receive state machine, and
//! the statistics aggregator consumed by an exporter. This crate is the
//! core described in the system's design — process launch, configuration
//! parsing, and the HTTP scrape endpoint all live one layer up, in the
//! daemon binary.

pub mod coordinator;
pub mod error;
pub mod pinger;
pub mod socket;
pub mod stats;
pub mod target;
pub mod wire;

pub use coordinator::{Coordinator, TargetSpec};
pub use error::SocketError;
pub use pinger::PingerConfig;
pub use socket::{IcmpSocket, Response};
pub use stats::{Snapshot, Statistics};
pub use target::{Family, Target, TransportMask};
pub use wire::MessageKind;
