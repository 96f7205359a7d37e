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

mod config;
mod exporter;

use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use pinger_core::{Coordinator, PingerConfig, TransportMask};
use tokio_util::sync::CancellationToken;

/// Default Prometheus listener address.
const DEFAULT_ADDR: &str = "0.0.0.0:8080";

/// Pings a set of hosts and exports latency & packet loss as Prometheus
/// metrics.
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Opts {
    /// Hosts to ping. Ignored if the HOSTS environment variable is set.
    hosts: Vec<String>,

    /// YAML configuration file listing targets. Only consulted when neither
    /// HOSTS nor positional hosts are given.
    #[clap(short, long, env = "PINGER_CONFIG", default_value = "")]
    config: String,

    /// Log debug messages.
    #[clap(long, env = "PINGER_DEBUG")]
    debug: bool,

    /// Prometheus listener address.
    #[clap(long, env = "PINGER_ADDR", default_value = DEFAULT_ADDR)]
    addr: String,

    /// Ping IPv4 addresses.
    #[clap(long, env = "PINGER_IPV4", default_value_t = true)]
    ipv4: bool,

    /// Ping IPv6 addresses.
    #[clap(long, env = "PINGER_IPV6", default_value_t = true)]
    ipv6: bool,
}

fn init_logging(debug: bool) {
    let level = if debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

fn load_file_config(path: &str) -> config::FileConfig {
    if path.is_empty() {
        return config::FileConfig::default();
    }
    match config::FileConfig::from_filepath(path) {
        Ok(cfg) => cfg,
        Err(e) => {
            log::warn!("failed to read config file '{path}': {e}");
            config::FileConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let opts = Opts::parse();
    init_logging(opts.debug);

    let hosts_env = std::env::var("HOSTS").ok();
    let file_cfg = load_file_config(&opts.config);
    let specs = config::resolve_targets(hosts_env.as_deref(), &opts.hosts, Some(&file_cfg));

    if specs.is_empty() {
        log::error!("no targets configured: pass hostnames, set HOSTS, or provide --config");
        return ExitCode::from(2);
    }

    let mask = TransportMask {
        v4: opts.ipv4,
        v6: opts.ipv6,
    };

    let addr: SocketAddr = match opts.addr.parse() {
        Ok(a) => a,
        Err(e) => {
            log::error!("invalid listener address '{}': {e}", opts.addr);
            return ExitCode::from(2);
        }
    };

    let coordinator = match Coordinator::build(&specs, mask, PingerConfig::default()).await {
        Ok(c) => Arc::new(c),
        Err(e) => {
            log::error!("failed to start pinger: {e}");
            return ExitCode::from(1);
        }
    };

    let resolved: Vec<String> = coordinator
        .snapshots()
        .into_iter()
        .map(|(target, _)| target.display_name)
        .collect();
    log::info!("pinger started, targets={resolved:?}");

    let cancel = CancellationToken::new();

    let ping_task = {
        let coordinator = coordinator.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { coordinator.run(cancel).await })
    };
    let sample_task = {
        let coordinator = coordinator.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { exporter::sample_loop(coordinator, cancel).await })
    };
    let serve_task = {
        let cancel = cancel.clone();
        tokio::spawn(async move { exporter::serve(addr, cancel).await })
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            log::info!("received interrupt, shutting down");
        }
        res = ping_task => {
            if let Err(e) = res {
                log::error!("ping coordinator task panicked: {e}");
            }
        }
    }

    cancel.cancel();
    let _ = sample_task.await;
    if let Ok(Err(e)) = serve_task.await {
        log::error!("exporter server error: {e}");
    }

    log::info!("pinger stopped");
    ExitCode::SUCCESS
}
