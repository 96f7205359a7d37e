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

//! Prometheus exporter: the HTTP `/metrics` surface plus the periodic job
//! that folds each target's `Statistics` snapshot into the registered
//! counters and gauge.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{routing, Router};
use lazy_static::lazy_static;
use pinger_core::Coordinator;
use prometheus::{
    register_gauge_vec, register_int_counter_vec, Encoder, GaugeVec, IntCounterVec, TextEncoder,
};
use tokio_util::sync::CancellationToken;

lazy_static! {
    static ref PACKETS_SENT: IntCounterVec = register_int_counter_vec!(
        "pinger_packets_sent_count",
        "Total number of echo requests sent",
        &["host"]
    )
    .unwrap();
    static ref PACKETS_RECEIVED: IntCounterVec = register_int_counter_vec!(
        "pinger_packets_received_count",
        "Total number of echo replies received",
        &["host"]
    )
    .unwrap();
    static ref LATENCY_SECONDS: GaugeVec = register_gauge_vec!(
        "pinger_latency_seconds",
        "Mean measured round-trip latency over the most recent sampling window",
        &["host"]
    )
    .unwrap();
}

/// How often target snapshots are folded into the Prometheus metrics.
const SAMPLE_INTERVAL: Duration = Duration::from_secs(5);

/// Builds the `/metrics` router. Kept separate from `serve` so tests can
/// exercise routing without binding a socket.
pub fn router() -> Router {
    Router::new().route("/metrics", routing::get(metrics_handler))
}

async fn metrics_handler() -> Result<impl IntoResponse, std::convert::Infallible> {
    let encoder = TextEncoder::new();
    let mut buf = Vec::new();
    let families = prometheus::gather();
    let resp = Response::builder().header(header::CONTENT_TYPE, encoder.format_type());

    match encoder.encode(&families, &mut buf) {
        Ok(()) => Ok(resp.status(StatusCode::OK).body(Body::from(buf)).unwrap()),
        Err(e) => {
            log::error!("failed to encode prometheus metrics: {e}");
            Ok(resp
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .body(Body::empty())
                .unwrap())
        }
    }
}

/// Binds `addr` and serves `/metrics` until `cancel` fires.
pub async fn serve(addr: SocketAddr, cancel: CancellationToken) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    log::info!("prometheus exporter listening on {addr}");
    axum::serve(listener, router())
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
}

/// Every `SAMPLE_INTERVAL`, reads each target's statistics via
/// `Coordinator::reset_snapshots` (read-and-clear) and advances the counters
/// by that window's delta — folded into monotonic counters here rather than
/// exposed as raw gauges, so the exported series stay Prometheus-idiomatic
/// counters even though the internal aggregator resets on read.
pub async fn sample_loop(coordinator: Arc<Coordinator>, cancel: CancellationToken) {
    let mut tick = tokio::time::interval(SAMPLE_INTERVAL);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tick.tick() => {
                for (target, snapshot) in coordinator.reset_snapshots() {
                    let host = target.display_name.as_str();
                    PACKETS_SENT.with_label_values(&[host]).inc_by(snapshot.sent);
                    PACKETS_RECEIVED
                        .with_label_values(&[host])
                        .inc_by(snapshot.received);
                    LATENCY_SECONDS
                        .with_label_values(&[host])
                        .set(snapshot.mean_latency().as_secs_f64());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn metrics_endpoint_returns_text_format() {
        let app = router();
        let request = axum::http::Request::builder()
            .uri("/metrics")
            .body(Body::empty())
            .unwrap();
        let response = tower::ServiceExt::oneshot(app, request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
