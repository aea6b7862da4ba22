// Copyright 2022-2026 Animica Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Shared observability plumbing: the process-wide registry render, request
//! timer guards, and metric families used across subsystems. Instrumentation
//! never errors for callers.

use lazy_static::lazy_static;
use prometheus::{Encoder, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, TextEncoder};
use tracing::warn;

lazy_static! {
    pub static ref GOSSIP_PUBLISH_TOTAL: IntCounterVec = {
        let counter = IntCounterVec::new(
            Opts::new(
                "gossip_publish_total",
                "Gossip sends by topic and delivery outcome",
            ),
            &["topic", "outcome"],
        )
        .expect("Defining the gossip_publish_total metric must succeed");
        prometheus::default_registry()
            .register(Box::new(counter.clone()))
            .expect("Registering the gossip_publish_total metric must succeed");
        counter
    };
    pub static ref GOSSIP_DUPLICATES_TOTAL: IntCounter = {
        let counter = IntCounter::new(
            "gossip_duplicates_total",
            "Messages suppressed by the gossip seen-cache",
        )
        .expect("Defining the gossip_duplicates_total metric must succeed");
        prometheus::default_registry()
            .register(Box::new(counter.clone()))
            .expect("Registering the gossip_duplicates_total metric must succeed");
        counter
    };
    pub static ref RPC_REQUESTS_TOTAL: IntCounterVec = {
        let counter = IntCounterVec::new(
            Opts::new("rpc_requests_total", "JSON-RPC calls by method and outcome"),
            &["method", "outcome"],
        )
        .expect("Defining the rpc_requests_total metric must succeed");
        prometheus::default_registry()
            .register(Box::new(counter.clone()))
            .expect("Registering the rpc_requests_total metric must succeed");
        counter
    };
}

/// RAII request instrumentation: bumps the in-flight gauge on construction,
/// observes latency on drop. The status counter is recorded by
/// [`RequestTimer::finish`]; a drop without `finish` counts as status
/// "aborted".
pub struct RequestTimer {
    inflight: &'static IntGauge,
    duration: &'static HistogramVec,
    requests: &'static IntCounterVec,
    method: &'static str,
    endpoint: &'static str,
    start: std::time::Instant,
    finished: bool,
}

impl RequestTimer {
    pub fn start(
        inflight: &'static IntGauge,
        duration: &'static HistogramVec,
        requests: &'static IntCounterVec,
        method: &'static str,
        endpoint: &'static str,
    ) -> Self {
        inflight.inc();
        Self {
            inflight,
            duration,
            requests,
            method,
            endpoint,
            start: std::time::Instant::now(),
            finished: false,
        }
    }

    /// Record the final status code for this request.
    pub fn finish(mut self, status: u16) {
        self.finished = true;
        self.requests
            .with_label_values(&[self.method, self.endpoint, &status.to_string()])
            .inc();
        // drop observes duration and decrements inflight
    }
}

impl Drop for RequestTimer {
    fn drop(&mut self) {
        self.inflight.dec();
        self.duration
            .with_label_values(&[self.method, self.endpoint])
            .observe(self.start.elapsed().as_secs_f64());
        if !self.finished {
            self.requests
                .with_label_values(&[self.method, self.endpoint, "aborted"])
                .inc();
        }
    }
}

/// Render the default registry in the Prometheus text exposition format.
pub fn render() -> String {
    let metric_families = prometheus::default_registry().gather();
    let mut buffer = Vec::new();
    if let Err(e) = TextEncoder::new().encode(&metric_families, &mut buffer) {
        warn!(error = %e, "metrics encode failed");
        return String::new();
    }
    String::from_utf8_lossy(&buffer).into_owned()
}
