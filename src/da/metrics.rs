// Copyright 2022-2026 Animica Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Prometheus metrics for the DA layer: request counts and latencies, byte
//! flow, blob sizes, proof verification, and sampler activity.

use lazy_static::lazy_static;
use prometheus::{
    Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts,
};

lazy_static! {
    pub static ref DA_REQUESTS_INFLIGHT: IntGauge = {
        let gauge = IntGauge::new(
            "da_requests_inflight",
            "Number of DA retrieval requests currently being served",
        )
        .expect("Defining the da_requests_inflight metric must succeed");
        prometheus::default_registry()
            .register(Box::new(gauge.clone()))
            .expect("Registering the da_requests_inflight metric must succeed");
        gauge
    };
    pub static ref DA_REQUEST_DURATION_SECONDS: HistogramVec = {
        let histogram = HistogramVec::new(
            HistogramOpts::new(
                "da_request_duration_seconds",
                "DA retrieval request latency by method and endpoint",
            ),
            &[labels::METHOD, labels::ENDPOINT],
        )
        .expect("Defining the da_request_duration_seconds metric must succeed");
        prometheus::default_registry()
            .register(Box::new(histogram.clone()))
            .expect("Registering the da_request_duration_seconds metric must succeed");
        histogram
    };
    pub static ref DA_REQUESTS_TOTAL: IntCounterVec = {
        let counter = IntCounterVec::new(
            Opts::new(
                "da_requests_total",
                "DA retrieval requests by method, endpoint, and status code",
            ),
            &[labels::METHOD, labels::ENDPOINT, labels::STATUS],
        )
        .expect("Defining the da_requests_total metric must succeed");
        prometheus::default_registry()
            .register(Box::new(counter.clone()))
            .expect("Registering the da_requests_total metric must succeed");
        counter
    };
    pub static ref DA_BYTES_TOTAL: IntCounterVec = {
        let counter = IntCounterVec::new(
            Opts::new("da_bytes_total", "Bytes moved through the DA API by direction"),
            &[labels::DIRECTION],
        )
        .expect("Defining the da_bytes_total metric must succeed");
        prometheus::default_registry()
            .register(Box::new(counter.clone()))
            .expect("Registering the da_bytes_total metric must succeed");
        counter
    };
    pub static ref DA_BLOB_SIZE_BYTES: Histogram = {
        let histogram = Histogram::with_opts(
            HistogramOpts::new("da_blob_size_bytes", "Size of blobs accepted on POST")
                .buckets(prometheus::exponential_buckets(256.0, 4.0, 12).expect("valid buckets")),
        )
        .expect("Defining the da_blob_size_bytes metric must succeed");
        prometheus::default_registry()
            .register(Box::new(histogram.clone()))
            .expect("Registering the da_blob_size_bytes metric must succeed");
        histogram
    };
    pub static ref DA_PROOF_VERIFY_DURATION_SECONDS: HistogramVec = {
        let histogram = HistogramVec::new(
            HistogramOpts::new(
                "da_proof_verify_duration_seconds",
                "Proof build/verify latency by outcome",
            ),
            &[labels::OUTCOME],
        )
        .expect("Defining the da_proof_verify_duration_seconds metric must succeed");
        prometheus::default_registry()
            .register(Box::new(histogram.clone()))
            .expect("Registering the da_proof_verify_duration_seconds metric must succeed");
        histogram
    };
    pub static ref DA_SAMPLER_ACTIVE_JOBS: IntGauge = {
        let gauge = IntGauge::new(
            "da_sampler_active_jobs",
            "Sampling jobs currently in flight",
        )
        .expect("Defining the da_sampler_active_jobs metric must succeed");
        prometheus::default_registry()
            .register(Box::new(gauge.clone()))
            .expect("Registering the da_sampler_active_jobs metric must succeed");
        gauge
    };
    pub static ref GC_DELETED_TOTAL: IntCounter = {
        let counter = IntCounter::new(
            "da_gc_deleted_total",
            "Blobs deleted by the garbage collector",
        )
        .expect("Defining the da_gc_deleted_total metric must succeed");
        prometheus::default_registry()
            .register(Box::new(counter.clone()))
            .expect("Registering the da_gc_deleted_total metric must succeed");
        counter
    };
    pub static ref GC_RECLAIMED_BYTES_TOTAL: IntCounter = {
        let counter = IntCounter::new(
            "da_gc_reclaimed_bytes_total",
            "Bytes reclaimed by the garbage collector",
        )
        .expect("Defining the da_gc_reclaimed_bytes_total metric must succeed");
        prometheus::default_registry()
            .register(Box::new(counter.clone()))
            .expect("Registering the da_gc_reclaimed_bytes_total metric must succeed");
        counter
    };
}

pub mod labels {
    pub const METHOD: &str = "method";
    pub const ENDPOINT: &str = "endpoint";
    pub const STATUS: &str = "status";
    pub const DIRECTION: &str = "direction";
    pub const OUTCOME: &str = "outcome";
}

pub mod values {
    pub const DIRECTION_IN: &str = "in";
    pub const DIRECTION_OUT: &str = "out";
    pub const OUTCOME_OK: &str = "ok";
    pub const OUTCOME_ERROR: &str = "error";
}
