// Copyright 2022-2026 Animica Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! HTTP retrieval surface for the blob store.
//!
//! `POST /da/blob?ns=<u64>` stores raw bytes and returns the commitment;
//! `GET /da/blob/{commitment}` streams them back;
//! `GET /da/proof?commitment=…&samples=N` (or `/da/proof/{commitment}`)
//! returns sampled inclusion proofs. `/metrics` renders the process
//! registry. Ingress runs behind the per-peer token buckets.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::da::metrics::{
    values, DA_BLOB_SIZE_BYTES, DA_BYTES_TOTAL, DA_PROOF_VERIFY_DURATION_SECONDS,
    DA_REQUESTS_INFLIGHT, DA_REQUESTS_TOTAL, DA_REQUEST_DURATION_SECONDS,
    DA_SAMPLER_ACTIVE_JOBS,
};
use crate::da::sampling::verify_samples;
use crate::da::store::{BlobError, BlobStore};
use crate::db::Store;
use crate::metrics::RequestTimer;
use crate::p2p::ratelimit::PeerLimiter;
use crate::p2p::PeerId;
use crate::utils::{commitment_hex, parse_commitment, Clock, MonotonicClock};

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub default_samples: u64,
    pub max_samples: u64,
    /// Seed for proof sampling; fixed in tests, random per-process in
    /// production.
    pub sample_seed: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            default_samples: 16,
            max_samples: 256,
            sample_seed: rand::random(),
        }
    }
}

pub struct ApiState<S, C> {
    pub store: BlobStore<S, C>,
    pub limiter: PeerLimiter<MonotonicClock>,
    pub config: ApiConfig,
}

enum ApiError {
    BadRequest(String),
    NotFound(String),
    Oversize(String),
    RateLimited,
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Oversize(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<BlobError> for ApiError {
    fn from(e: BlobError) -> Self {
        match e {
            BlobError::NotFound(root) => ApiError::NotFound(root),
            BlobError::Oversize { .. } => ApiError::Oversize(e.to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match self {
            ApiError::BadRequest(m)
            | ApiError::NotFound(m)
            | ApiError::Oversize(m)
            | ApiError::Internal(m) => m,
            ApiError::RateLimited => "rate limited".to_string(),
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

#[derive(Debug, Deserialize)]
struct PostBlobParams {
    ns: u64,
}

#[derive(Debug, Serialize)]
struct PostBlobResponse {
    commitment: String,
    namespace: u64,
    size: u64,
}

#[derive(Debug, Deserialize)]
struct ProofParams {
    commitment: String,
    samples: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct SamplesParams {
    samples: Option<u64>,
}

#[derive(Debug, Serialize)]
struct SampleJson {
    index: u64,
    namespace: u64,
    leaf: String,
    branch: Vec<String>,
}

#[derive(Debug, Serialize)]
struct ProofResponse {
    commitment: String,
    namespace: u64,
    total_shards: u32,
    shard_size: u64,
    samples: Vec<SampleJson>,
}

fn peer_from_headers(headers: &HeaderMap) -> PeerId {
    headers
        .get("x-peer-id")
        .and_then(|value| value.to_str().ok())
        .map(PeerId::new)
        .unwrap_or_else(|| PeerId::new("anon"))
}

fn admit<S, C>(state: &ApiState<S, C>, headers: &HeaderMap, units: f64) -> Result<(), ApiError> {
    if state.limiter.allow(&peer_from_headers(headers), units) {
        Ok(())
    } else {
        Err(ApiError::RateLimited)
    }
}

pub fn router<S, C>(state: Arc<ApiState<S, C>>) -> Router
where
    S: Store + Send + Sync + 'static,
    C: Clock + 'static,
{
    // accept bodies up to the configured blob limit so the store's own
    // oversize check produces the response
    let body_limit = state.store.config().max_blob_bytes.saturating_add(1024);
    Router::new()
        .route("/da/blob", post(post_blob::<S, C>))
        .route("/da/blob/{commitment}", get(get_blob::<S, C>))
        .route("/da/proof", get(proof_by_query::<S, C>))
        .route("/da/proof/{commitment}", get(proof_by_path::<S, C>))
        .route("/metrics", get(metrics_text))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

async fn post_blob<S, C>(
    State(state): State<Arc<ApiState<S, C>>>,
    Query(params): Query<PostBlobParams>,
    headers: HeaderMap,
    body: Bytes,
) -> Response
where
    S: Store + Send + Sync + 'static,
    C: Clock + 'static,
{
    let timer = RequestTimer::start(
        &DA_REQUESTS_INFLIGHT,
        &DA_REQUEST_DURATION_SECONDS,
        &DA_REQUESTS_TOTAL,
        "POST",
        "/da/blob",
    );
    let result = (|| {
        admit(&state, &headers, 1.0)?;
        DA_BYTES_TOTAL
            .with_label_values(&[values::DIRECTION_IN])
            .inc_by(body.len() as u64);
        let meta = state.store.put(params.ns, &body)?;
        DA_BLOB_SIZE_BYTES.observe(meta.size as f64);
        Ok::<_, ApiError>(PostBlobResponse {
            commitment: commitment_hex(&meta.root),
            namespace: meta.namespace,
            size: meta.size,
        })
    })();
    match result {
        Ok(response) => {
            timer.finish(StatusCode::OK.as_u16());
            Json(response).into_response()
        }
        Err(e) => {
            timer.finish(e.status().as_u16());
            e.into_response()
        }
    }
}

async fn get_blob<S, C>(
    State(state): State<Arc<ApiState<S, C>>>,
    Path(commitment): Path<String>,
    headers: HeaderMap,
) -> Response
where
    S: Store + Send + Sync + 'static,
    C: Clock + 'static,
{
    let timer = RequestTimer::start(
        &DA_REQUESTS_INFLIGHT,
        &DA_REQUEST_DURATION_SECONDS,
        &DA_REQUESTS_TOTAL,
        "GET",
        "/da/blob",
    );
    let result = (|| {
        admit(&state, &headers, 1.0)?;
        let root = parse_commitment(&commitment)
            .ok_or_else(|| ApiError::BadRequest(format!("bad commitment: {commitment}")))?;
        let data = state.store.get(&root)?;
        DA_BYTES_TOTAL
            .with_label_values(&[values::DIRECTION_OUT])
            .inc_by(data.len() as u64);
        Ok::<_, ApiError>(data)
    })();
    match result {
        Ok(data) => {
            timer.finish(StatusCode::OK.as_u16());
            (
                [(header::CONTENT_TYPE, "application/octet-stream")],
                data,
            )
                .into_response()
        }
        Err(e) => {
            timer.finish(e.status().as_u16());
            e.into_response()
        }
    }
}

async fn proof_by_query<S, C>(
    State(state): State<Arc<ApiState<S, C>>>,
    Query(params): Query<ProofParams>,
    headers: HeaderMap,
) -> Response
where
    S: Store + Send + Sync + 'static,
    C: Clock + 'static,
{
    serve_proof(state, params.commitment, params.samples, headers).await
}

async fn proof_by_path<S, C>(
    State(state): State<Arc<ApiState<S, C>>>,
    Path(commitment): Path<String>,
    Query(params): Query<SamplesParams>,
    headers: HeaderMap,
) -> Response
where
    S: Store + Send + Sync + 'static,
    C: Clock + 'static,
{
    serve_proof(state, commitment, params.samples, headers).await
}

async fn serve_proof<S, C>(
    state: Arc<ApiState<S, C>>,
    commitment: String,
    samples: Option<u64>,
    headers: HeaderMap,
) -> Response
where
    S: Store + Send + Sync + 'static,
    C: Clock + 'static,
{
    let timer = RequestTimer::start(
        &DA_REQUESTS_INFLIGHT,
        &DA_REQUEST_DURATION_SECONDS,
        &DA_REQUESTS_TOTAL,
        "GET",
        "/da/proof",
    );
    let result = (|| {
        admit(&state, &headers, 1.0)?;
        let root = parse_commitment(&commitment)
            .ok_or_else(|| ApiError::BadRequest(format!("bad commitment: {commitment}")))?;
        let meta = state
            .store
            .meta(&root)?
            .ok_or_else(|| ApiError::NotFound(commitment.clone()))?;
        let count = samples
            .unwrap_or(state.config.default_samples)
            .min(state.config.max_samples);

        DA_SAMPLER_ACTIVE_JOBS.inc();
        let verify_timer = std::time::Instant::now();
        let sampled = state
            .store
            .sample_proof(&root, count, state.config.sample_seed);
        DA_SAMPLER_ACTIVE_JOBS.dec();

        let sampled = match sampled {
            Ok(sampled) if verify_samples(&root, &sampled) => {
                DA_PROOF_VERIFY_DURATION_SECONDS
                    .with_label_values(&[values::OUTCOME_OK])
                    .observe(verify_timer.elapsed().as_secs_f64());
                sampled
            }
            Ok(_) => {
                DA_PROOF_VERIFY_DURATION_SECONDS
                    .with_label_values(&[values::OUTCOME_ERROR])
                    .observe(verify_timer.elapsed().as_secs_f64());
                return Err(ApiError::Internal(
                    "generated proof failed self-verification".into(),
                ));
            }
            Err(e) => {
                DA_PROOF_VERIFY_DURATION_SECONDS
                    .with_label_values(&[values::OUTCOME_ERROR])
                    .observe(verify_timer.elapsed().as_secs_f64());
                return Err(e.into());
            }
        };

        debug!(commitment = %commitment, samples = sampled.len(), "proof served");
        Ok::<_, ApiError>(ProofResponse {
            commitment: commitment_hex(&root),
            namespace: meta.namespace,
            total_shards: meta.total_shards,
            shard_size: meta.shard_size,
            samples: sampled
                .into_iter()
                .map(|sample| SampleJson {
                    index: sample.index,
                    namespace: sample.namespace,
                    leaf: format!("0x{}", hex::encode(&sample.data)),
                    branch: sample
                        .proof
                        .branch
                        .iter()
                        .map(|node| format!("0x{}", hex::encode(node)))
                        .collect(),
                })
                .collect(),
        })
    })();
    match result {
        Ok(response) => {
            timer.finish(StatusCode::OK.as_u16());
            Json(response).into_response()
        }
        Err(e) => {
            timer.finish(e.status().as_u16());
            e.into_response()
        }
    }
}

async fn metrics_text() -> Response {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        crate::metrics::render(),
    )
        .into_response()
}
