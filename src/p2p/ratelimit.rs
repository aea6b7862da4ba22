// Copyright 2022-2026 Animica Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Token-bucket admission control for ingress traffic.
//!
//! Buckets are refilled against an injected monotonic clock; a concurrent
//! `consume` never observes more than the configured burst. An optional
//! global bucket runs in series in front of the per-peer buckets.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::p2p::PeerId;
use crate::utils::Clock;

#[derive(Debug, Clone, Copy)]
pub struct TokenBucket {
    rate: f64,
    burst: f64,
    tokens: f64,
    last_refill: f64,
}

impl TokenBucket {
    /// A bucket starting full at time `now`.
    pub fn new(rate: f64, burst: f64, now: f64) -> Self {
        Self {
            rate: rate.max(0.0),
            burst: burst.max(0.0),
            tokens: burst.max(0.0),
            last_refill: now,
        }
    }

    fn refill(&mut self, now: f64) {
        if now > self.last_refill {
            self.tokens = (self.tokens + (now - self.last_refill) * self.rate).min(self.burst);
            self.last_refill = now;
        }
    }

    /// Deduct `n` tokens if available; rejects otherwise.
    pub fn try_consume(&mut self, n: f64, now: f64) -> bool {
        self.refill(now);
        if self.tokens >= n {
            self.tokens -= n;
            true
        } else {
            false
        }
    }

    /// Tokens available at `now` without consuming.
    pub fn available(&self, now: f64) -> f64 {
        let mut probe = *self;
        probe.refill(now);
        probe.tokens
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    /// Per-peer refill rate (units/second) and burst capacity.
    pub peer_rate: f64,
    pub peer_burst: f64,
    /// Optional global (rate, burst) applied before any per-peer bucket.
    pub global: Option<(f64, f64)>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            peer_rate: 50.0,
            peer_burst: 100.0,
            global: None,
        }
    }
}

/// Per-peer admission control. Buckets are created lazily on first sight of
/// a peer. Callers that need independent byte and message-count budgets run
/// one limiter per unit.
pub struct PeerLimiter<C> {
    clock: C,
    config: RateLimitConfig,
    global: Option<Mutex<TokenBucket>>,
    peers: RwLock<HashMap<PeerId, Arc<Mutex<TokenBucket>>>>,
}

impl<C: Clock> PeerLimiter<C> {
    pub fn new(config: RateLimitConfig, clock: C) -> Self {
        let now = clock.now();
        Self {
            global: config
                .global
                .map(|(rate, burst)| Mutex::new(TokenBucket::new(rate, burst, now))),
            clock,
            config,
            peers: RwLock::new(HashMap::new()),
        }
    }

    fn bucket_for(&self, peer: &PeerId, now: f64) -> Arc<Mutex<TokenBucket>> {
        if let Some(bucket) = self.peers.read().get(peer) {
            return bucket.clone();
        }
        self.peers
            .write()
            .entry(peer.clone())
            .or_insert_with(|| {
                Arc::new(Mutex::new(TokenBucket::new(
                    self.config.peer_rate,
                    self.config.peer_burst,
                    now,
                )))
            })
            .clone()
    }

    /// Admit `n` units from `peer`. Both the global and the peer bucket must
    /// have capacity; neither is deducted unless admission succeeds.
    pub fn allow(&self, peer: &PeerId, n: f64) -> bool {
        let now = self.clock.now();
        let bucket = self.bucket_for(peer, now);

        match &self.global {
            Some(global) => {
                let mut global = global.lock();
                let mut peer_bucket = bucket.lock();
                global.refill(now);
                peer_bucket.refill(now);
                if global.tokens >= n && peer_bucket.tokens >= n {
                    global.tokens -= n;
                    peer_bucket.tokens -= n;
                    true
                } else {
                    false
                }
            }
            None => bucket.lock().try_consume(n, now),
        }
    }

    /// Tokens currently available to `peer`.
    pub fn peer_available(&self, peer: &PeerId) -> f64 {
        let now = self.clock.now();
        self.bucket_for(peer, now).lock().available(now)
    }

    /// Drop bucket state for peers we no longer track.
    pub fn forget(&self, peer: &PeerId) {
        self.peers.write().remove(peer);
    }
}
