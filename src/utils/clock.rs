// Copyright 2022-2026 Animica Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Injected time sources. Policy code (penalties, rate limiting, template
//! expiry, the beacon) never reads wall time directly; it is handed a clock
//! so outcomes are reproducible.

use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

/// Seconds-typed time source. The origin is implementation-defined: callers
/// must only compare values from the same clock.
pub trait Clock: Send + Sync {
    fn now(&self) -> f64;
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now(&self) -> f64 {
        (**self).now()
    }
}

/// UNIX wall-clock seconds.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64()
    }
}

/// Monotonic seconds since clock construction. Suitable for token buckets.
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

/// Hand-driven clock for tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    t: Mutex<f64>,
}

impl ManualClock {
    pub fn new(t: f64) -> Self {
        Self { t: Mutex::new(t) }
    }

    pub fn set(&self, t: f64) {
        *self.t.lock() = t;
    }

    pub fn advance(&self, dt: f64) {
        *self.t.lock() += dt;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        *self.t.lock()
    }
}
