// Copyright 2022-2026 Animica Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Work-template lifecycle. A template binds (head hash, head height, mix
//! seed, creation time) under a hash identity; it is replaced on head
//! change, TTL expiry, or explicit refresh.

use byteorder::{BigEndian, ByteOrder};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::utils::{sha3_256_concat, Clock};

const TEMPLATE_TAG: &[u8] = b"template";
const MIX_TAG: &[u8] = b"mix";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplateConfig {
    pub ttl_secs: f64,
}

impl Default for TemplateConfig {
    fn default() -> Self {
        Self { ttl_secs: 30.0 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkTemplate {
    #[serde(with = "hex")]
    pub template_id: [u8; 32],
    #[serde(with = "hex")]
    pub head_hash: [u8; 32],
    pub head_height: u64,
    #[serde(with = "hex")]
    pub mix_seed: [u8; 32],
    pub created_at: f64,
    pub ttl_secs: f64,
}

impl WorkTemplate {
    pub fn expired(&self, now: f64) -> bool {
        now >= self.created_at + self.ttl_secs
    }
}

fn be64(value: u64) -> [u8; 8] {
    let mut buf = [0u8; 8];
    BigEndian::write_u64(&mut buf, value);
    buf
}

fn template_id(head_hash: &[u8; 32], height: u64, mix_seed: &[u8; 32], created_ms: u64) -> [u8; 32] {
    sha3_256_concat([
        TEMPLATE_TAG,
        head_hash.as_slice(),
        &be64(height),
        mix_seed.as_slice(),
        &be64(created_ms),
    ])
}

struct ManagerState {
    head_hash: [u8; 32],
    head_height: u64,
    counter: u64,
    current: Option<WorkTemplate>,
}

pub struct TemplateManager<C> {
    config: TemplateConfig,
    clock: C,
    state: Mutex<ManagerState>,
}

impl<C: Clock> TemplateManager<C> {
    pub fn new(config: TemplateConfig, clock: C) -> Self {
        Self {
            config,
            clock,
            state: Mutex::new(ManagerState {
                head_hash: [0; 32],
                head_height: 0,
                counter: 0,
                current: None,
            }),
        }
    }

    fn build(state: &mut ManagerState, ttl_secs: f64, now: f64) -> WorkTemplate {
        state.counter += 1;
        let mix_seed = sha3_256_concat([
            MIX_TAG,
            state.head_hash.as_slice(),
            &be64(state.head_height),
            &be64(state.counter),
        ]);
        let created_ms = (now * 1000.0).max(0.0) as u64;
        let template = WorkTemplate {
            template_id: template_id(&state.head_hash, state.head_height, &mix_seed, created_ms),
            head_hash: state.head_hash,
            head_height: state.head_height,
            mix_seed,
            created_at: now,
            ttl_secs,
        };
        state.current = Some(template.clone());
        debug!(height = template.head_height, "work template rolled");
        template
    }

    /// Observe a chain head. A different parent hash or height produces a
    /// fresh template immediately.
    pub fn on_head_change(&self, head_hash: [u8; 32], head_height: u64) -> WorkTemplate {
        let mut state = self.state.lock();
        let changed = state.head_hash != head_hash || state.head_height != head_height;
        state.head_hash = head_hash;
        state.head_height = head_height;
        if changed || state.current.is_none() {
            Self::build(&mut state, self.config.ttl_secs, self.clock.now())
        } else {
            state.current.clone().expect("template present")
        }
    }

    /// The live template; expired or missing templates roll over.
    pub fn current(&self) -> WorkTemplate {
        let now = self.clock.now();
        let mut state = self.state.lock();
        match &state.current {
            Some(template) if !template.expired(now) => template.clone(),
            _ => Self::build(&mut state, self.config.ttl_secs, now),
        }
    }

    /// Force a new template identity for the same head.
    pub fn refresh(&self) -> WorkTemplate {
        let mut state = self.state.lock();
        Self::build(&mut state, self.config.ttl_secs, self.clock.now())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::utils::ManualClock;

    fn manager(ttl: f64) -> (TemplateManager<Arc<ManualClock>>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(100.0));
        (
            TemplateManager::new(TemplateConfig { ttl_secs: ttl }, clock.clone()),
            clock,
        )
    }

    #[test]
    fn stable_until_ttl_expiry() {
        let (manager, clock) = manager(30.0);
        manager.on_head_change([1; 32], 10);
        let a = manager.current();
        clock.advance(29.0);
        let b = manager.current();
        assert_eq!(a.template_id, b.template_id);

        clock.advance(1.5);
        let c = manager.current();
        assert_ne!(a.template_id, c.template_id);
        assert_eq!(c.head_height, 10, "rollover keeps the head binding");
    }

    #[test]
    fn head_change_rolls_immediately() {
        let (manager, _) = manager(1_000.0);
        let a = manager.on_head_change([1; 32], 10);
        // same head is a no-op
        let same = manager.on_head_change([1; 32], 10);
        assert_eq!(a.template_id, same.template_id);

        let b = manager.on_head_change([2; 32], 10);
        assert_ne!(a.template_id, b.template_id);
        let c = manager.on_head_change([2; 32], 11);
        assert_ne!(b.template_id, c.template_id);
        assert_eq!(c.head_height, 11);
    }

    #[test]
    fn refresh_forces_fresh_identity() {
        let (manager, _) = manager(1_000.0);
        manager.on_head_change([7; 32], 42);
        let a = manager.current();
        let b = manager.refresh();
        assert_ne!(a.template_id, b.template_id);
        assert_eq!(a.head_hash, b.head_hash);
        assert_ne!(a.mix_seed, b.mix_seed);
        // requests now return the refreshed template
        assert_eq!(manager.current().template_id, b.template_id);
    }

    #[test]
    fn identity_binds_all_fields() {
        let id = |head: [u8; 32], height, mix: [u8; 32], ms| template_id(&head, height, &mix, ms);
        let base = id([1; 32], 5, [2; 32], 1_000);
        assert_ne!(base, id([3; 32], 5, [2; 32], 1_000));
        assert_ne!(base, id([1; 32], 6, [2; 32], 1_000));
        assert_ne!(base, id([1; 32], 5, [4; 32], 1_000));
        assert_ne!(base, id([1; 32], 5, [2; 32], 2_000));
    }
}
