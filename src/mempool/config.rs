// Copyright 2022-2026 Animica Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::pool::Address;

/// Replacement transactions must raise the fee-per-gas by at least
/// `RBF_NUM`/`RBF_DENOM`.
pub(crate) const RBF_NUM: u64 = 25;
pub(crate) const RBF_DENOM: u64 = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MempoolConfig {
    /// Hard cap on pooled transactions across all senders.
    pub max_pool_size: usize,
    /// Weight of transaction age (seconds) in the priority composite.
    pub age_weight: f64,
    /// Per-sender priority bias; senders not listed use 1.0.
    pub sender_bias: HashMap<Address, f64>,
}

impl Default for MempoolConfig {
    fn default() -> Self {
        Self {
            max_pool_size: 8192,
            age_weight: 0.001,
            sender_bias: HashMap::new(),
        }
    }
}

impl MempoolConfig {
    pub fn bias_for(&self, sender: &Address) -> f64 {
        self.sender_bias.get(sender).copied().unwrap_or(1.0)
    }
}
