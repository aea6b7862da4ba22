// Copyright 2022-2026 Animica Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProviderId(pub String);

impl ProviderId {
    pub fn new(id: impl Into<String>) -> Self {
        ProviderId(id.into())
    }
}

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct JobId(pub String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        JobId(id.into())
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderStatus {
    Pending,
    Active,
    Jailed,
    Cooldown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobKind {
    Ai,
    Quantum,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobStatus {
    Queued,
    Leased,
    Completed,
    Failed,
    TimedOut,
}

/// A registered compute provider. Providers are never deleted; retirement
/// tombstones the row so historical claims stay resolvable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Provider {
    pub id: ProviderId,
    pub capabilities: BTreeSet<String>,
    pub status: ProviderStatus,
    pub stake: u64,
    pub max_concurrent: u32,
    /// Health score in [0, 1], fed by SLA snapshots.
    pub health: f64,
    pub region: String,
    pub tombstoned: bool,
}

impl Provider {
    pub fn new(id: ProviderId, region: impl Into<String>) -> Self {
        Self {
            id,
            capabilities: BTreeSet::new(),
            status: ProviderStatus::Pending,
            stake: 0,
            max_concurrent: 1,
            health: 1.0,
            region: region.into(),
            tombstoned: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lease {
    pub provider: ProviderId,
    pub expires_at: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub kind: JobKind,
    pub payload_commitment: [u8; 32],
    pub fee: u64,
    pub size_units: u64,
    pub gas_units: u64,
    pub deadline_height: u64,
    pub caller: String,
    pub status: JobStatus,
    pub lease: Option<Lease>,
    /// Seconds timestamp at submission; feeds the age term of the priority.
    pub submitted_at: f64,
    /// Empty set means any region is acceptable.
    pub allowed_regions: BTreeSet<String>,
}

impl Job {
    /// Priority composite: fee per size unit plus an age bonus.
    pub fn priority(&self, now: f64, age_weight: f64) -> f64 {
        let fee_term = self.fee as f64 / self.size_units.max(1) as f64;
        fee_term + age_weight * (now - self.submitted_at).max(0.0)
    }
}
