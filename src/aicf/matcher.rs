// Copyright 2022-2026 Animica Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Provider matcher: assigns queued jobs to eligible providers with a
//! rotating scan index so no eligible provider starves.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::aicf::penalty::PenaltyView;
use crate::aicf::provider::{Job, JobId, JobKind, Lease, Provider, ProviderId, ProviderStatus};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    /// Maximum providers probed per job before giving up for the cycle.
    pub scan_limit: usize,
    /// Minimum health per job kind.
    pub health_threshold_ai: f64,
    pub health_threshold_quantum: f64,
    /// Weight of job age in the priority composite.
    pub age_weight: f64,
    /// How long an assignment leases the provider before timing out.
    pub lease_ttl_secs: f64,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            scan_limit: 64,
            health_threshold_ai: 0.5,
            health_threshold_quantum: 0.7,
            age_weight: 0.01,
            lease_ttl_secs: 300.0,
        }
    }
}

/// Where accepted assignments are recorded (in production, a proof-claim
/// row in the anchor store). A sink failure rolls the assignment back.
pub trait AssignmentSink {
    fn record_assignment(&self, job: &Job, provider: &ProviderId) -> anyhow::Result<()>;
}

/// One accepted assignment: the job moves QUEUED → LEASED with this lease.
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub job: JobId,
    pub provider: ProviderId,
    pub lease: Lease,
}

#[derive(Debug, Default, Clone)]
pub struct MatchReport {
    pub assignments: Vec<Assignment>,
    /// Jobs left queued for the next cycle.
    pub unassigned: Vec<JobId>,
}

struct Slot {
    provider: Provider,
    avail: u32,
}

/// In-memory provider registry plus the rotating assignment scan.
pub struct Matcher {
    config: MatcherConfig,
    slots: Vec<Slot>,
    by_id: HashMap<ProviderId, usize>,
    rotate: usize,
}

impl Matcher {
    pub fn new(config: MatcherConfig) -> Self {
        Self {
            config,
            slots: Vec::new(),
            by_id: HashMap::new(),
            rotate: 0,
        }
    }

    /// Register or replace a provider row.
    pub fn upsert_provider(&mut self, provider: Provider) {
        match self.by_id.get(&provider.id) {
            Some(&idx) => {
                let avail = provider.max_concurrent;
                self.slots[idx] = Slot { provider, avail };
            }
            None => {
                self.by_id.insert(provider.id.clone(), self.slots.len());
                let avail = provider.max_concurrent;
                self.slots.push(Slot { provider, avail });
            }
        }
    }

    pub fn set_status(&mut self, id: &ProviderId, status: ProviderStatus) {
        if let Some(&idx) = self.by_id.get(id) {
            self.slots[idx].provider.status = status;
        }
    }

    pub fn set_health(&mut self, id: &ProviderId, health: f64) {
        if let Some(&idx) = self.by_id.get(id) {
            self.slots[idx].provider.health = health.clamp(0.0, 1.0);
        }
    }

    /// Mark a provider retired. The row is kept so old claims resolve.
    pub fn tombstone(&mut self, id: &ProviderId) {
        if let Some(&idx) = self.by_id.get(id) {
            self.slots[idx].provider.tombstoned = true;
            self.slots[idx].provider.status = ProviderStatus::Pending;
        }
    }

    pub fn provider(&self, id: &ProviderId) -> Option<&Provider> {
        self.by_id.get(id).map(|&idx| &self.slots[idx].provider)
    }

    fn health_threshold(&self, kind: JobKind) -> f64 {
        match kind {
            JobKind::Ai => self.config.health_threshold_ai,
            JobKind::Quantum => self.config.health_threshold_quantum,
        }
    }

    fn eligible(&self, slot: &Slot, job: &Job, penalties: &impl PenaltyView) -> bool {
        let provider = &slot.provider;
        provider.status == ProviderStatus::Active
            && !provider.tombstoned
            && slot.avail > 0
            && provider.health >= self.health_threshold(job.kind)
            && !penalties.is_jailed(&provider.id)
            && !penalties.is_on_cooldown(&provider.id)
            && (job.allowed_regions.is_empty() || job.allowed_regions.contains(&provider.region))
    }

    /// Run one assignment cycle over `jobs`.
    ///
    /// Jobs are taken in priority order (fee density plus age). For each
    /// job, up to `scan_limit` providers are probed starting at the rotating
    /// index; the first eligible provider takes the job and the index moves
    /// past it. Availability counters reset to each provider's
    /// `max_concurrent` at the cycle boundary.
    pub fn assign_cycle(
        &mut self,
        jobs: &[Job],
        penalties: &impl PenaltyView,
        sink: &impl AssignmentSink,
        now: f64,
    ) -> MatchReport {
        for slot in &mut self.slots {
            slot.avail = slot.provider.max_concurrent;
        }

        let mut ordered: Vec<&Job> = jobs.iter().collect();
        ordered.sort_by(|a, b| {
            b.priority(now, self.config.age_weight)
                .total_cmp(&a.priority(now, self.config.age_weight))
                .then_with(|| a.id.cmp(&b.id))
        });

        let mut report = MatchReport::default();
        for job in ordered {
            match self.assign_one(job, penalties, sink) {
                Some(provider) => {
                    debug!(job = %job.id, %provider, "job assigned");
                    report.assignments.push(Assignment {
                        job: job.id.clone(),
                        lease: Lease {
                            provider: provider.clone(),
                            expires_at: now + self.config.lease_ttl_secs,
                        },
                        provider,
                    });
                }
                None => report.unassigned.push(job.id.clone()),
            }
        }
        report
    }

    fn assign_one(
        &mut self,
        job: &Job,
        penalties: &impl PenaltyView,
        sink: &impl AssignmentSink,
    ) -> Option<ProviderId> {
        if self.slots.is_empty() {
            return None;
        }
        let probes = self.config.scan_limit.min(self.slots.len());
        for step in 0..probes {
            let idx = (self.rotate + step) % self.slots.len();
            if !self.eligible(&self.slots[idx], job, penalties) {
                continue;
            }
            let provider_id = self.slots[idx].provider.id.clone();
            self.slots[idx].avail -= 1;
            if let Err(e) = sink.record_assignment(job, &provider_id) {
                // roll the reservation back and leave the job queued
                self.slots[idx].avail += 1;
                warn!(job = %job.id, provider = %provider_id, error = %e,
                    "assignment rollback: sink failed");
                return None;
            }
            self.rotate = (idx + 1) % self.slots.len();
            return Some(provider_id);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use parking_lot::Mutex;

    use super::*;

    struct NoPenalties;

    impl PenaltyView for NoPenalties {
        fn is_jailed(&self, _provider: &ProviderId) -> bool {
            false
        }
        fn is_on_cooldown(&self, _provider: &ProviderId) -> bool {
            false
        }
    }

    struct DenyList(BTreeSet<ProviderId>);

    impl PenaltyView for DenyList {
        fn is_jailed(&self, provider: &ProviderId) -> bool {
            self.0.contains(provider)
        }
        fn is_on_cooldown(&self, _provider: &ProviderId) -> bool {
            false
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        recorded: Mutex<Vec<(JobId, ProviderId)>>,
        fail: Mutex<BTreeSet<ProviderId>>,
    }

    impl AssignmentSink for RecordingSink {
        fn record_assignment(&self, job: &Job, provider: &ProviderId) -> anyhow::Result<()> {
            if self.fail.lock().contains(provider) {
                anyhow::bail!("store unavailable");
            }
            self.recorded.lock().push((job.id.clone(), provider.clone()));
            Ok(())
        }
    }

    fn active(id: &str, max_concurrent: u32) -> Provider {
        let mut provider = Provider::new(ProviderId::new(id), "eu-west");
        provider.status = ProviderStatus::Active;
        provider.max_concurrent = max_concurrent;
        provider
    }

    fn job(id: &str, fee: u64) -> Job {
        Job {
            id: JobId::new(id),
            kind: JobKind::Ai,
            payload_commitment: [0; 32],
            fee,
            size_units: 1,
            gas_units: 1,
            deadline_height: 100,
            caller: "caller".into(),
            status: crate::aicf::provider::JobStatus::Queued,
            lease: None,
            submitted_at: 0.0,
            allowed_regions: BTreeSet::new(),
        }
    }

    #[test]
    fn rotation_spreads_jobs_across_providers() {
        let mut matcher = Matcher::new(MatcherConfig::default());
        for id in ["p1", "p2", "p3"] {
            matcher.upsert_provider(active(id, 10));
        }
        let sink = RecordingSink::default();
        let jobs: Vec<Job> = (0..3).map(|i| job(&format!("j{i}"), 100)).collect();
        let report = matcher.assign_cycle(&jobs, &NoPenalties, &sink, 0.0);

        assert_eq!(report.assignments.len(), 3);
        let providers: BTreeSet<&str> = report
            .assignments
            .iter()
            .map(|a| a.provider.0.as_str())
            .collect();
        assert_eq!(providers.len(), 3, "each provider got one job");
        // every assignment carries a lease on the matched provider
        assert!(report
            .assignments
            .iter()
            .all(|a| a.lease.provider == a.provider && a.lease.expires_at == 300.0));
    }

    #[test]
    fn quota_exhaustion_leaves_jobs_queued() {
        let mut matcher = Matcher::new(MatcherConfig::default());
        matcher.upsert_provider(active("p1", 2));
        let sink = RecordingSink::default();
        let jobs: Vec<Job> = (0..4).map(|i| job(&format!("j{i}"), 100)).collect();
        let report = matcher.assign_cycle(&jobs, &NoPenalties, &sink, 0.0);
        assert_eq!(report.assignments.len(), 2);
        assert_eq!(report.unassigned.len(), 2);

        // next cycle the counter resets
        let report = matcher.assign_cycle(&jobs[..2], &NoPenalties, &sink, 0.0);
        assert_eq!(report.assignments.len(), 2);
    }

    #[test]
    fn ineligible_providers_are_skipped() {
        let mut matcher = Matcher::new(MatcherConfig::default());
        matcher.upsert_provider(active("jailed", 5));
        matcher.upsert_provider(active("pending", 5));
        matcher.upsert_provider(active("weak", 5));
        matcher.upsert_provider(active("good", 5));
        matcher.set_status(&ProviderId::new("pending"), ProviderStatus::Pending);
        matcher.set_health(&ProviderId::new("weak"), 0.1);

        let deny = DenyList(BTreeSet::from([ProviderId::new("jailed")]));
        let sink = RecordingSink::default();
        let report = matcher.assign_cycle(&[job("j0", 10)], &deny, &sink, 0.0);
        assert_eq!(report.assignments.len(), 1);
        assert_eq!(report.assignments[0].provider, ProviderId::new("good"));
    }

    #[test]
    fn region_policy_is_enforced() {
        let mut matcher = Matcher::new(MatcherConfig::default());
        matcher.upsert_provider(active("eu", 5));
        let mut us = active("us", 5);
        us.region = "us-east".into();
        matcher.upsert_provider(us);

        let mut constrained = job("j0", 10);
        constrained.allowed_regions = BTreeSet::from(["us-east".to_string()]);
        let sink = RecordingSink::default();
        let report = matcher.assign_cycle(&[constrained], &NoPenalties, &sink, 0.0);
        assert_eq!(report.assignments[0].provider, ProviderId::new("us"));
    }

    #[test]
    fn sink_failure_rolls_back_availability() {
        let mut matcher = Matcher::new(MatcherConfig::default());
        matcher.upsert_provider(active("p1", 1));
        let sink = RecordingSink::default();
        sink.fail.lock().insert(ProviderId::new("p1"));

        let report = matcher.assign_cycle(&[job("j0", 10)], &NoPenalties, &sink, 0.0);
        assert!(report.assignments.is_empty());
        assert_eq!(report.unassigned.len(), 1);

        // the reservation was rolled back, so the provider can still take a
        // job once the sink recovers
        sink.fail.lock().clear();
        let report = matcher.assign_cycle(&[job("j1", 10)], &NoPenalties, &sink, 0.0);
        assert_eq!(report.assignments.len(), 1);
    }

    #[test]
    fn higher_priority_jobs_assign_first() {
        let mut matcher = Matcher::new(MatcherConfig {
            age_weight: 0.0,
            ..Default::default()
        });
        matcher.upsert_provider(active("p1", 1));
        let sink = RecordingSink::default();
        let cheap = job("cheap", 1);
        let rich = job("rich", 1_000);
        let report = matcher.assign_cycle(&[cheap, rich], &NoPenalties, &sink, 0.0);
        assert_eq!(report.assignments[0].job, JobId::new("rich"));
        assert_eq!(report.unassigned, vec![JobId::new("cheap")]);
    }

    #[test]
    fn tombstoned_provider_never_matches() {
        let mut matcher = Matcher::new(MatcherConfig::default());
        matcher.upsert_provider(active("p1", 5));
        matcher.tombstone(&ProviderId::new("p1"));
        let sink = RecordingSink::default();
        let report = matcher.assign_cycle(&[job("j0", 10)], &NoPenalties, &sink, 0.0);
        assert!(report.assignments.is_empty());
        assert!(matcher.provider(&ProviderId::new("p1")).unwrap().tombstoned);
    }
}
