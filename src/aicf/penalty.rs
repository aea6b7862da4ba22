// Copyright 2022-2026 Animica Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Provider penalties: slashing, jailing, and cooldowns.
//!
//! The engine is deterministic: identical inputs and clock values produce
//! bit-identical outcomes. Stake reads and stake deductions are delegated to
//! injected hooks; hook callbacks run under the per-provider record lock and
//! must not block.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::aicf::provider::ProviderId;
use crate::utils::Clock;

/// Stable reason codes for slashing decisions, used in metrics and audits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SlashReason {
    InvalidProof,
    MissedDeadline,
    LeaseViolation,
    DoubleSubmit,
    BadAttestation,
    MalformedResult,
    UnauthorizedRegion,
    DosAbuse,
    HealthTimeout,
    Other,
}

impl SlashReason {
    pub fn as_str(self) -> &'static str {
        match self {
            SlashReason::InvalidProof => "INVALID_PROOF",
            SlashReason::MissedDeadline => "MISSED_DEADLINE",
            SlashReason::LeaseViolation => "LEASE_VIOLATION",
            SlashReason::DoubleSubmit => "DOUBLE_SUBMIT",
            SlashReason::BadAttestation => "BAD_ATTESTATION",
            SlashReason::MalformedResult => "MALFORMED_RESULT",
            SlashReason::UnauthorizedRegion => "UNAUTHORIZED_REGION",
            SlashReason::DosAbuse => "DOS_ABUSE",
            SlashReason::HealthTimeout => "HEALTH_TIMEOUT",
            SlashReason::Other => "OTHER",
        }
    }
}

/// Tunable policy knobs. Ratios apply to the provider's current stake
/// unless the caller passes an absolute amount; results are clamped to
/// `[min_slash, max_slash]`. Jail and cooldown durations ramp with
/// consecutive offenses inside the offense window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PenaltyConfig {
    pub slash_ratio_by_reason: BTreeMap<SlashReason, f64>,
    pub jail_seconds_by_reason: BTreeMap<SlashReason, u64>,
    pub cooldown_seconds_by_reason: BTreeMap<SlashReason, u64>,
    pub min_slash: f64,
    pub max_slash: f64,
    pub offense_window_seconds: u64,
    /// Scaling factor applied as `multiplier^(consecutive - 1)`.
    pub consecutive_multiplier: f64,
    /// Absolute jail bound relative to now; 0 disables the cap.
    pub max_jail_seconds: u64,
    /// Absolute cooldown bound relative to now; 0 disables the cap.
    pub max_cooldown_seconds: u64,
}

impl Default for PenaltyConfig {
    fn default() -> Self {
        use SlashReason::*;
        let slash_ratio_by_reason = BTreeMap::from([
            (InvalidProof, 0.10),
            (MissedDeadline, 0.01),
            (LeaseViolation, 0.04),
            (DoubleSubmit, 0.06),
            (BadAttestation, 0.08),
            (MalformedResult, 0.02),
            (UnauthorizedRegion, 0.015),
            (DosAbuse, 0.05),
            (HealthTimeout, 0.005),
            (Other, 0.01),
        ]);
        let jail_seconds_by_reason = BTreeMap::from([
            (InvalidProof, 24 * 3600),
            (MissedDeadline, 2 * 3600),
            (LeaseViolation, 6 * 3600),
            (DoubleSubmit, 12 * 3600),
            (BadAttestation, 24 * 3600),
            (MalformedResult, 3600),
            (UnauthorizedRegion, 3 * 3600),
            (DosAbuse, 24 * 3600),
            (HealthTimeout, 30 * 60),
            (Other, 2 * 3600),
        ]);
        let cooldown_seconds_by_reason = BTreeMap::from([
            (InvalidProof, 6 * 3600),
            (MissedDeadline, 30 * 60),
            (LeaseViolation, 2 * 3600),
            (DoubleSubmit, 3 * 3600),
            (BadAttestation, 3 * 3600),
            (MalformedResult, 15 * 60),
            (UnauthorizedRegion, 45 * 60),
            (DosAbuse, 6 * 3600),
            (HealthTimeout, 10 * 60),
            (Other, 30 * 60),
        ]);
        Self {
            slash_ratio_by_reason,
            jail_seconds_by_reason,
            cooldown_seconds_by_reason,
            min_slash: 0.0,
            max_slash: 100_000.0,
            offense_window_seconds: 24 * 3600,
            consecutive_multiplier: 1.35,
            max_jail_seconds: 7 * 24 * 3600,
            max_cooldown_seconds: 24 * 3600,
        }
    }
}

/// Per-provider penalty state. Offense history is purged on every insert,
/// so it never outgrows the rolling window.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PenaltyRecord {
    pub jailed_until: f64,
    pub cooldown_until: f64,
    pub total_slashed: f64,
    pub offenses: Vec<(f64, SlashReason)>,
}

impl PenaltyRecord {
    fn purge_old(&mut self, now: f64, window: u64) {
        let cutoff = now - window as f64;
        self.offenses.retain(|(ts, _)| *ts >= cutoff);
    }

    /// Most recent contiguous run of offenses. Offenses of different
    /// reasons still count as consecutive within the window.
    fn consecutive_offenses(&self) -> u32 {
        let mut count = 0;
        let mut last_ts: Option<f64> = None;
        for (ts, _) in self.offenses.iter().rev() {
            match last_ts {
                None => {
                    count += 1;
                    last_ts = Some(*ts);
                }
                Some(last) if *ts <= last => {
                    count += 1;
                    last_ts = Some(*ts);
                }
                Some(_) => break,
            }
        }
        count
    }
}

/// Structured result of one penalty application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlashOutcome {
    pub provider_id: ProviderId,
    pub reason: SlashReason,
    pub slashed_amount: f64,
    pub consecutive_count: u32,
    pub jailed_until: f64,
    pub cooldown_until: f64,
    pub notes: String,
}

pub trait StakeReader: Send + Sync {
    fn stake(&self, provider: &ProviderId) -> u64;
}

pub trait SlashHook: Send + Sync {
    fn slash(&self, provider: &ProviderId, amount: f64);
}

/// No-op hook for deployments that settle slashes out of band.
pub struct NullSlashHook;

impl SlashHook for NullSlashHook {
    fn slash(&self, _provider: &ProviderId, _amount: f64) {}
}

/// Read of jail/cooldown state, the seam the matcher depends on.
pub trait PenaltyView {
    fn is_jailed(&self, provider: &ProviderId) -> bool;
    fn is_on_cooldown(&self, provider: &ProviderId) -> bool;
}

pub struct PenaltyEngine<S, H, C> {
    config: PenaltyConfig,
    stake_reader: S,
    slash_hook: H,
    clock: C,
    records: RwLock<HashMap<ProviderId, Arc<Mutex<PenaltyRecord>>>>,
}

impl<S: StakeReader, H: SlashHook, C: Clock> PenaltyEngine<S, H, C> {
    pub fn new(config: PenaltyConfig, stake_reader: S, slash_hook: H, clock: C) -> Self {
        Self {
            config,
            stake_reader,
            slash_hook,
            clock,
            records: RwLock::new(HashMap::new()),
        }
    }

    fn record(&self, provider: &ProviderId) -> Arc<Mutex<PenaltyRecord>> {
        if let Some(record) = self.records.read().get(provider) {
            return record.clone();
        }
        self.records
            .write()
            .entry(provider.clone())
            .or_default()
            .clone()
    }

    /// Snapshot of the provider's penalty state.
    pub fn record_for(&self, provider: &ProviderId) -> PenaltyRecord {
        self.record(provider).lock().clone()
    }

    fn now_or(&self, now: Option<f64>) -> f64 {
        now.unwrap_or_else(|| self.clock.now())
    }

    pub fn jail(&self, provider: &ProviderId, seconds: u64, now: Option<f64>) -> f64 {
        let now = self.now_or(now);
        let record = self.record(provider);
        let mut record = record.lock();
        let capped = cap_until(now + seconds as f64, now, self.config.max_jail_seconds);
        record.jailed_until = record.jailed_until.max(capped);
        record.jailed_until
    }

    pub fn unjail(&self, provider: &ProviderId) {
        self.record(provider).lock().jailed_until = 0.0;
    }

    pub fn set_cooldown(&self, provider: &ProviderId, seconds: u64, now: Option<f64>) -> f64 {
        let now = self.now_or(now);
        let record = self.record(provider);
        let mut record = record.lock();
        let capped = cap_until(now + seconds as f64, now, self.config.max_cooldown_seconds);
        record.cooldown_until = record.cooldown_until.max(capped);
        record.cooldown_until
    }

    pub fn clear_cooldown(&self, provider: &ProviderId) {
        self.record(provider).lock().cooldown_until = 0.0;
    }

    /// Compute and apply slash, jail, and cooldown for one violation.
    ///
    /// Never errors on policy outcomes; the structured result tells the
    /// caller what was applied.
    pub fn apply_slash_and_penalties(
        &self,
        provider: &ProviderId,
        reason: SlashReason,
        explicit_slash_amount: Option<f64>,
        now: Option<f64>,
    ) -> SlashOutcome {
        let cfg = &self.config;
        let now = self.now_or(now);
        let record = self.record(provider);
        let mut record = record.lock();

        record.purge_old(now, cfg.offense_window_seconds);
        record.offenses.push((now, reason));
        let consecutive = record.consecutive_offenses();

        let base_ratio = cfg
            .slash_ratio_by_reason
            .get(&reason)
            .copied()
            .unwrap_or(0.0);
        let stake = self.stake_reader.stake(provider) as f64;
        let raw = explicit_slash_amount.unwrap_or(stake * base_ratio);
        let scaled = scale_by_consecutive(raw, consecutive, cfg.consecutive_multiplier);
        let slashed = scaled.clamp(cfg.min_slash, cfg.max_slash);

        if slashed > 0.0 {
            self.slash_hook.slash(provider, slashed);
        }
        record.total_slashed += slashed;

        let jail_base = cfg.jail_seconds_by_reason.get(&reason).copied().unwrap_or(0);
        let jail_seconds =
            scale_duration(jail_base, consecutive, cfg.consecutive_multiplier, cfg.max_jail_seconds);
        if jail_seconds > 0 {
            let capped = cap_until(now + jail_seconds as f64, now, cfg.max_jail_seconds);
            record.jailed_until = record.jailed_until.max(capped);
        }

        let cd_base = cfg
            .cooldown_seconds_by_reason
            .get(&reason)
            .copied()
            .unwrap_or(0);
        let cooldown_seconds = scale_duration(
            cd_base,
            consecutive,
            cfg.consecutive_multiplier,
            cfg.max_cooldown_seconds,
        );
        if cooldown_seconds > 0 {
            let capped = cap_until(now + cooldown_seconds as f64, now, cfg.max_cooldown_seconds);
            record.cooldown_until = record.cooldown_until.max(capped);
        }

        let notes = format!(
            "stake={stake:.6}, base_ratio={base_ratio:.4}, consecutive={consecutive}, \
             jail={jail_seconds}s, cooldown={cooldown_seconds}s"
        );
        SlashOutcome {
            provider_id: provider.clone(),
            reason,
            slashed_amount: slashed,
            consecutive_count: consecutive,
            jailed_until: record.jailed_until,
            cooldown_until: record.cooldown_until,
            notes,
        }
    }
}

impl<S: StakeReader, H: SlashHook, C: Clock> PenaltyView for PenaltyEngine<S, H, C> {
    fn is_jailed(&self, provider: &ProviderId) -> bool {
        self.record(provider).lock().jailed_until > self.clock.now()
    }

    fn is_on_cooldown(&self, provider: &ProviderId) -> bool {
        self.record(provider).lock().cooldown_until > self.clock.now()
    }
}

fn scale_by_consecutive(amount: f64, consecutive: u32, multiplier: f64) -> f64 {
    if consecutive <= 1 {
        amount
    } else {
        amount * multiplier.powi(consecutive as i32 - 1)
    }
}

fn scale_duration(base_seconds: u64, consecutive: u32, multiplier: f64, max_cap: u64) -> u64 {
    if base_seconds == 0 {
        return 0;
    }
    let mut duration = if consecutive <= 1 {
        base_seconds as f64
    } else {
        base_seconds as f64 * multiplier.powi(consecutive as i32 - 1)
    };
    if max_cap > 0 {
        duration = duration.min(max_cap as f64);
    }
    // round up so ramped penalties are never under-applied
    duration.ceil() as u64
}

fn cap_until(until: f64, now: f64, max_seconds: u64) -> f64 {
    if max_seconds == 0 {
        until
    } else {
        until.min(now + max_seconds as f64)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex as SyncMutex;

    use super::*;
    use crate::utils::ManualClock;

    struct FixedStake(u64);

    impl StakeReader for FixedStake {
        fn stake(&self, _provider: &ProviderId) -> u64 {
            self.0
        }
    }

    #[derive(Default)]
    struct RecordingHook {
        calls: SyncMutex<Vec<(ProviderId, f64)>>,
    }

    impl SlashHook for Arc<RecordingHook> {
        fn slash(&self, provider: &ProviderId, amount: f64) {
            self.calls.lock().push((provider.clone(), amount));
        }
    }

    fn engine(
        stake: u64,
        clock: Arc<ManualClock>,
    ) -> (
        PenaltyEngine<FixedStake, Arc<RecordingHook>, Arc<ManualClock>>,
        Arc<RecordingHook>,
    ) {
        let hook = Arc::new(RecordingHook::default());
        let engine = PenaltyEngine::new(
            PenaltyConfig::default(),
            FixedStake(stake),
            hook.clone(),
            clock,
        );
        (engine, hook)
    }

    #[test]
    fn offense_ramp_scales_slash_and_jail() {
        let clock = Arc::new(ManualClock::new(1_000.0));
        let (engine, hook) = engine(1_000_000, clock.clone());
        let provider = ProviderId::new("prov_01");

        let first = engine.apply_slash_and_penalties(
            &provider,
            SlashReason::MissedDeadline,
            None,
            Some(1_000.0),
        );
        assert!((first.slashed_amount - 10_000.0).abs() < 1e-9);
        assert_eq!(first.consecutive_count, 1);
        assert!((first.jailed_until - (1_000.0 + 7_200.0)).abs() < 1e-9);
        assert!((first.cooldown_until - (1_000.0 + 1_800.0)).abs() < 1e-9);

        clock.advance(60.0);
        let second = engine.apply_slash_and_penalties(
            &provider,
            SlashReason::MissedDeadline,
            None,
            Some(1_060.0),
        );
        assert!((second.slashed_amount - 13_500.0).abs() < 1e-6);
        assert_eq!(second.consecutive_count, 2);
        // ceil(7200 * 1.35) = 9720
        assert!((second.jailed_until - (1_060.0 + 9_720.0)).abs() < 1e-9);

        let calls = hook.calls.lock();
        assert_eq!(calls.len(), 2);
        assert!((calls[1].1 - 13_500.0).abs() < 1e-6);
    }

    #[test]
    fn determinism_given_same_inputs() {
        let run = || {
            let clock = Arc::new(ManualClock::new(0.0));
            let (engine, _) = engine(500_000, clock);
            let provider = ProviderId::new("p");
            let mut outcomes = Vec::new();
            for (t, reason) in [
                (10.0, SlashReason::InvalidProof),
                (20.0, SlashReason::DosAbuse),
                (30.0, SlashReason::InvalidProof),
            ] {
                outcomes.push(engine.apply_slash_and_penalties(&provider, reason, None, Some(t)));
            }
            outcomes
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn different_reasons_still_count_consecutive() {
        let clock = Arc::new(ManualClock::new(0.0));
        let (engine, _) = engine(100, clock);
        let provider = ProviderId::new("p");
        engine.apply_slash_and_penalties(&provider, SlashReason::Other, None, Some(1.0));
        let second =
            engine.apply_slash_and_penalties(&provider, SlashReason::DosAbuse, None, Some(2.0));
        assert_eq!(second.consecutive_count, 2);
    }

    #[test]
    fn offenses_outside_window_are_purged() {
        let clock = Arc::new(ManualClock::new(0.0));
        let (engine, _) = engine(1_000, clock);
        let provider = ProviderId::new("p");
        engine.apply_slash_and_penalties(&provider, SlashReason::Other, None, Some(0.0));
        // next offense lands a full window later
        let late = engine.apply_slash_and_penalties(
            &provider,
            SlashReason::Other,
            None,
            Some(25.0 * 3600.0),
        );
        assert_eq!(late.consecutive_count, 1);
        assert_eq!(engine.record_for(&provider).offenses.len(), 1);
    }

    #[test]
    fn explicit_amount_overrides_ratio_and_clamps() {
        let clock = Arc::new(ManualClock::new(0.0));
        let (engine, hook) = engine(10, clock);
        let provider = ProviderId::new("p");
        let outcome = engine.apply_slash_and_penalties(
            &provider,
            SlashReason::Other,
            Some(1e9),
            Some(0.0),
        );
        assert!((outcome.slashed_amount - 100_000.0).abs() < 1e-9);
        assert_eq!(hook.calls.lock().len(), 1);
    }

    #[test]
    fn jail_never_shrinks_and_caps_apply() {
        let clock = Arc::new(ManualClock::new(0.0));
        let (engine, _) = engine(0, clock.clone());
        let provider = ProviderId::new("p");
        let until = engine.jail(&provider, 3600, Some(0.0));
        assert_eq!(until, 3600.0);
        // shorter re-jail keeps the longer sentence
        assert_eq!(engine.jail(&provider, 60, Some(0.0)), 3600.0);
        // absurd sentence clamps to the configured maximum
        let capped = engine.jail(&provider, 365 * 24 * 3600, Some(0.0));
        assert_eq!(capped, (7 * 24 * 3600) as f64);
        assert!(engine.is_jailed(&provider));
        engine.unjail(&provider);
        assert!(!engine.is_jailed(&provider));
    }

    #[test]
    fn cooldown_gates_eligibility_until_expiry() {
        let clock = Arc::new(ManualClock::new(0.0));
        let (engine, _) = engine(0, clock.clone());
        let provider = ProviderId::new("p");
        engine.set_cooldown(&provider, 100, Some(0.0));
        assert!(engine.is_on_cooldown(&provider));
        clock.set(101.0);
        assert!(!engine.is_on_cooldown(&provider));
    }

    #[test]
    fn zero_stake_slashes_nothing_but_still_jails() {
        let clock = Arc::new(ManualClock::new(0.0));
        let (engine, hook) = engine(0, clock);
        let provider = ProviderId::new("p");
        let outcome = engine.apply_slash_and_penalties(
            &provider,
            SlashReason::InvalidProof,
            None,
            Some(0.0),
        );
        assert_eq!(outcome.slashed_amount, 0.0);
        assert!(hook.calls.lock().is_empty());
        assert!(outcome.jailed_until > 0.0);
    }
}
