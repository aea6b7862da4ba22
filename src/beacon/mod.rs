// Copyright 2022-2026 Animica Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Commit-reveal randomness beacon.
//!
//! Time is divided into rounds of `commit + reveal + settle` seconds. A
//! participant commits `sha3_256("commit" ‖ address ‖ salt ‖ payload)`
//! during the commit window and discloses `(salt, payload)` during the
//! reveal window; settled rounds fold the revealed payloads into one
//! randomness value. Any mutation of address, salt, or payload invalidates
//! the reveal.

use std::collections::{BTreeMap, HashMap};

use byteorder::{BigEndian, ByteOrder};
use parking_lot::Mutex;
use thiserror::Error;

use crate::utils::{sha3_256_concat, Clock};

const COMMIT_TAG: &[u8] = b"commit";
const SETTLE_TAG: &[u8] = b"settle";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundSchedule {
    pub commit_len: u64,
    pub reveal_len: u64,
    pub settle_len: u64,
}

impl RoundSchedule {
    pub fn total(&self) -> u64 {
        self.commit_len + self.reveal_len + self.settle_len
    }

    pub fn round_at(&self, now: f64) -> u64 {
        (now / self.total() as f64).floor() as u64
    }

    fn offset_at(&self, now: f64) -> f64 {
        now - (self.round_at(now) * self.total()) as f64
    }

    fn in_commit_window(&self, offset: f64) -> bool {
        offset >= 0.0 && offset < self.commit_len as f64
    }

    fn in_reveal_window(&self, offset: f64) -> bool {
        offset >= self.commit_len as f64 && offset < (self.commit_len + self.reveal_len) as f64
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BeaconError {
    #[error("commit window closed at round offset {offset_s:.1}s")]
    CommitWindowClosed { offset_s: OffsetSecs },
    #[error("reveal window closed at round offset {offset_s:.1}s")]
    RevealWindowClosed { offset_s: OffsetSecs },
    #[error("no commitment from {0} in this round")]
    NoCommitment(String),
    #[error("reveal does not match the stored commitment")]
    CommitmentMismatch,
    #[error("round {0} has no reveals to settle")]
    NothingToSettle(u64),
}

/// f64 wrapper so the error enum can stay `Eq` for test assertions.
#[derive(Debug, Clone, Copy)]
pub struct OffsetSecs(pub f64);

impl PartialEq for OffsetSecs {
    fn eq(&self, other: &Self) -> bool {
        self.0.to_bits() == other.0.to_bits()
    }
}

impl Eq for OffsetSecs {}

impl std::fmt::Display for OffsetSecs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub fn commitment_digest(address: &str, salt: &[u8], payload: &[u8]) -> [u8; 32] {
    sha3_256_concat([COMMIT_TAG, address.as_bytes(), salt, payload])
}

#[derive(Debug, Clone)]
struct CommitEntry {
    digest: [u8; 32],
    committed_at: f64,
}

#[derive(Debug, Default)]
struct RoundState {
    commits: HashMap<String, CommitEntry>,
    reveals: BTreeMap<String, Vec<u8>>,
}

pub struct CommitRevealBeacon<C> {
    schedule: RoundSchedule,
    clock: C,
    rounds: Mutex<HashMap<u64, RoundState>>,
}

impl<C: Clock> CommitRevealBeacon<C> {
    pub fn new(schedule: RoundSchedule, clock: C) -> Self {
        Self {
            schedule,
            clock,
            rounds: Mutex::new(HashMap::new()),
        }
    }

    pub fn schedule(&self) -> RoundSchedule {
        self.schedule
    }

    fn now_or(&self, now: Option<f64>) -> f64 {
        now.unwrap_or_else(|| self.clock.now())
    }

    /// Store a commitment digest. Re-commits inside the window overwrite
    /// the previous digest.
    pub fn commit(
        &self,
        address: &str,
        digest: [u8; 32],
        now: Option<f64>,
    ) -> Result<u64, BeaconError> {
        let now = self.now_or(now);
        let offset = self.schedule.offset_at(now);
        if !self.schedule.in_commit_window(offset) {
            return Err(BeaconError::CommitWindowClosed {
                offset_s: OffsetSecs(offset),
            });
        }
        let round = self.schedule.round_at(now);
        self.rounds.lock().entry(round).or_default().commits.insert(
            address.to_string(),
            CommitEntry {
                digest,
                committed_at: now,
            },
        );
        Ok(round)
    }

    /// Disclose `(salt, payload)` for this round's commitment.
    pub fn reveal(
        &self,
        address: &str,
        salt: &[u8],
        payload: &[u8],
        now: Option<f64>,
    ) -> Result<u64, BeaconError> {
        let now = self.now_or(now);
        let offset = self.schedule.offset_at(now);
        if !self.schedule.in_reveal_window(offset) {
            return Err(BeaconError::RevealWindowClosed {
                offset_s: OffsetSecs(offset),
            });
        }
        let round = self.schedule.round_at(now);
        let mut rounds = self.rounds.lock();
        let state = rounds
            .get_mut(&round)
            .ok_or_else(|| BeaconError::NoCommitment(address.to_string()))?;
        let entry = state
            .commits
            .get(address)
            .ok_or_else(|| BeaconError::NoCommitment(address.to_string()))?;
        if now < entry.committed_at {
            return Err(BeaconError::RevealWindowClosed {
                offset_s: OffsetSecs(offset),
            });
        }
        if commitment_digest(address, salt, payload) != entry.digest {
            return Err(BeaconError::CommitmentMismatch);
        }
        state.reveals.insert(address.to_string(), payload.to_vec());
        Ok(round)
    }

    /// Fold the round's revealed payloads (ordered by address) into the
    /// round randomness.
    pub fn settle(&self, round: u64) -> Result<[u8; 32], BeaconError> {
        let rounds = self.rounds.lock();
        let state = rounds
            .get(&round)
            .filter(|state| !state.reveals.is_empty())
            .ok_or(BeaconError::NothingToSettle(round))?;

        let mut round_be = [0u8; 8];
        BigEndian::write_u64(&mut round_be, round);
        let mut parts: Vec<&[u8]> = vec![SETTLE_TAG, &round_be];
        for (address, payload) in &state.reveals {
            parts.push(address.as_bytes());
            parts.push(payload);
        }
        Ok(sha3_256_concat(parts))
    }

    /// Addresses that revealed in a round.
    pub fn reveals(&self, round: u64) -> Vec<String> {
        self.rounds
            .lock()
            .get(&round)
            .map(|state| state.reveals.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Drop state for rounds older than `keep_from`.
    pub fn prune_rounds_before(&self, keep_from: u64) {
        self.rounds.lock().retain(|round, _| *round >= keep_from);
    }
}
