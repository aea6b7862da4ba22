// Copyright 2022-2026 Animica Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Block-anchor store: links proof claims and settlement batches to the
//! block heights that produced them, so economic side-effects can be
//! inspected and rolled back cleanly on reorg.
//!
//! Upserts are idempotent: claims are unique on (height, job_id) and retries
//! replace the prior row; settlements key on settlement_id with items keyed
//! by payout_id. Every operation commits one atomic batch under a single
//! writer lock.

use byteorder::{BigEndian, ByteOrder};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::aicf::provider::{JobId, ProviderId};
use crate::db::{BatchOp, Store};
use crate::utils::Clock;

const COL_CLAIMS: u8 = 0;
const COL_SETTLEMENTS: u8 = 1;
const COL_SETTLEMENT_HEIGHT_IDX: u8 = 2;
const COL_SETTLEMENT_ITEMS: u8 = 3;
const COL_PAYOUT_IDX: u8 = 4;
const COL_SETTLEMENT_EPOCH_IDX: u8 = 5;

/// Number of KV columns the anchor store needs from its backend.
pub const ANCHOR_COLUMNS: u8 = 6;

#[derive(Debug, Error)]
pub enum AnchorError {
    #[error("settlement {0} not found")]
    SettlementNotFound(String),
    #[error("payout {0} not linked to a settlement")]
    PayoutNotFound(String),
    #[error(transparent)]
    Db(#[from] crate::db::Error),
    #[error("row decode failed: {0}")]
    Encoding(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProofClaim {
    pub height: u64,
    pub job_id: JobId,
    pub provider_id: ProviderId,
    pub tx_hash: Option<String>,
    pub payout_id: Option<String>,
    pub amount: Option<u64>,
    pub epoch: Option<u64>,
    #[serde(default)]
    pub meta: serde_json::Value,
    pub created_at: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settlement {
    pub settlement_id: String,
    pub height: u64,
    pub epoch: u64,
    pub batch_id: String,
    pub total_amount: u64,
    pub payout_count: u64,
    #[serde(default)]
    pub meta: serde_json::Value,
    pub created_at: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementItem {
    pub payout_id: String,
    pub settlement_id: String,
    pub provider_id: ProviderId,
    pub job_id: Option<JobId>,
    pub amount: u64,
}

/// One payout row passed into [`AnchorStore::record_settlement`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayoutInput {
    pub payout_id: String,
    pub provider_id: ProviderId,
    pub job_id: Option<JobId>,
    pub amount: u64,
}

fn claim_key(height: u64, job_id: &JobId) -> Vec<u8> {
    let mut key = vec![0u8; 8];
    BigEndian::write_u64(&mut key, height);
    key.extend_from_slice(job_id.0.as_bytes());
    key
}

fn height_prefix(height: u64) -> [u8; 8] {
    let mut key = [0u8; 8];
    BigEndian::write_u64(&mut key, height);
    key
}

fn height_index_key(height: u64, id: &str) -> Vec<u8> {
    let mut key = height_prefix(height).to_vec();
    key.extend_from_slice(id.as_bytes());
    key
}

/// Item keys length-prefix the settlement id so prefix scans cannot be
/// confused by ids that extend one another.
fn item_prefix(settlement_id: &str) -> Vec<u8> {
    let mut key = vec![0u8; 4];
    BigEndian::write_u32(&mut key, settlement_id.len() as u32);
    key.extend_from_slice(settlement_id.as_bytes());
    key
}

fn item_key(settlement_id: &str, payout_id: &str) -> Vec<u8> {
    let mut key = item_prefix(settlement_id);
    key.extend_from_slice(payout_id.as_bytes());
    key
}

pub struct AnchorStore<S, C> {
    db: S,
    clock: C,
    // single-writer rule: all mutating batches are built and committed
    // under this lock
    write_lock: Mutex<()>,
}

impl<S: Store, C: Clock> AnchorStore<S, C> {
    pub fn new(db: S, clock: C) -> Self {
        Self {
            db,
            clock,
            write_lock: Mutex::new(()),
        }
    }

    fn now(&self) -> u64 {
        self.clock.now().max(0.0) as u64
    }

    /// Idempotently record a proof claim against a block height; the latest
    /// row replaces any prior one for (height, job_id).
    #[allow(clippy::too_many_arguments)]
    pub fn record_proof_claim(
        &self,
        height: u64,
        job_id: &JobId,
        provider_id: &ProviderId,
        tx_hash: Option<String>,
        payout_id: Option<String>,
        amount: Option<u64>,
        epoch: Option<u64>,
        meta: serde_json::Value,
    ) -> Result<(), AnchorError> {
        let claim = ProofClaim {
            height,
            job_id: job_id.clone(),
            provider_id: provider_id.clone(),
            tx_hash,
            payout_id,
            amount,
            epoch,
            meta,
            created_at: self.now(),
        };
        let row = serde_json::to_vec(&claim)?;
        let _guard = self.write_lock.lock();
        self.db.commit(vec![BatchOp::put(
            COL_CLAIMS,
            claim_key(height, job_id),
            row,
        )])?;
        Ok(())
    }

    pub fn list_claims_at_height(&self, height: u64) -> Result<Vec<ProofClaim>, AnchorError> {
        self.db
            .iter_prefix(COL_CLAIMS, height_prefix(height))?
            .into_iter()
            .map(|(_, row)| serde_json::from_slice(&row).map_err(AnchorError::from))
            .collect()
    }

    /// Claims with height in `[start_height, end_height]`, ascending.
    pub fn list_claims_in_range(
        &self,
        start_height: u64,
        end_height: u64,
    ) -> Result<Vec<ProofClaim>, AnchorError> {
        let mut out = Vec::new();
        for (key, row) in self.db.iter_from(COL_CLAIMS, height_prefix(start_height))? {
            if BigEndian::read_u64(&key[..8]) > end_height {
                break;
            }
            out.push(serde_json::from_slice(&row)?);
        }
        Ok(out)
    }

    pub fn find_claims_by_job(&self, job_id: &JobId) -> Result<Vec<ProofClaim>, AnchorError> {
        let mut out: Vec<ProofClaim> = Vec::new();
        for (_, row) in self.db.iter_from(COL_CLAIMS, b"")? {
            let claim: ProofClaim = serde_json::from_slice(&row)?;
            if claim.job_id == *job_id {
                out.push(claim);
            }
        }
        Ok(out)
    }

    pub fn find_claim_by_tx_hash(&self, tx_hash: &str) -> Result<Option<ProofClaim>, AnchorError> {
        for (_, row) in self.db.iter_from(COL_CLAIMS, b"")? {
            let claim: ProofClaim = serde_json::from_slice(&row)?;
            if claim.tx_hash.as_deref() == Some(tx_hash) {
                return Ok(Some(claim));
            }
        }
        Ok(None)
    }

    /// Record a settlement batch at a height, upserting its payout items.
    pub fn record_settlement(
        &self,
        settlement_id: &str,
        height: u64,
        epoch: u64,
        batch_id: &str,
        total_amount: u64,
        payouts: &[PayoutInput],
        meta: serde_json::Value,
    ) -> Result<(), AnchorError> {
        let settlement = Settlement {
            settlement_id: settlement_id.to_string(),
            height,
            epoch,
            batch_id: batch_id.to_string(),
            total_amount,
            payout_count: payouts.len() as u64,
            meta,
            created_at: self.now(),
        };
        let row = serde_json::to_vec(&settlement)?;

        let _guard = self.write_lock.lock();
        let mut batch = Vec::with_capacity(3 + 2 * payouts.len());
        // a replacement may move the settlement to another height or epoch;
        // drop the stale index rows first
        if let Some(previous) = self.read_settlement(settlement_id)? {
            if previous.height != height {
                batch.push(BatchOp::delete(
                    COL_SETTLEMENT_HEIGHT_IDX,
                    height_index_key(previous.height, settlement_id),
                ));
            }
            if previous.epoch != epoch {
                batch.push(BatchOp::delete(
                    COL_SETTLEMENT_EPOCH_IDX,
                    height_index_key(previous.epoch, settlement_id),
                ));
            }
        }
        batch.push(BatchOp::put(COL_SETTLEMENTS, settlement_id.as_bytes(), row));
        batch.push(BatchOp::put(
            COL_SETTLEMENT_HEIGHT_IDX,
            height_index_key(height, settlement_id),
            settlement_id.as_bytes(),
        ));
        batch.push(BatchOp::put(
            COL_SETTLEMENT_EPOCH_IDX,
            height_index_key(epoch, settlement_id),
            settlement_id.as_bytes(),
        ));
        for payout in payouts {
            let item = SettlementItem {
                payout_id: payout.payout_id.clone(),
                settlement_id: settlement_id.to_string(),
                provider_id: payout.provider_id.clone(),
                job_id: payout.job_id.clone(),
                amount: payout.amount,
            };
            batch.push(BatchOp::put(
                COL_SETTLEMENT_ITEMS,
                item_key(settlement_id, &payout.payout_id),
                serde_json::to_vec(&item)?,
            ));
            batch.push(BatchOp::put(
                COL_PAYOUT_IDX,
                payout.payout_id.as_bytes(),
                settlement_id.as_bytes(),
            ));
        }
        self.db.commit(batch)?;
        Ok(())
    }

    fn read_settlement(&self, settlement_id: &str) -> Result<Option<Settlement>, AnchorError> {
        self.db
            .read(COL_SETTLEMENTS, settlement_id.as_bytes())?
            .map(|row| serde_json::from_slice(&row).map_err(AnchorError::from))
            .transpose()
    }

    pub fn get_settlement(
        &self,
        settlement_id: &str,
    ) -> Result<(Settlement, Vec<SettlementItem>), AnchorError> {
        let settlement = self
            .read_settlement(settlement_id)?
            .ok_or_else(|| AnchorError::SettlementNotFound(settlement_id.to_string()))?;
        let items = self.list_settlement_items(settlement_id)?;
        Ok((settlement, items))
    }

    pub fn list_settlement_items(
        &self,
        settlement_id: &str,
    ) -> Result<Vec<SettlementItem>, AnchorError> {
        self.db
            .iter_prefix(COL_SETTLEMENT_ITEMS, item_prefix(settlement_id))?
            .into_iter()
            .map(|(_, row)| serde_json::from_slice(&row).map_err(AnchorError::from))
            .collect()
    }

    pub fn list_settlements_at_height(&self, height: u64) -> Result<Vec<Settlement>, AnchorError> {
        self.db
            .iter_prefix(COL_SETTLEMENT_HEIGHT_IDX, height_prefix(height))?
            .into_iter()
            .map(|(_, id)| {
                let id = String::from_utf8_lossy(&id).to_string();
                self.read_settlement(&id)?
                    .ok_or(AnchorError::SettlementNotFound(id))
            })
            .collect()
    }

    pub fn list_settlements_by_epoch(&self, epoch: u64) -> Result<Vec<Settlement>, AnchorError> {
        let mut settlements: Vec<Settlement> = self
            .db
            .iter_prefix(COL_SETTLEMENT_EPOCH_IDX, height_prefix(epoch))?
            .into_iter()
            .map(|(_, id)| {
                let id = String::from_utf8_lossy(&id).to_string();
                self.read_settlement(&id)?
                    .ok_or(AnchorError::SettlementNotFound(id))
            })
            .collect::<Result<_, _>>()?;
        settlements.sort_by(|a, b| {
            a.height
                .cmp(&b.height)
                .then_with(|| a.settlement_id.cmp(&b.settlement_id))
        });
        Ok(settlements)
    }

    pub fn find_settlement_by_payout(&self, payout_id: &str) -> Result<Settlement, AnchorError> {
        let settlement_id = self
            .db
            .read(COL_PAYOUT_IDX, payout_id.as_bytes())?
            .ok_or_else(|| AnchorError::PayoutNotFound(payout_id.to_string()))?;
        let settlement_id = String::from_utf8_lossy(&settlement_id).to_string();
        self.read_settlement(&settlement_id)?
            .ok_or(AnchorError::SettlementNotFound(settlement_id))
    }

    /// Delete claims and settlements strictly above `height`; settlement
    /// items cascade. Returns (claims_deleted, settlements_deleted).
    pub fn prune_above(&self, height: u64) -> Result<(u64, u64), AnchorError> {
        let _guard = self.write_lock.lock();
        let mut batch = Vec::new();

        let mut claims_deleted = 0u64;
        for (key, _) in self
            .db
            .iter_from(COL_CLAIMS, height_prefix(height.saturating_add(1)))?
        {
            batch.push(BatchOp::delete(COL_CLAIMS, key));
            claims_deleted += 1;
        }

        let mut settlements_deleted = 0u64;
        for (key, id) in self.db.iter_from(
            COL_SETTLEMENT_HEIGHT_IDX,
            height_prefix(height.saturating_add(1)),
        )? {
            let settlement_id = String::from_utf8_lossy(&id).to_string();
            if let Some(settlement) = self.read_settlement(&settlement_id)? {
                batch.push(BatchOp::delete(
                    COL_SETTLEMENT_EPOCH_IDX,
                    height_index_key(settlement.epoch, &settlement_id),
                ));
            }
            for (item_key, item_row) in self
                .db
                .iter_prefix(COL_SETTLEMENT_ITEMS, item_prefix(&settlement_id))?
            {
                let item: SettlementItem = serde_json::from_slice(&item_row)?;
                batch.push(BatchOp::delete(COL_SETTLEMENT_ITEMS, item_key));
                batch.push(BatchOp::delete(COL_PAYOUT_IDX, item.payout_id.into_bytes()));
            }
            batch.push(BatchOp::delete(
                COL_SETTLEMENTS,
                settlement_id.into_bytes(),
            ));
            batch.push(BatchOp::delete(COL_SETTLEMENT_HEIGHT_IDX, key));
            settlements_deleted += 1;
        }

        self.db.commit(batch)?;
        Ok((claims_deleted, settlements_deleted))
    }
}
