// Copyright 2022-2026 Animica Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use super::config::{MempoolConfig, RBF_DENOM, RBF_NUM};
use super::errors::Error;

/// Transaction identifier; a 32-byte digest of the signed payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TxId(pub [u8; 32]);

impl std::fmt::Display for TxId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Address(pub String);

impl Address {
    pub fn new(addr: impl Into<String>) -> Self {
        Address(addr.into())
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tx {
    pub id: TxId,
    pub sender: Address,
    pub nonce: u64,
    pub fee: u64,
    pub gas: u64,
    pub size: u64,
    /// Seconds timestamp at admission; feeds the age term of the priority.
    pub received_at: f64,
}

impl Tx {
    pub fn fee_per_gas(&self) -> f64 {
        self.fee as f64 / self.gas.max(1) as f64
    }
}

/// Per-sender pending set, ordered by nonce. Selection always consumes from
/// the lowest pending nonce upward.
#[derive(Debug, Default, Clone)]
pub(crate) struct SenderQueue {
    pub(crate) txs: BTreeMap<u64, Tx>,
}

impl SenderQueue {
    /// Add a transaction, enforcing the replace-by-fee rule on nonce
    /// collisions.
    fn add(&mut self, tx: Tx) -> Result<Option<Tx>, Error> {
        if let Some(existing) = self.txs.get(&tx.nonce) {
            if existing.id == tx.id {
                return Err(Error::DuplicateNonce {
                    sender: tx.sender,
                    nonce: tx.nonce,
                });
            }
            let min_fee = existing.fee + (existing.fee * RBF_NUM) / RBF_DENOM + 1;
            if tx.fee < min_fee {
                return Err(Error::FeeTooLow {
                    sender: tx.sender,
                    nonce: tx.nonce,
                });
            }
        }
        Ok(self.txs.insert(tx.nonce, tx))
    }
}

/// The transaction pool. Admission is bounded; overflow is a policy
/// rejection the caller surfaces, not a silent drop.
#[derive(Debug, Default)]
pub struct Mempool {
    config: MempoolConfig,
    pub(crate) pending: HashMap<Address, SenderQueue>,
    len: usize,
}

impl Mempool {
    pub fn new(config: MempoolConfig) -> Self {
        Self {
            config,
            pending: HashMap::new(),
            len: 0,
        }
    }

    pub fn config(&self) -> &MempoolConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Admit a transaction into the pool.
    pub fn add(&mut self, tx: Tx) -> Result<(), Error> {
        if tx.gas == 0 {
            return Err(Error::ZeroGas);
        }
        let replacing = self
            .pending
            .get(&tx.sender)
            .is_some_and(|q| q.txs.contains_key(&tx.nonce));
        if !replacing && self.len >= self.config.max_pool_size {
            return Err(Error::PoolFull);
        }
        let queue = self.pending.entry(tx.sender.clone()).or_default();
        let evicted = queue.add(tx)?;
        if evicted.is_none() {
            self.len += 1;
        }
        Ok(())
    }

    /// Remove one pending transaction, e.g. once applied in a block.
    pub fn remove(&mut self, sender: &Address, nonce: u64) -> Option<Tx> {
        let queue = self.pending.get_mut(sender)?;
        let removed = queue.txs.remove(&nonce);
        if removed.is_some() {
            self.len -= 1;
            if queue.txs.is_empty() {
                self.pending.remove(sender);
            }
        }
        removed
    }

    /// All pending transactions of one sender, ascending by nonce.
    pub fn pending_for(&self, sender: &Address) -> Vec<Tx> {
        self.pending
            .get(sender)
            .map(|q| q.txs.values().cloned().collect())
            .unwrap_or_default()
    }

    pub(crate) fn priority(&self, tx: &Tx, now: f64) -> f64 {
        let age = (now - tx.received_at).max(0.0);
        tx.fee_per_gas() * self.config.bias_for(&tx.sender) + self.config.age_weight * age
    }
}

#[cfg(test)]
pub(crate) fn test_tx(sender: &str, nonce: u64, fee: u64, gas: u64, size: u64, id_byte: u8) -> Tx {
    let mut id = [0u8; 32];
    id[0] = nonce as u8;
    id[1] = id_byte;
    Tx {
        id: TxId(id),
        sender: Address::new(sender),
        nonce,
        fee,
        gas,
        size,
        received_at: 0.0,
    }
}
