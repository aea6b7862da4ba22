// Copyright 2022-2026 Animica Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Block selection: pack pending transactions under gas and byte budgets,
//! keeping every sender's inclusions strictly nonce-ascending.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use super::pool::{Address, Mempool, Tx, TxId};

#[derive(Debug, Clone, Copy)]
pub struct BlockBudgets {
    pub gas_limit: u64,
    pub byte_limit: u64,
}

impl BlockBudgets {
    pub fn gas_only(gas_limit: u64) -> Self {
        Self {
            gas_limit,
            byte_limit: u64::MAX,
        }
    }
}

/// Heap entry. Greater = selected earlier: higher priority wins, then lower
/// gas, then lower txid. The txid tiebreak makes the order strictly total,
/// so selection is deterministic.
struct Candidate {
    priority: f64,
    gas: u64,
    id: TxId,
    sender: Address,
    nonce: u64,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .total_cmp(&other.priority)
            .then_with(|| other.gas.cmp(&self.gas))
            .then_with(|| other.id.cmp(&self.id))
    }
}

impl Mempool {
    /// Select transactions for the next block.
    ///
    /// Each sender is represented in the heap by its lowest pending nonce.
    /// A popped transaction that fits both budgets is included and the
    /// sender's next nonce enters the heap; one that does not fit is
    /// skipped and the sender contributes nothing further this round.
    pub fn select_transactions(&self, budgets: BlockBudgets, now: f64) -> Vec<Tx> {
        let mut heap: BinaryHeap<Candidate> = BinaryHeap::new();
        for (sender, queue) in &self.pending {
            if let Some((nonce, tx)) = queue.txs.iter().next() {
                heap.push(Candidate {
                    priority: self.priority(tx, now),
                    gas: tx.gas,
                    id: tx.id,
                    sender: sender.clone(),
                    nonce: *nonce,
                });
            }
        }

        let mut selected = Vec::new();
        let mut gas_used = 0u64;
        let mut bytes_used = 0u64;

        while let Some(candidate) = heap.pop() {
            if gas_used >= budgets.gas_limit && bytes_used >= budgets.byte_limit {
                break;
            }
            let queue = match self.pending.get(&candidate.sender) {
                Some(q) => q,
                None => continue,
            };
            let tx = match queue.txs.get(&candidate.nonce) {
                Some(tx) => tx,
                None => continue,
            };

            let fits = gas_used.saturating_add(tx.gas) <= budgets.gas_limit
                && bytes_used.saturating_add(tx.size) <= budgets.byte_limit;
            if !fits {
                // sender queue is not advanced; nothing further from this
                // sender can be nonce-valid in this block
                continue;
            }

            gas_used += tx.gas;
            bytes_used += tx.size;
            selected.push(tx.clone());

            if let Some((next_nonce, next_tx)) =
                queue.txs.range(candidate.nonce + 1..).next()
            {
                heap.push(Candidate {
                    priority: self.priority(next_tx, now),
                    gas: next_tx.gas,
                    id: next_tx.id,
                    sender: candidate.sender,
                    nonce: *next_nonce,
                });
            }
        }
        selected
    }
}
