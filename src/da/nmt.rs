// Copyright 2022-2026 Animica Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Namespaced Merkle tree.
//!
//! Leaves are `(namespace, data)` pairs sorted by `(namespace, insertion
//! index)` with a stable sort. Leaf hash is
//! `sha3_256(0x00 ‖ uvarint(ns) ‖ data)`, node hash
//! `sha3_256(0x01 ‖ left ‖ right)`; odd-width levels duplicate their last
//! node. The tags are fixed at genesis.

use sha3::{Digest, Sha3_256};
use thiserror::Error;

pub const LEAF_TAG: u8 = 0x00;
pub const NODE_TAG: u8 = 0x01;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NmtError {
    #[error("leaf index {index} out of range ({len} leaves)")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("empty namespace range")]
    EmptyRange,
}

pub fn leaf_hash(ns: u64, data: &[u8]) -> [u8; 32] {
    let mut buf = unsigned_varint::encode::u64_buffer();
    let ns_bytes = unsigned_varint::encode::u64(ns, &mut buf);
    let mut hasher = Sha3_256::new();
    hasher.update([LEAF_TAG]);
    hasher.update(ns_bytes);
    hasher.update(data);
    hasher.finalize().into()
}

pub fn node_hash(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
    let mut hasher = Sha3_256::new();
    hasher.update([NODE_TAG]);
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().into()
}

/// Sibling hashes bottom-up for one leaf position. `index` is the position
/// in the sorted leaf order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InclusionProof {
    pub index: u64,
    pub branch: Vec<[u8; 32]>,
}

/// Covering proof for all leaves whose namespace falls in `[ns_lo, ns_hi]`:
/// the enumerated leaves at consecutive positions, plus adjacency proofs
/// that the neighbouring leaves (if any) are outside the range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceRangeProof {
    pub ns_lo: u64,
    pub ns_hi: u64,
    /// Position of the first enumerated leaf in sorted order; when the range
    /// is empty this is where a leaf in range would have been.
    pub start_index: u64,
    pub num_leaves: u64,
    /// In-range leaves in tree order with their inclusion branches.
    pub leaves: Vec<(u64, Vec<u8>, InclusionProof)>,
    /// Left/right boundary leaves: (namespace, leaf hash, proof).
    pub left_boundary: Option<(u64, [u8; 32], InclusionProof)>,
    pub right_boundary: Option<(u64, [u8; 32], InclusionProof)>,
}

#[derive(Debug, Default, Clone)]
pub struct NamespacedMerkleTree {
    leaves: Vec<(u64, Vec<u8>)>,
}

impl NamespacedMerkleTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a leaf in insertion order.
    pub fn push(&mut self, ns: u64, data: impl Into<Vec<u8>>) {
        self.leaves.push((ns, data.into()));
    }

    pub fn len(&self) -> usize {
        self.leaves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }

    /// Leaves in tree order: stable sort by namespace, preserving insertion
    /// order among equal namespaces.
    fn sorted_leaves(&self) -> Vec<(u64, &[u8])> {
        let mut ordered: Vec<(u64, &[u8])> = self
            .leaves
            .iter()
            .map(|(ns, data)| (*ns, data.as_slice()))
            .collect();
        ordered.sort_by_key(|(ns, _)| *ns);
        ordered
    }

    fn levels(&self) -> Vec<Vec<[u8; 32]>> {
        let mut level: Vec<[u8; 32]> = self
            .sorted_leaves()
            .iter()
            .map(|(ns, data)| leaf_hash(*ns, data))
            .collect();
        let mut levels = vec![level.clone()];
        while level.len() > 1 {
            if level.len() % 2 == 1 {
                let last = *level.last().expect("non-empty level");
                level.push(last);
            }
            level = level
                .chunks(2)
                .map(|pair| node_hash(&pair[0], &pair[1]))
                .collect();
            levels.push(level.clone());
        }
        levels
    }

    pub fn root(&self) -> [u8; 32] {
        if self.leaves.is_empty() {
            return Sha3_256::digest([0u8; 0]).into();
        }
        self.levels().pop().expect("at least one level")[0]
    }

    fn proof_at_sorted_index(levels: &[Vec<[u8; 32]>], mut idx: usize) -> InclusionProof {
        let index = idx as u64;
        let mut branch = Vec::new();
        for level in &levels[..levels.len().saturating_sub(1)] {
            let sibling = idx ^ 1;
            let hash = if sibling < level.len() {
                level[sibling]
            } else {
                // odd width: the last node was duplicated
                level[idx]
            };
            branch.push(hash);
            idx /= 2;
        }
        InclusionProof { index, branch }
    }

    /// Inclusion proof for the leaf inserted at `insertion_index`.
    pub fn inclusion_proof(&self, insertion_index: usize) -> Result<InclusionProof, NmtError> {
        if insertion_index >= self.leaves.len() {
            return Err(NmtError::IndexOutOfRange {
                index: insertion_index,
                len: self.leaves.len(),
            });
        }
        let sorted_pos = self.sorted_position(insertion_index);
        Ok(Self::proof_at_sorted_index(&self.levels(), sorted_pos))
    }

    /// Inclusion proof for the leaf at `pos` in sorted (tree) order.
    pub fn inclusion_proof_sorted(&self, pos: usize) -> Result<InclusionProof, NmtError> {
        if pos >= self.leaves.len() {
            return Err(NmtError::IndexOutOfRange {
                index: pos,
                len: self.leaves.len(),
            });
        }
        Ok(Self::proof_at_sorted_index(&self.levels(), pos))
    }

    /// Leaf `(ns, data)` at `pos` in sorted order.
    pub fn leaf_at_sorted(&self, pos: usize) -> Option<(u64, &[u8])> {
        self.sorted_leaves().get(pos).copied()
    }

    fn sorted_position(&self, insertion_index: usize) -> usize {
        let ns = self.leaves[insertion_index].0;
        let mut pos = 0;
        for (i, (other_ns, _)) in self.leaves.iter().enumerate() {
            if *other_ns < ns || (*other_ns == ns && i < insertion_index) {
                pos += 1;
            }
        }
        pos
    }

    /// Covering proof for namespaces in `[ns_lo, ns_hi]`.
    pub fn range_proof(&self, ns_lo: u64, ns_hi: u64) -> Result<NamespaceRangeProof, NmtError> {
        if ns_lo > ns_hi {
            return Err(NmtError::EmptyRange);
        }
        let sorted = self.sorted_leaves();
        let levels = self.levels();
        let start = sorted.partition_point(|(ns, _)| *ns < ns_lo);
        let end = sorted.partition_point(|(ns, _)| *ns <= ns_hi);

        let leaves = (start..end)
            .map(|pos| {
                let (ns, data) = sorted[pos];
                (
                    ns,
                    data.to_vec(),
                    Self::proof_at_sorted_index(&levels, pos),
                )
            })
            .collect();

        let boundary = |pos: usize| {
            let (ns, data) = sorted[pos];
            (
                ns,
                leaf_hash(ns, data),
                Self::proof_at_sorted_index(&levels, pos),
            )
        };
        let left_boundary = (start > 0).then(|| boundary(start - 1));
        let right_boundary = (end < sorted.len()).then(|| boundary(end));

        Ok(NamespaceRangeProof {
            ns_lo,
            ns_hi,
            start_index: start as u64,
            num_leaves: sorted.len() as u64,
            leaves,
            left_boundary,
            right_boundary,
        })
    }
}

fn fold_branch(mut hash: [u8; 32], index: u64, branch: &[[u8; 32]]) -> [u8; 32] {
    let mut idx = index;
    for sibling in branch {
        hash = if idx % 2 == 0 {
            node_hash(&hash, sibling)
        } else {
            node_hash(sibling, &hash)
        };
        idx /= 2;
    }
    hash
}

/// Verify that `(ns, data)` is included under `root` at the proof's sorted
/// position.
pub fn verify_inclusion(root: &[u8; 32], ns: u64, data: &[u8], proof: &InclusionProof) -> bool {
    verify_inclusion_hash(root, leaf_hash(ns, data), proof)
}

/// Same as [`verify_inclusion`] starting from a precomputed leaf hash.
pub fn verify_inclusion_hash(root: &[u8; 32], leaf: [u8; 32], proof: &InclusionProof) -> bool {
    fold_branch(leaf, proof.index, &proof.branch) == *root
}

/// Verify a namespace-range proof: every enumerated leaf is present at
/// consecutive positions, all enumerated namespaces lie in `[ns_lo, ns_hi]`,
/// and the leaves adjacent to the covered run fall outside the range.
pub fn verify_range(
    root: &[u8; 32],
    ns_lo: u64,
    ns_hi: u64,
    proof: &NamespaceRangeProof,
) -> bool {
    if proof.ns_lo != ns_lo || proof.ns_hi != ns_hi || ns_lo > ns_hi {
        return false;
    }
    let start = proof.start_index;
    let end = start + proof.leaves.len() as u64;
    if end > proof.num_leaves {
        return false;
    }

    for (offset, (ns, data, leaf_proof)) in proof.leaves.iter().enumerate() {
        if *ns < ns_lo || *ns > ns_hi {
            return false;
        }
        if leaf_proof.index != start + offset as u64 {
            return false;
        }
        if !verify_inclusion(root, *ns, data, leaf_proof) {
            return false;
        }
    }

    // left adjacency: the leaf before the run must exist iff start > 0 and
    // carry a smaller namespace
    match (&proof.left_boundary, start) {
        (None, 0) => {}
        (Some((ns, leaf, leaf_proof)), s) if s > 0 => {
            if *ns >= ns_lo || leaf_proof.index != s - 1 {
                return false;
            }
            if !verify_inclusion_hash(root, *leaf, leaf_proof) {
                return false;
            }
        }
        _ => return false,
    }

    // right adjacency: the leaf after the run must exist iff the run does
    // not end the tree, and carry a larger namespace
    match (&proof.right_boundary, end == proof.num_leaves) {
        (None, true) => {}
        (Some((ns, leaf, leaf_proof)), false) => {
            if *ns <= ns_hi || leaf_proof.index != end {
                return false;
            }
            if !verify_inclusion_hash(root, *leaf, leaf_proof) {
                return false;
            }
        }
        _ => return false,
    }
    true
}
