// Copyright 2022-2026 Animica Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Content-addressed blob store. Raw bytes live under sharded paths in an
//! `objects/` tree; metadata and pins live in the KV store. The commitment
//! is the NMT root over the blob's erasure shards, so retrieval proofs and
//! sampling fall out of the same structure.

use std::fs;
use std::path::PathBuf;

use byteorder::{BigEndian, ByteOrder};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::da::erasure::{self, ErasureError};
use crate::da::nmt::{NamespacedMerkleTree, NmtError};
use crate::da::sampling::Sample;
use crate::db::{BatchOp, Store};
use crate::utils::Clock;

pub(crate) const COL_BLOBS: u8 = 0;
pub(crate) const COL_PINS: u8 = 1;

/// Number of KV columns the blob store needs from its backend.
pub const BLOB_COLUMNS: u8 = 2;

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("blob of {size} bytes exceeds the {limit} byte limit")]
    Oversize { size: usize, limit: usize },
    #[error("blob {0} not found")]
    NotFound(String),
    #[error("stored blob {root} is {actual} bytes on disk, expected {expected}")]
    SizeMismatch {
        root: String,
        actual: u64,
        expected: u64,
    },
    #[error(transparent)]
    Erasure(#[from] ErasureError),
    #[error(transparent)]
    Nmt(#[from] NmtError),
    #[error(transparent)]
    Db(#[from] crate::db::Error),
    #[error("row decode failed: {0}")]
    Encoding(#[from] serde_json::Error),
    #[error("blob io: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlobMeta {
    #[serde(with = "hex")]
    pub root: [u8; 32],
    pub namespace: u64,
    pub size: u64,
    pub storage_key: String,
    pub path: PathBuf,
    pub created_at: u64,
    pub data_shards: u32,
    pub total_shards: u32,
    pub shard_size: u64,
}

#[derive(Debug, Clone)]
pub struct BlobStoreConfig {
    /// Root directory; objects land under `<root>/objects/`.
    pub root_dir: PathBuf,
    pub max_blob_bytes: usize,
    /// Erasure parameters applied to every blob.
    pub data_shards: u32,
    pub total_shards: u32,
}

impl BlobStoreConfig {
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            max_blob_bytes: 8 << 20,
            data_shards: 4,
            total_shards: 8,
        }
    }

    pub fn objects_root(&self) -> PathBuf {
        self.root_dir.join("objects")
    }
}

pub struct BlobStore<S, C> {
    config: BlobStoreConfig,
    db: S,
    clock: C,
}

impl<S: Store, C: Clock> BlobStore<S, C> {
    pub fn new(config: BlobStoreConfig, db: S, clock: C) -> Self {
        Self { config, db, clock }
    }

    pub fn config(&self) -> &BlobStoreConfig {
        &self.config
    }

    fn object_path(&self, root: &[u8; 32]) -> PathBuf {
        let hex_root = hex::encode(root);
        self.config
            .objects_root()
            .join(&hex_root[..2])
            .join(&hex_root[2..4])
            .join(hex_root)
    }

    /// Commitment over the erasure shards of `data` in `namespace`.
    pub fn commitment(
        &self,
        namespace: u64,
        data: &[u8],
    ) -> Result<(NamespacedMerkleTree, u64), BlobError> {
        let k = self.config.data_shards as usize;
        let n = self.config.total_shards as usize;
        let shard_size = data.len().div_ceil(k).max(1);
        let shards = erasure::encode(data, k, n, shard_size)?;
        let mut tree = NamespacedMerkleTree::new();
        for shard in shards {
            tree.push(namespace, shard);
        }
        Ok((tree, shard_size as u64))
    }

    /// Persist a blob. Re-putting the same content is idempotent and
    /// returns the stored row.
    pub fn put(&self, namespace: u64, data: &[u8]) -> Result<BlobMeta, BlobError> {
        if data.len() > self.config.max_blob_bytes {
            return Err(BlobError::Oversize {
                size: data.len(),
                limit: self.config.max_blob_bytes,
            });
        }
        let (tree, shard_size) = self.commitment(namespace, data)?;
        let root = tree.root();
        if let Some(existing) = self.meta(&root)? {
            return Ok(existing);
        }

        let path = self.object_path(&root);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, data)?;

        let meta = BlobMeta {
            root,
            namespace,
            size: data.len() as u64,
            storage_key: hex::encode(root),
            path,
            created_at: self.clock.now().max(0.0) as u64,
            data_shards: self.config.data_shards,
            total_shards: self.config.total_shards,
            shard_size,
        };
        self.db
            .write(COL_BLOBS, root, serde_json::to_vec(&meta)?)?;
        debug!(root = %meta.storage_key, namespace, size = meta.size, "blob stored");
        Ok(meta)
    }

    pub fn meta(&self, root: &[u8; 32]) -> Result<Option<BlobMeta>, BlobError> {
        self.db
            .read(COL_BLOBS, root)?
            .map(|row| serde_json::from_slice(&row).map_err(BlobError::from))
            .transpose()
    }

    pub fn contains(&self, root: &[u8; 32]) -> Result<bool, BlobError> {
        Ok(self.db.exists(COL_BLOBS, root)?)
    }

    /// Raw blob bytes, checked against the recorded size.
    pub fn get(&self, root: &[u8; 32]) -> Result<Vec<u8>, BlobError> {
        let meta = self
            .meta(root)?
            .ok_or_else(|| BlobError::NotFound(hex::encode(root)))?;
        let data = fs::read(&meta.path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                BlobError::NotFound(meta.storage_key.clone())
            } else {
                BlobError::Io(e)
            }
        })?;
        if data.len() as u64 != meta.size {
            return Err(BlobError::SizeMismatch {
                root: meta.storage_key,
                actual: data.len() as u64,
                expected: meta.size,
            });
        }
        Ok(data)
    }

    /// Build availability samples for a stored blob: `samples` distinct
    /// shard leaves with inclusion proofs, drawn under `seed`.
    pub fn sample_proof(
        &self,
        root: &[u8; 32],
        samples: u64,
        seed: u64,
    ) -> Result<Vec<Sample>, BlobError> {
        let meta = self
            .meta(root)?
            .ok_or_else(|| BlobError::NotFound(hex::encode(root)))?;
        let data = self.get(root)?;
        let (tree, _) = self.commitment(meta.namespace, &data)?;

        let indices =
            crate::da::sampling::draw_sample_indices(meta.total_shards as u64, samples, seed);
        indices
            .into_iter()
            .map(|index| {
                let (namespace, leaf) = tree
                    .leaf_at_sorted(index as usize)
                    .ok_or(NmtError::IndexOutOfRange {
                        index: index as usize,
                        len: tree.len(),
                    })?;
                Ok(Sample {
                    index,
                    namespace,
                    data: leaf.to_vec(),
                    proof: tree.inclusion_proof_sorted(index as usize)?,
                })
            })
            .collect()
    }

    /// Pins are additive: any (root, tag) row protects the blob.
    pub fn pin(&self, root: &[u8; 32], tag: &str) -> Result<(), BlobError> {
        if !self.contains(root)? {
            return Err(BlobError::NotFound(hex::encode(root)));
        }
        let mut created = [0u8; 8];
        BigEndian::write_u64(&mut created, self.clock.now().max(0.0) as u64);
        self.db.write(COL_PINS, pin_key(root, tag), created)?;
        Ok(())
    }

    pub fn unpin(&self, root: &[u8; 32], tag: &str) -> Result<(), BlobError> {
        self.db.delete(COL_PINS, pin_key(root, tag))?;
        Ok(())
    }

    pub fn pin_tags(&self, root: &[u8; 32]) -> Result<Vec<String>, BlobError> {
        Ok(self
            .db
            .iter_prefix(COL_PINS, root)?
            .into_iter()
            .map(|(key, _)| String::from_utf8_lossy(&key[32..]).to_string())
            .collect())
    }

    pub fn is_pinned(&self, root: &[u8; 32]) -> Result<bool, BlobError> {
        Ok(!self.db.iter_prefix(COL_PINS, root)?.is_empty())
    }

    /// All metadata rows; the GC planner works from this snapshot.
    pub fn list_all(&self) -> Result<Vec<BlobMeta>, BlobError> {
        self.db
            .iter_from(COL_BLOBS, b"")?
            .into_iter()
            .map(|(_, row)| serde_json::from_slice(&row).map_err(BlobError::from))
            .collect()
    }

    /// Delete metadata and pins for a set of roots in one batch. File
    /// removal is the collector's job.
    pub(crate) fn delete_rows(&self, roots: &[[u8; 32]]) -> Result<(), BlobError> {
        let mut batch = Vec::new();
        for root in roots {
            batch.push(BatchOp::delete(COL_BLOBS, root.to_vec()));
            for (key, _) in self.db.iter_prefix(COL_PINS, root)? {
                batch.push(BatchOp::delete(COL_PINS, key));
            }
        }
        self.db.commit(batch)?;
        Ok(())
    }

    pub(crate) fn vacuum_db(&self) -> Result<(), BlobError> {
        self.db.vacuum()?;
        Ok(())
    }
}

fn pin_key(root: &[u8; 32], tag: &str) -> Vec<u8> {
    let mut key = root.to_vec();
    key.extend_from_slice(tag.as_bytes());
    key
}

#[cfg(test)]
pub(crate) mod tests {
    use std::path::Path;
    use std::sync::Arc;

    use super::*;
    use crate::da::sampling::verify_samples;
    use crate::db::MemoryDb;
    use crate::utils::ManualClock;

    pub(crate) fn test_store(
        dir: &Path,
    ) -> (BlobStore<MemoryDb, Arc<ManualClock>>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_000_000.0));
        let store = BlobStore::new(
            BlobStoreConfig::new(dir),
            MemoryDb::new(),
            clock.clone(),
        );
        (store, clock)
    }

    #[test]
    fn put_get_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let (store, _) = test_store(dir.path());
        let data = b"a blob of application bytes".to_vec();
        let meta = store.put(7, &data).unwrap();
        assert_eq!(meta.namespace, 7);
        assert_eq!(meta.size, data.len() as u64);
        assert_eq!(store.get(&meta.root).unwrap(), data);
        assert!(meta.path.starts_with(dir.path().join("objects")));
    }

    #[test]
    fn put_is_idempotent_and_content_addressed() {
        let dir = tempfile::tempdir().unwrap();
        let (store, clock) = test_store(dir.path());
        let first = store.put(7, b"same bytes").unwrap();
        clock.advance(100.0);
        let second = store.put(7, b"same bytes").unwrap();
        assert_eq!(first, second, "re-put returns the original row");

        // different namespace yields a different commitment
        let other_ns = store.put(8, b"same bytes").unwrap();
        assert_ne!(first.root, other_ns.root);
        // different content too
        let other = store.put(7, b"other bytes").unwrap();
        assert_ne!(first.root, other.root);
    }

    #[test]
    fn oversize_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = BlobStoreConfig::new(dir.path());
        config.max_blob_bytes = 8;
        let store = BlobStore::new(config, MemoryDb::new(), ManualClock::new(0.0));
        assert!(matches!(
            store.put(1, b"way past the limit"),
            Err(BlobError::Oversize { .. })
        ));
    }

    #[test]
    fn missing_blob_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let (store, _) = test_store(dir.path());
        assert!(matches!(
            store.get(&[0u8; 32]),
            Err(BlobError::NotFound(_))
        ));
    }

    #[test]
    fn pins_are_tagged_and_additive() {
        let dir = tempfile::tempdir().unwrap();
        let (store, _) = test_store(dir.path());
        let meta = store.put(1, b"pinned blob").unwrap();

        store.pin(&meta.root, "archive").unwrap();
        store.pin(&meta.root, "consensus").unwrap();
        assert!(store.is_pinned(&meta.root).unwrap());
        assert_eq!(
            store.pin_tags(&meta.root).unwrap(),
            vec!["archive".to_string(), "consensus".to_string()]
        );

        store.unpin(&meta.root, "archive").unwrap();
        assert!(store.is_pinned(&meta.root).unwrap());
        store.unpin(&meta.root, "consensus").unwrap();
        assert!(!store.is_pinned(&meta.root).unwrap());

        assert!(matches!(
            store.pin(&[9u8; 32], "x"),
            Err(BlobError::NotFound(_))
        ));
    }

    #[test]
    fn sampled_proofs_verify_against_commitment() {
        let dir = tempfile::tempdir().unwrap();
        let (store, _) = test_store(dir.path());
        let data: Vec<u8> = (0..4096u32).map(|i| (i % 251) as u8).collect();
        let meta = store.put(42, &data).unwrap();

        let samples = store.sample_proof(&meta.root, 5, 1234).unwrap();
        assert_eq!(samples.len(), 5);
        assert!(verify_samples(&meta.root, &samples));

        let mut tampered = samples;
        tampered[0].data[0] ^= 1;
        assert!(!verify_samples(&meta.root, &tampered));
    }
}
