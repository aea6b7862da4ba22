// Copyright 2022-2026 Animica Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Retention planner and garbage collector for the blob store.
//!
//! Planning is deterministic: protection flags (pins, age, recency) mark
//! rows ineligible, eligibles sort oldest-first, and budget trimming takes
//! from the front until the byte and object budgets are met. Execution
//! removes files best-effort, deletes rows in one batch capped by
//! `max_delete`, and prunes empty shard directories bottom-up.

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::da::metrics as da_metrics;
use crate::da::store::{BlobError, BlobMeta, BlobStore};
use crate::db::Store;
use crate::utils::Clock;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionPolicy {
    /// Protect any blob with at least one pin.
    pub keep_pinned: bool,
    /// When `keep_pinned` is off, still protect blobs pinned with one of
    /// these tags.
    pub protect_tags: Option<Vec<String>>,
    /// Protect blobs newer than now minus this many seconds.
    pub protect_younger_than_secs: Option<u64>,
    /// Keep the N newest blobs overall.
    pub keep_recent_global: usize,
    /// Keep the N newest blobs per namespace.
    pub keep_recent_per_namespace: usize,
    /// Byte/object budgets; oldest eligibles are trimmed until both hold.
    pub max_total_bytes: Option<u64>,
    pub max_objects: Option<u64>,
    pub dry_run: bool,
    /// Safety cap on deletions per run.
    pub max_delete: usize,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            keep_pinned: true,
            protect_tags: None,
            protect_younger_than_secs: None,
            keep_recent_global: 0,
            keep_recent_per_namespace: 0,
            max_total_bytes: None,
            max_objects: None,
            dry_run: true,
            max_delete: 1000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub root_hex: String,
    pub path: PathBuf,
    pub namespace: u64,
    pub size_bytes: u64,
    pub created_at: u64,
    /// Why the row made the plan: "eligible", "budget-bytes",
    /// "budget-count", or both budget reasons joined.
    pub reason: String,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct DeletionPlan {
    pub candidates: Vec<Candidate>,
    pub total_objects: u64,
    pub total_bytes: u64,
    pub protected_objects: u64,
    pub protected_bytes: u64,
}

impl DeletionPlan {
    pub fn plan_bytes(&self) -> u64 {
        self.candidates.iter().map(|c| c.size_bytes).sum()
    }
}

fn protected_roots(rows: &[BlobMeta], policy: &RetentionPolicy, now: u64) -> BTreeSet<[u8; 32]> {
    let mut protected = BTreeSet::new();

    if let Some(younger) = policy.protect_younger_than_secs {
        let cutoff = now.saturating_sub(younger);
        for row in rows {
            if row.created_at >= cutoff {
                protected.insert(row.root);
            }
        }
    }

    let mut by_recency: Vec<&BlobMeta> = rows.iter().collect();
    by_recency.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| a.root.cmp(&b.root))
    });
    for row in by_recency.iter().take(policy.keep_recent_global) {
        protected.insert(row.root);
    }
    if policy.keep_recent_per_namespace > 0 {
        let mut kept: HashMap<u64, usize> = HashMap::new();
        for row in &by_recency {
            let kept_in_ns = kept.entry(row.namespace).or_default();
            if *kept_in_ns < policy.keep_recent_per_namespace {
                protected.insert(row.root);
                *kept_in_ns += 1;
            }
        }
    }
    protected
}

impl<S: Store, C: Clock> BlobStore<S, C> {
    fn pin_protected(&self, row: &BlobMeta, policy: &RetentionPolicy) -> Result<bool, BlobError> {
        if policy.keep_pinned {
            return self.is_pinned(&row.root);
        }
        match &policy.protect_tags {
            None => Ok(false),
            Some(tags) => {
                let pinned = self.pin_tags(&row.root)?;
                Ok(pinned.iter().any(|tag| tags.contains(tag)))
            }
        }
    }

    /// Compute a deletion plan for the current store contents.
    pub fn plan_deletions(
        &self,
        policy: &RetentionPolicy,
        now: u64,
    ) -> Result<DeletionPlan, BlobError> {
        let rows = self.list_all()?;
        let total_objects = rows.len() as u64;
        let total_bytes: u64 = rows.iter().map(|r| r.size).sum();

        let mut protected_objects = 0u64;
        let mut protected_bytes = 0u64;
        let recency_protected = protected_roots(&rows, policy, now);

        let mut eligible: Vec<&BlobMeta> = Vec::new();
        for row in &rows {
            let protected =
                self.pin_protected(row, policy)? || recency_protected.contains(&row.root);
            if protected {
                protected_objects += 1;
                protected_bytes += row.size;
            } else {
                eligible.push(row);
            }
        }
        eligible.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.root.cmp(&b.root))
        });

        let candidate = |row: &BlobMeta, reason: String| Candidate {
            root_hex: format!("0x{}", row.storage_key),
            path: row.path.clone(),
            namespace: row.namespace,
            size_bytes: row.size,
            created_at: row.created_at,
            reason,
        };

        let candidates = if policy.max_total_bytes.is_none() && policy.max_objects.is_none() {
            eligible
                .into_iter()
                .map(|row| candidate(row, "eligible".into()))
                .collect()
        } else {
            let need_free_bytes = policy
                .max_total_bytes
                .map_or(0, |cap| total_bytes.saturating_sub(cap));
            let need_free_count = policy
                .max_objects
                .map_or(0, |cap| total_objects.saturating_sub(cap));

            let mut reason = Vec::new();
            if need_free_bytes > 0 {
                reason.push("budget-bytes");
            }
            if need_free_count > 0 {
                reason.push("budget-count");
            }
            let reason = reason.join(",");

            let mut plan = Vec::new();
            let mut freed_bytes = 0u64;
            let mut freed_count = 0u64;
            for row in eligible {
                let bytes_satisfied = freed_bytes >= need_free_bytes;
                let count_satisfied = freed_count >= need_free_count;
                if bytes_satisfied && count_satisfied {
                    break;
                }
                plan.push(candidate(row, reason.clone()));
                freed_bytes += row.size;
                freed_count += 1;
            }
            plan
        };

        Ok(DeletionPlan {
            candidates,
            total_objects,
            total_bytes,
            protected_objects,
            protected_bytes,
        })
    }

    /// Apply a plan: unlink files best-effort, then delete DB rows in one
    /// batch. Returns the roots removed (or that would be, in dry-run).
    pub fn execute_plan(
        &self,
        plan: &DeletionPlan,
        policy: &RetentionPolicy,
    ) -> Result<Vec<String>, BlobError> {
        let to_delete = &plan.candidates[..plan.candidates.len().min(policy.max_delete)];
        if to_delete.is_empty() {
            return Ok(Vec::new());
        }
        if policy.dry_run {
            return Ok(to_delete.iter().map(|c| c.root_hex.clone()).collect());
        }

        let mut removed = Vec::with_capacity(to_delete.len());
        let mut roots = Vec::with_capacity(to_delete.len());
        let mut reclaimed = 0u64;
        for c in to_delete {
            if let Err(e) = fs::remove_file(&c.path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %c.path.display(), error = %e, "blob unlink failed");
                }
            }
            if let Some(root) = crate::utils::parse_commitment(&c.root_hex) {
                roots.push(root);
            }
            reclaimed += c.size_bytes;
            removed.push(c.root_hex.clone());
        }
        self.delete_rows(&roots)?;
        prune_empty_dirs(
            &self.config().objects_root(),
            to_delete.iter().map(|c| c.path.as_path()),
        );

        da_metrics::GC_DELETED_TOTAL.inc_by(removed.len() as u64);
        da_metrics::GC_RECLAIMED_BYTES_TOTAL.inc_by(reclaimed);
        info!(
            removed = removed.len(),
            reclaimed_bytes = reclaimed,
            "blob gc pass complete"
        );
        Ok(removed)
    }

    /// Plan and execute one GC pass.
    pub fn collect(&self, policy: &RetentionPolicy, now: u64) -> Result<Vec<String>, BlobError> {
        let plan = self.plan_deletions(policy, now)?;
        self.execute_plan(&plan, policy)
    }

    /// Ask the backend to reclaim free space.
    pub fn vacuum(&self) -> Result<(), BlobError> {
        self.vacuum_db()
    }
}

/// Remove empty shard directories upward until `objects_root`.
fn prune_empty_dirs<'a>(objects_root: &Path, paths: impl Iterator<Item = &'a Path>) {
    for path in paths {
        let mut dir = path.parent();
        let mut hops = 0;
        while let Some(d) = dir {
            if hops >= 3 || !d.starts_with(objects_root) || d == objects_root {
                break;
            }
            if fs::remove_dir(d).is_err() {
                break; // not empty or already gone
            }
            dir = d.parent();
            hops += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::da::store::tests::test_store;

    fn policy_live() -> RetentionPolicy {
        RetentionPolicy {
            dry_run: false,
            ..Default::default()
        }
    }

    #[test]
    fn pinned_blobs_survive() {
        let dir = tempfile::tempdir().unwrap();
        let (store, clock) = test_store(dir.path());
        let pinned = store.put(1, b"keep me").unwrap();
        let loose = store.put(1, b"collect me").unwrap();
        store.pin(&pinned.root, "archive").unwrap();

        let removed = store
            .collect(&policy_live(), clock.now() as u64)
            .unwrap();
        assert_eq!(removed, vec![format!("0x{}", loose.storage_key)]);
        assert!(store.contains(&pinned.root).unwrap());
        assert!(!store.contains(&loose.root).unwrap());
        assert!(!loose.path.exists());
        assert!(pinned.path.exists());
    }

    #[test]
    fn protect_tags_without_keep_pinned() {
        let dir = tempfile::tempdir().unwrap();
        let (store, clock) = test_store(dir.path());
        let archive = store.put(1, b"tagged archive").unwrap();
        let scratch = store.put(1, b"tagged scratch").unwrap();
        store.pin(&archive.root, "archive").unwrap();
        store.pin(&scratch.root, "scratch").unwrap();

        let policy = RetentionPolicy {
            keep_pinned: false,
            protect_tags: Some(vec!["archive".into()]),
            dry_run: false,
            ..Default::default()
        };
        store.collect(&policy, clock.now() as u64).unwrap();
        assert!(store.contains(&archive.root).unwrap());
        assert!(!store.contains(&scratch.root).unwrap());
    }

    #[test]
    fn young_blobs_are_protected() {
        let dir = tempfile::tempdir().unwrap();
        let (store, clock) = test_store(dir.path());
        let old = store.put(1, b"old blob").unwrap();
        clock.advance(10_000.0);
        let young = store.put(1, b"young blob").unwrap();

        let policy = RetentionPolicy {
            protect_younger_than_secs: Some(3_600),
            dry_run: false,
            ..Default::default()
        };
        store.collect(&policy, clock.now() as u64).unwrap();
        assert!(!store.contains(&old.root).unwrap());
        assert!(store.contains(&young.root).unwrap());
    }

    #[test]
    fn recency_protection_per_namespace_and_global() {
        let dir = tempfile::tempdir().unwrap();
        let (store, clock) = test_store(dir.path());
        let mut metas = Vec::new();
        for i in 0..6u64 {
            clock.advance(10.0);
            metas.push(store.put(i % 2, format!("blob {i}").into_bytes().as_slice()).unwrap());
        }
        let policy = RetentionPolicy {
            keep_recent_per_namespace: 1,
            keep_recent_global: 3,
            dry_run: false,
            ..Default::default()
        };
        store.collect(&policy, clock.now() as u64).unwrap();
        // newest three survive globally; newest of each namespace are among
        // them here
        for meta in &metas[3..] {
            assert!(store.contains(&meta.root).unwrap());
        }
        for meta in &metas[..3] {
            assert!(!store.contains(&meta.root).unwrap());
        }
    }

    #[test]
    fn budget_trims_oldest_first_until_satisfied() {
        let dir = tempfile::tempdir().unwrap();
        let (store, clock) = test_store(dir.path());
        let mut metas = Vec::new();
        for i in 0..5u8 {
            clock.advance(10.0);
            metas.push(store.put(1, &vec![i; 100]).unwrap());
        }
        // 500 bytes stored; cap at 250 → the three oldest must go
        let policy = RetentionPolicy {
            max_total_bytes: Some(250),
            dry_run: false,
            ..Default::default()
        };
        let plan = store
            .plan_deletions(&policy, clock.now() as u64)
            .unwrap();
        assert_eq!(plan.candidates.len(), 3);
        assert!(plan.candidates.iter().all(|c| c.reason == "budget-bytes"));
        assert_eq!(plan.total_bytes, 500);

        let removed = store.execute_plan(&plan, &policy).unwrap();
        assert_eq!(removed.len(), 3);
        assert!(!store.contains(&metas[0].root).unwrap());
        assert!(store.contains(&metas[3].root).unwrap());
        assert!(store.contains(&metas[4].root).unwrap());
    }

    #[test]
    fn object_budget_counts_rows() {
        let dir = tempfile::tempdir().unwrap();
        let (store, clock) = test_store(dir.path());
        for i in 0..4u8 {
            clock.advance(1.0);
            store.put(1, &[i; 10]).unwrap();
        }
        let policy = RetentionPolicy {
            max_objects: Some(1),
            dry_run: false,
            ..Default::default()
        };
        let plan = store
            .plan_deletions(&policy, clock.now() as u64)
            .unwrap();
        assert_eq!(plan.candidates.len(), 3);
        assert!(plan.candidates.iter().all(|c| c.reason == "budget-count"));
    }

    #[test]
    fn dry_run_deletes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let (store, clock) = test_store(dir.path());
        let meta = store.put(1, b"still here").unwrap();
        let removed = store
            .collect(&RetentionPolicy::default(), clock.now() as u64)
            .unwrap();
        assert_eq!(removed.len(), 1, "dry-run reports the would-be deletion");
        assert!(store.contains(&meta.root).unwrap());
        assert!(meta.path.exists());
    }

    #[test]
    fn max_delete_caps_one_pass() {
        let dir = tempfile::tempdir().unwrap();
        let (store, clock) = test_store(dir.path());
        for i in 0..10u8 {
            clock.advance(1.0);
            store.put(1, &[i; 8]).unwrap();
        }
        let policy = RetentionPolicy {
            max_delete: 4,
            dry_run: false,
            ..Default::default()
        };
        let removed = store.collect(&policy, clock.now() as u64).unwrap();
        assert_eq!(removed.len(), 4);
        assert_eq!(store.list_all().unwrap().len(), 6);
    }

    #[test]
    fn empty_shard_dirs_are_pruned() {
        let dir = tempfile::tempdir().unwrap();
        let (store, clock) = test_store(dir.path());
        let meta = store.put(1, b"lonely blob").unwrap();
        let shard_dir = meta.path.parent().unwrap().to_path_buf();

        store.collect(&policy_live(), clock.now() as u64).unwrap();
        assert!(!shard_dir.exists());
        assert!(store.config().objects_root().parent().unwrap().exists());
    }

    #[test]
    fn missing_file_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let (store, clock) = test_store(dir.path());
        let meta = store.put(1, b"ghost").unwrap();
        fs::remove_file(&meta.path).unwrap();

        let removed = store.collect(&policy_live(), clock.now() as u64).unwrap();
        assert_eq!(removed.len(), 1);
        assert!(!store.contains(&meta.root).unwrap());
    }
}
