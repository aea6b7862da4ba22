// Copyright 2022-2026 Animica Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Topic-based gossip mesh with graft/prune membership and bounded-fanout
//! publish. The mesh for a topic is a subset of its subscribers; pruned
//! peers stay subscribed but receive nothing until re-grafted.

use std::collections::{BTreeSet, HashMap};
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{debug, warn};

use crate::metrics;
use crate::p2p::PeerId;
use crate::utils::sha3_256_concat;

/// Transport used to deliver a published payload to one peer.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, peer: &PeerId, topic: &str, payload: &[u8]) -> anyhow::Result<()>;
}

#[derive(Debug, Clone)]
pub struct GossipConfig {
    /// Upper bound on recipients per publish.
    pub fanout: usize,
    /// Capacity of the duplicate-suppression cache.
    pub seen_cache_size: usize,
    /// Per-recipient send deadline.
    pub send_timeout: Duration,
    /// Seed for recipient selection. Fixed in tests, random in production.
    pub selection_seed: u64,
}

impl Default for GossipConfig {
    fn default() -> Self {
        Self {
            fanout: 6,
            seen_cache_size: 4096,
            send_timeout: Duration::from_secs(5),
            selection_seed: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishOutcome {
    pub message_id: [u8; 32],
    pub recipients: Vec<PeerId>,
    /// True when the message id was already in the seen-cache; nothing sent.
    pub duplicate: bool,
}

#[derive(Debug, Default)]
struct TopicTables {
    subscribers: BTreeSet<PeerId>,
    mesh: BTreeSet<PeerId>,
    pruned: BTreeSet<PeerId>,
}

pub struct GossipMesh<T> {
    config: GossipConfig,
    transport: Arc<T>,
    topics: RwLock<HashMap<String, TopicTables>>,
    seen: Mutex<LruCache<[u8; 32], ()>>,
    rng: Mutex<ChaCha8Rng>,
}

impl<T: Transport> GossipMesh<T> {
    pub fn new(config: GossipConfig, transport: Arc<T>) -> Self {
        let cache_size =
            NonZeroUsize::new(config.seen_cache_size).unwrap_or(NonZeroUsize::MIN);
        Self {
            seen: Mutex::new(LruCache::new(cache_size)),
            rng: Mutex::new(ChaCha8Rng::seed_from_u64(config.selection_seed)),
            topics: RwLock::new(HashMap::new()),
            transport,
            config,
        }
    }

    pub fn subscribe(&self, peer: &PeerId, topic: &str) {
        let mut topics = self.topics.write();
        topics
            .entry(topic.to_string())
            .or_default()
            .subscribers
            .insert(peer.clone());
    }

    /// Remove the peer from the topic entirely (subscription, mesh, prune
    /// list).
    pub fn unsubscribe(&self, peer: &PeerId, topic: &str) {
        let mut topics = self.topics.write();
        if let Some(tables) = topics.get_mut(topic) {
            tables.subscribers.remove(peer);
            tables.mesh.remove(peer);
            tables.pruned.remove(peer);
            if tables.subscribers.is_empty() {
                topics.remove(topic);
            }
        }
    }

    /// Admit a subscriber into the topic mesh. Returns false if the peer is
    /// not subscribed.
    pub fn graft(&self, peer: &PeerId, topic: &str) -> bool {
        let mut topics = self.topics.write();
        let Some(tables) = topics.get_mut(topic) else {
            return false;
        };
        if !tables.subscribers.contains(peer) {
            return false;
        }
        tables.pruned.remove(peer);
        tables.mesh.insert(peer.clone());
        true
    }

    /// Drop a peer from the mesh. It stays subscribed but is excluded from
    /// fanout top-up until re-grafted.
    pub fn prune(&self, peer: &PeerId, topic: &str) {
        let mut topics = self.topics.write();
        if let Some(tables) = topics.get_mut(topic) {
            if tables.mesh.remove(peer) || tables.subscribers.contains(peer) {
                tables.pruned.insert(peer.clone());
            }
        }
    }

    pub fn subscribers(&self, topic: &str) -> Vec<PeerId> {
        self.topics
            .read()
            .get(topic)
            .map(|t| t.subscribers.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn mesh_peers(&self, topic: &str) -> Vec<PeerId> {
        self.topics
            .read()
            .get(topic)
            .map(|t| t.mesh.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn select_recipients(&self, topic: &str, origin: Option<&PeerId>) -> Vec<PeerId> {
        let topics = self.topics.read();
        let Some(tables) = topics.get(topic) else {
            return Vec::new();
        };
        let excluded = |peer: &PeerId| origin.is_some_and(|o| o == peer);

        let mut mesh: Vec<PeerId> = tables
            .mesh
            .iter()
            .filter(|p| !excluded(p))
            .cloned()
            .collect();

        let mut rng = self.rng.lock();
        let mut recipients: Vec<PeerId> = if mesh.len() > self.config.fanout {
            mesh.choose_multiple(&mut *rng, self.config.fanout)
                .cloned()
                .collect()
        } else {
            std::mem::take(&mut mesh)
        };

        if recipients.len() < self.config.fanout {
            // top up from subscribers outside the mesh, skipping pruned peers
            let pool: Vec<PeerId> = tables
                .subscribers
                .iter()
                .filter(|p| {
                    !excluded(p)
                        && !tables.mesh.contains(*p)
                        && !tables.pruned.contains(*p)
                })
                .cloned()
                .collect();
            let want = self.config.fanout - recipients.len();
            recipients.extend(pool.choose_multiple(&mut *rng, want).cloned());
        }
        recipients
    }

    /// Publish a payload on a topic to at most `fanout` recipients drawn
    /// from the mesh, topped up from the subscriber table. Send failures and
    /// timeouts are logged and counted; they never surface to the caller.
    pub async fn publish(
        &self,
        topic: &str,
        payload: &[u8],
        origin: Option<&PeerId>,
    ) -> PublishOutcome {
        let message_id = sha3_256_concat([topic.as_bytes(), payload]);
        if self.seen.lock().put(message_id, ()).is_some() {
            metrics::GOSSIP_DUPLICATES_TOTAL.inc();
            return PublishOutcome {
                message_id,
                recipients: Vec::new(),
                duplicate: true,
            };
        }

        let recipients = self.select_recipients(topic, origin);
        for peer in &recipients {
            match tokio::time::timeout(
                self.config.send_timeout,
                self.transport.send(peer, topic, payload),
            )
            .await
            {
                Ok(Ok(())) => {
                    metrics::GOSSIP_PUBLISH_TOTAL
                        .with_label_values(&[topic, "ok"])
                        .inc();
                }
                Ok(Err(e)) => {
                    metrics::GOSSIP_PUBLISH_TOTAL
                        .with_label_values(&[topic, "error"])
                        .inc();
                    warn!(%peer, topic, error = %e, "gossip send failed");
                }
                Err(_) => {
                    metrics::GOSSIP_PUBLISH_TOTAL
                        .with_label_values(&[topic, "timeout"])
                        .inc();
                    warn!(%peer, topic, "gossip send timed out");
                }
            }
        }
        debug!(topic, recipients = recipients.len(), "published");
        PublishOutcome {
            message_id,
            recipients,
            duplicate: false,
        }
    }

    /// Record an externally-observed message id. Returns true if it was new.
    pub fn observe(&self, message_id: [u8; 32]) -> bool {
        self.seen.lock().put(message_id, ()).is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as SyncMutex;

    #[derive(Default)]
    struct RecordingTransport {
        sent: SyncMutex<Vec<(PeerId, String, Vec<u8>)>>,
        fail_for: SyncMutex<BTreeSet<PeerId>>,
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn send(&self, peer: &PeerId, topic: &str, payload: &[u8]) -> anyhow::Result<()> {
            if self.fail_for.lock().contains(peer) {
                anyhow::bail!("connection reset");
            }
            self.sent
                .lock()
                .push((peer.clone(), topic.to_string(), payload.to_vec()));
            Ok(())
        }
    }

    fn mesh_with(
        fanout: usize,
        seed: u64,
    ) -> (GossipMesh<RecordingTransport>, Arc<RecordingTransport>) {
        let transport = Arc::new(RecordingTransport::default());
        let mesh = GossipMesh::new(
            GossipConfig {
                fanout,
                seen_cache_size: 16,
                send_timeout: Duration::from_millis(100),
                selection_seed: seed,
            },
            transport.clone(),
        );
        (mesh, transport)
    }

    fn peers(n: usize) -> Vec<PeerId> {
        (0..n).map(|i| PeerId::new(format!("peer_{i:02}"))).collect()
    }

    #[tokio::test]
    async fn publish_reaches_grafted_peers_only_up_to_fanout() {
        let (mesh, transport) = mesh_with(2, 7);
        let ps = peers(5);
        for p in &ps {
            mesh.subscribe(p, "jobs");
            assert!(mesh.graft(p, "jobs"));
        }
        let outcome = mesh.publish("jobs", b"payload", None).await;
        assert!(!outcome.duplicate);
        assert_eq!(outcome.recipients.len(), 2);
        assert_eq!(transport.sent.lock().len(), 2);
    }

    #[tokio::test]
    async fn mesh_supplemented_from_subscribers() {
        let (mesh, _) = mesh_with(3, 1);
        let ps = peers(4);
        for p in &ps {
            mesh.subscribe(p, "jobs");
        }
        assert!(mesh.graft(&ps[0], "jobs"));
        let outcome = mesh.publish("jobs", b"x", None).await;
        assert_eq!(outcome.recipients.len(), 3);
        assert!(outcome.recipients.contains(&ps[0]));
    }

    #[tokio::test]
    async fn pruned_peer_gets_nothing_until_regrafted() {
        let (mesh, transport) = mesh_with(8, 3);
        let ps = peers(3);
        for p in &ps {
            mesh.subscribe(p, "jobs");
            assert!(mesh.graft(p, "jobs"));
        }
        mesh.prune(&ps[1], "jobs");

        let outcome = mesh.publish("jobs", b"m1", None).await;
        assert!(!outcome.recipients.contains(&ps[1]));

        assert!(mesh.graft(&ps[1], "jobs"));
        let outcome = mesh.publish("jobs", b"m2", None).await;
        assert!(outcome.recipients.contains(&ps[1]));
        assert!(transport
            .sent
            .lock()
            .iter()
            .all(|(p, _, payload)| payload != b"m1" || *p != ps[1]));
    }

    #[tokio::test]
    async fn origin_is_excluded() {
        let (mesh, _) = mesh_with(8, 5);
        let ps = peers(3);
        for p in &ps {
            mesh.subscribe(p, "jobs");
            assert!(mesh.graft(p, "jobs"));
        }
        let outcome = mesh.publish("jobs", b"m", Some(&ps[0])).await;
        assert!(!outcome.recipients.contains(&ps[0]));
        assert_eq!(outcome.recipients.len(), 2);
    }

    #[tokio::test]
    async fn duplicate_messages_are_suppressed() {
        let (mesh, transport) = mesh_with(4, 9);
        let ps = peers(2);
        for p in &ps {
            mesh.subscribe(p, "jobs");
            assert!(mesh.graft(p, "jobs"));
        }
        let first = mesh.publish("jobs", b"same", None).await;
        let second = mesh.publish("jobs", b"same", None).await;
        assert!(!first.duplicate);
        assert!(second.duplicate);
        assert_eq!(second.recipients.len(), 0);
        assert_eq!(transport.sent.lock().len(), 2);
    }

    #[tokio::test]
    async fn send_failure_does_not_propagate() {
        let (mesh, transport) = mesh_with(4, 2);
        let ps = peers(2);
        for p in &ps {
            mesh.subscribe(p, "jobs");
            assert!(mesh.graft(p, "jobs"));
        }
        transport.fail_for.lock().insert(ps[0].clone());
        let outcome = mesh.publish("jobs", b"m", None).await;
        // the failing peer is still a selected recipient; the error is eaten
        assert_eq!(outcome.recipients.len(), 2);
        assert_eq!(transport.sent.lock().len(), 1);
    }

    #[tokio::test]
    async fn selection_is_deterministic_for_a_seed() {
        let ps = peers(10);
        let run = |seed| async move {
            let (mesh, _) = mesh_with(3, seed);
            for p in &peers(10) {
                mesh.subscribe(p, "jobs");
                assert!(mesh.graft(p, "jobs"));
            }
            mesh.publish("jobs", b"m", None).await.recipients
        };
        let a = run(42).await;
        let b = run(42).await;
        assert_eq!(a, b);
        assert!(a.iter().all(|p| ps.contains(p)));
    }

    #[test]
    fn graft_requires_subscription() {
        let (mesh, _) = mesh_with(2, 0);
        let p = PeerId::new("stranger");
        assert!(!mesh.graft(&p, "jobs"));
        mesh.subscribe(&p, "jobs");
        assert!(mesh.graft(&p, "jobs"));
        mesh.unsubscribe(&p, "jobs");
        assert!(mesh.mesh_peers("jobs").is_empty());
    }
}
