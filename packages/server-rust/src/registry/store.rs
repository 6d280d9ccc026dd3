//! The affiliate store, watch-subscription table, and change fan-out.
//!
//! One process-wide readers-writer lock guards both the cluster map and the
//! watcher table. Every write path follows the same discipline: mutate under
//! the exclusive lock, capture the senders of the affected cluster's watchers
//! under the same lock, release, then deliver with a non-blocking `try_send`.
//! A watcher whose bounded queue is full simply misses the event; it recovers
//! by re-listing. No channel send ever happens while the lock is held, so a
//! slow subscriber cannot serialize the store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use metrics::counter;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::trace;

use rendezvous_core::{AffiliateInfo, WatchEvent};

use super::record::AffiliateRecord;
use crate::service::ServerConfig;

/// One registered watch subscription: the target cluster and the sender end
/// of its bounded delivery queue.
struct Watcher {
    cluster_id: String,
    tx: mpsc::Sender<WatchEvent>,
}

/// State behind the shared lock: the nested cluster map and the watcher table.
#[derive(Default)]
struct RegistryInner {
    /// `cluster_id -> affiliate_id -> record`.
    clusters: HashMap<String, HashMap<String, AffiliateRecord>>,
    /// Active watch subscriptions keyed by id.
    watchers: HashMap<u64, Watcher>,
}

impl RegistryInner {
    /// Clones the senders of every watcher of the given cluster.
    ///
    /// Called under the lock; delivery happens after it is released.
    fn watchers_of(&self, cluster_id: &str) -> Vec<mpsc::Sender<WatchEvent>> {
        self.watchers
            .values()
            .filter(|watcher| watcher.cluster_id == cluster_id)
            .map(|watcher| watcher.tx.clone())
            .collect()
    }

    fn affiliate_count(&self) -> usize {
        self.clusters.values().map(HashMap::len).sum()
    }

    fn endpoint_count(&self) -> usize {
        self.clusters
            .values()
            .flat_map(HashMap::values)
            .map(|record| record.endpoints.len())
            .sum()
    }
}

/// Point-in-time totals, reported by the health endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryTotals {
    pub clusters: usize,
    pub affiliates: usize,
    pub endpoints: usize,
    pub subscriptions: usize,
}

/// Outcome of one GC sweep, logged by the GC loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepStats {
    /// Distinct clusters that lost at least one record this sweep.
    pub removed_clusters: usize,
    pub removed_affiliates: usize,
    pub current_clusters: usize,
    pub current_affiliates: usize,
    pub current_endpoints: usize,
    pub current_subscriptions: usize,
}

/// The cluster membership registry: keyed affiliate records plus the live
/// watch subscriptions over them.
///
/// The inner state sits behind a shared `Arc` so that each
/// [`WatchSubscription`] can unregister itself on drop without a reference
/// back to the registry.
pub struct Registry {
    inner: Arc<RwLock<RegistryInner>>,
    next_watch_id: AtomicU64,
    config: Arc<ServerConfig>,
}

impl Registry {
    /// Creates an empty registry. Watch ids start at 1 (0 is reserved as
    /// "no subscription").
    #[must_use]
    pub fn new(config: Arc<ServerConfig>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(RegistryInner::default())),
            next_watch_id: AtomicU64::new(1),
            config,
        }
    }

    /// Creates the record if absent, applies the Update mutation rules, and
    /// fans the post-write projection out to the cluster's watchers.
    ///
    /// TTLs above the configured ceiling are silently clamped. Returns the
    /// projection of the resulting record.
    pub fn update(
        &self,
        cluster_id: &str,
        affiliate_id: &str,
        data: &[u8],
        endpoints: &[Vec<u8>],
        ttl: Option<Duration>,
    ) -> AffiliateInfo {
        let now = SystemTime::now();
        let (info, recipients) = {
            let mut inner = self.inner.write();
            let record = inner
                .clusters
                .entry(cluster_id.to_string())
                .or_default()
                .entry(affiliate_id.to_string())
                .or_insert_with(|| AffiliateRecord::new(now));
            record.apply_update(data, endpoints, ttl, self.config.max_ttl, now);
            let info = record.to_info(affiliate_id);
            let recipients = inner.watchers_of(cluster_id);
            (info, recipients)
        };

        self.publish(&recipients, &WatchEvent::upsert(vec![info.clone()]));
        info
    }

    /// Removes the record and, when it existed, fans out one deletion event.
    ///
    /// Deleting an absent key is a successful no-op with no event. A cluster
    /// whose last record is removed disappears from the map.
    pub fn delete(&self, cluster_id: &str, affiliate_id: &str) -> bool {
        let (existed, recipients) = {
            let mut inner = self.inner.write();
            let (existed, cluster_emptied) = match inner.clusters.get_mut(cluster_id) {
                Some(cluster) => (cluster.remove(affiliate_id).is_some(), cluster.is_empty()),
                None => (false, false),
            };
            if cluster_emptied {
                inner.clusters.remove(cluster_id);
            }
            let recipients = if existed {
                inner.watchers_of(cluster_id)
            } else {
                Vec::new()
            };
            (existed, recipients)
        };

        if existed {
            self.publish(&recipients, &WatchEvent::deletion(affiliate_id));
        }
        existed
    }

    /// Returns the projections of all non-expired records of the cluster,
    /// sorted by affiliate id for deterministic output.
    ///
    /// Expired records are filtered but not removed; the GC loop owns
    /// removal, which keeps this path cheap under the shared lock.
    #[must_use]
    pub fn list(&self, cluster_id: &str) -> Vec<AffiliateInfo> {
        let now = SystemTime::now();
        let inner = self.inner.read();
        let mut affiliates: Vec<AffiliateInfo> = inner
            .clusters
            .get(cluster_id)
            .map(|cluster| {
                cluster
                    .iter()
                    .filter(|(_, record)| !record.is_expired(now))
                    .map(|(affiliate_id, record)| record.to_info(affiliate_id))
                    .collect()
            })
            .unwrap_or_default();
        affiliates.sort_by(|a, b| a.affiliate_id.cmp(&b.affiliate_id));
        affiliates
    }

    /// Registers a new watch subscription for the cluster.
    ///
    /// Callers must register BEFORE taking their snapshot (via
    /// [`Registry::list`]) so that a change racing with the snapshot lands in
    /// the queue instead of being lost; at worst it is delivered twice.
    /// Dropping the returned subscription removes the watcher from the table
    /// before its queue is torn down.
    #[must_use]
    pub fn watch(&self, cluster_id: &str) -> WatchSubscription {
        let id = self.next_watch_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.config.watch_queue_capacity);

        let mut inner = self.inner.write();
        inner.watchers.insert(
            id,
            Watcher {
                cluster_id: cluster_id.to_string(),
                tx,
            },
        );
        drop(inner);

        WatchSubscription {
            id,
            inner: Arc::clone(&self.inner),
            rx,
        }
    }

    /// Removes every expired record, fans out their deletion events, and
    /// returns the sweep summary.
    ///
    /// The sole authoritative pruner: List only filters. All removals and the
    /// subscriber capture happen under one exclusive lock acquisition; the
    /// deletion events are delivered after it is released.
    pub fn sweep_expired(&self) -> SweepStats {
        let now = SystemTime::now();
        let (expired, recipients, stats) = {
            let mut inner = self.inner.write();

            let mut expired: Vec<(String, String)> = Vec::new();
            for (cluster_id, cluster) in &mut inner.clusters {
                cluster.retain(|affiliate_id, record| {
                    let keep = !record.is_expired(now);
                    if !keep {
                        expired.push((cluster_id.clone(), affiliate_id.clone()));
                    }
                    keep
                });
            }
            inner.clusters.retain(|_, cluster| !cluster.is_empty());

            let mut recipients: HashMap<String, Vec<mpsc::Sender<WatchEvent>>> = HashMap::new();
            for (cluster_id, _) in &expired {
                if !recipients.contains_key(cluster_id) {
                    recipients.insert(cluster_id.clone(), inner.watchers_of(cluster_id));
                }
            }

            let stats = SweepStats {
                removed_clusters: recipients.len(),
                removed_affiliates: expired.len(),
                current_clusters: inner.clusters.len(),
                current_affiliates: inner.affiliate_count(),
                current_endpoints: inner.endpoint_count(),
                current_subscriptions: inner.watchers.len(),
            };
            (expired, recipients, stats)
        };

        for (cluster_id, affiliate_id) in &expired {
            if let Some(senders) = recipients.get(cluster_id) {
                self.publish(senders, &WatchEvent::deletion(affiliate_id.clone()));
            }
        }
        counter!("registry_records_expired_total").increment(expired.len() as u64);
        stats
    }

    /// Current totals under the shared lock.
    #[must_use]
    pub fn totals(&self) -> RegistryTotals {
        let inner = self.inner.read();
        RegistryTotals {
            clusters: inner.clusters.len(),
            affiliates: inner.affiliate_count(),
            endpoints: inner.endpoint_count(),
            subscriptions: inner.watchers.len(),
        }
    }

    /// Delivers one event to each recipient without ever blocking.
    ///
    /// A full or closed queue drops the event for that subscriber only;
    /// clients that miss updates recover via a fresh List or re-Watch.
    fn publish(&self, recipients: &[mpsc::Sender<WatchEvent>], event: &WatchEvent) {
        for tx in recipients {
            if tx.try_send(event.clone()).is_err() {
                counter!("registry_watch_events_dropped_total").increment(1);
                trace!("watch queue full or closed, event dropped");
            }
        }
    }
}

/// RAII handle to one watch subscription.
///
/// Owns the receiver end of the delivery queue. Dropping the subscription
/// removes the watcher from the registry first (in `Drop::drop`, before the
/// receiver field is destroyed), so publishers never hold a sender to an
/// abandoned queue for longer than one failed `try_send`.
pub struct WatchSubscription {
    id: u64,
    inner: Arc<RwLock<RegistryInner>>,
    rx: mpsc::Receiver<WatchEvent>,
}

impl WatchSubscription {
    /// The id this subscription is registered under.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Waits for the next change event on this subscription's queue.
    pub async fn next_event(&mut self) -> Option<WatchEvent> {
        self.rx.recv().await
    }

    /// Non-blocking poll of the delivery queue. Test and diagnostics helper.
    pub fn try_next_event(&mut self) -> Option<WatchEvent> {
        self.rx.try_recv().ok()
    }
}

impl Drop for WatchSubscription {
    fn drop(&mut self) {
        self.inner.write().watchers.remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_registry(watch_queue_capacity: usize) -> Arc<Registry> {
        let config = ServerConfig {
            watch_queue_capacity,
            ..ServerConfig::default()
        };
        Arc::new(Registry::new(Arc::new(config)))
    }

    fn ep(s: &str) -> Vec<u8> {
        s.as_bytes().to_vec()
    }

    #[test]
    fn upsert_then_list_round_trip() {
        let registry = test_registry(32);
        registry.update(
            "c1",
            "a1",
            &[0xAA],
            &[ep("e1")],
            Some(Duration::from_secs(60)),
        );

        let listed = registry.list("c1");
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].affiliate_id, "a1");
        assert_eq!(listed[0].data.as_ref(), &[0xAA]);
        assert_eq!(listed[0].endpoints.len(), 1);
        assert_eq!(listed[0].endpoints[0].as_ref(), b"e1");
    }

    #[test]
    fn repeated_updates_merge_endpoints_left_biased() {
        let registry = test_registry(32);
        registry.update("c1", "a1", &[0xAA], &[ep("e1")], None);
        registry.update("c1", "a1", &[], &[ep("e2"), ep("e1")], None);

        let listed = registry.list("c1");
        let endpoints: Vec<&[u8]> = listed[0].endpoints.iter().map(AsRef::as_ref).collect();
        assert_eq!(endpoints, vec![b"e1".as_slice(), b"e2".as_slice()]);
        // Empty data on the second update did not clear the blob.
        assert_eq!(listed[0].data.as_ref(), &[0xAA]);
    }

    #[test]
    fn update_returns_post_write_projection() {
        let registry = test_registry(32);
        registry.update("c1", "a1", &[0xAA], &[ep("e1")], None);
        let info = registry.update("c1", "a1", &[0xBB], &[ep("e2")], None);

        assert_eq!(info.data.as_ref(), &[0xBB]);
        assert_eq!(info.endpoints.len(), 2);
    }

    #[test]
    fn list_of_unknown_cluster_is_empty() {
        let registry = test_registry(32);
        assert!(registry.list("nope").is_empty());
    }

    #[test]
    fn list_is_sorted_by_affiliate_id() {
        let registry = test_registry(32);
        registry.update("c1", "b", &[1], &[], None);
        registry.update("c1", "a", &[1], &[], None);
        registry.update("c1", "c", &[1], &[], None);

        let list = registry.list("c1");
        let ids: Vec<&str> = list.iter().map(|info| info.affiliate_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn expired_records_are_filtered_but_not_removed_by_list() {
        let registry = test_registry(32);
        registry.update("c1", "a1", &[0xAA], &[], Some(Duration::ZERO));

        assert!(registry.list("c1").is_empty());
        // The record is still in the map until the GC sweeps it.
        assert_eq!(registry.totals().affiliates, 1);

        let stats = registry.sweep_expired();
        assert_eq!(stats.removed_affiliates, 1);
        assert_eq!(registry.totals().affiliates, 0);
    }

    #[test]
    fn delete_reports_existence_and_is_idempotent() {
        let registry = test_registry(32);
        registry.update("c1", "a1", &[0xAA], &[], None);

        assert!(registry.delete("c1", "a1"));
        assert!(!registry.delete("c1", "a1"));
        assert!(!registry.delete("c1", "never-existed"));
        assert!(!registry.delete("no-such-cluster", "a1"));
    }

    #[test]
    fn delete_of_last_record_prunes_the_cluster() {
        let registry = test_registry(32);
        registry.update("c1", "a1", &[0xAA], &[], None);
        assert_eq!(registry.totals().clusters, 1);

        registry.delete("c1", "a1");
        assert_eq!(registry.totals().clusters, 0);
    }

    #[tokio::test]
    async fn update_fans_out_to_cluster_watchers() {
        let registry = test_registry(32);
        let mut subscription = registry.watch("c1");

        registry.update("c1", "a1", &[0xAA], &[ep("e1")], None);

        let event = subscription.next_event().await.expect("event");
        assert!(!event.deleted);
        assert_eq!(event.affiliates.len(), 1);
        assert_eq!(event.affiliates[0].affiliate_id, "a1");
        assert_eq!(event.affiliates[0].data.as_ref(), &[0xAA]);
    }

    #[tokio::test]
    async fn delete_fans_out_one_deletion_event() {
        let registry = test_registry(32);
        registry.update("c1", "a1", &[0xAA], &[], None);

        let mut subscription = registry.watch("c1");
        registry.delete("c1", "a1");

        let event = subscription.next_event().await.expect("event");
        assert!(event.deleted);
        assert_eq!(event.affiliates[0].affiliate_id, "a1");
        assert!(event.affiliates[0].data.is_empty());
        assert!(event.affiliates[0].endpoints.is_empty());
    }

    #[test]
    fn delete_of_absent_key_emits_no_event() {
        let registry = test_registry(32);
        let mut subscription = registry.watch("c1");

        registry.delete("c1", "ghost");
        assert!(subscription.try_next_event().is_none());
    }

    #[test]
    fn updates_do_not_cross_cluster_boundaries() {
        let registry = test_registry(32);
        let mut watcher_b = registry.watch("cluster-b");

        registry.update("cluster-a", "a1", &[0xAA], &[], None);

        assert!(watcher_b.try_next_event().is_none());
        assert!(registry.list("cluster-b").is_empty());
        assert_eq!(registry.list("cluster-a").len(), 1);
    }

    #[test]
    fn full_queue_drops_events_without_blocking() {
        let registry = test_registry(1);
        let mut subscription = registry.watch("c1");

        // Capacity 1: the first event occupies the queue, the rest drop.
        registry.update("c1", "a1", &[1], &[], None);
        registry.update("c1", "a1", &[2], &[], None);
        registry.update("c1", "a1", &[3], &[], None);

        let first = subscription.try_next_event().expect("first event kept");
        assert_eq!(first.affiliates[0].data.as_ref(), &[1]);
        assert!(subscription.try_next_event().is_none());
    }

    #[test]
    fn dropping_a_subscription_unregisters_its_watcher() {
        let registry = test_registry(32);
        let subscription = registry.watch("c1");
        assert_eq!(registry.totals().subscriptions, 1);

        drop(subscription);
        assert_eq!(registry.totals().subscriptions, 0);

        // Publishing afterwards finds no recipients and does not panic.
        registry.update("c1", "a1", &[0xAA], &[], None);
    }

    #[test]
    fn watch_ids_are_monotonic() {
        let registry = test_registry(32);
        let first = registry.watch("c1");
        let second = registry.watch("c1");
        assert!(second.id() > first.id());
        assert_eq!(first.id(), 1);
    }

    #[tokio::test]
    async fn sweep_emits_deletion_events_and_reports_stats() {
        let registry = test_registry(32);
        registry.update("c1", "gone", &[1], &[ep("e1")], Some(Duration::ZERO));
        registry.update("c1", "stays", &[2], &[ep("e2")], Some(Duration::from_secs(600)));
        registry.update("c2", "gone-too", &[3], &[], Some(Duration::ZERO));

        let mut subscription = registry.watch("c1");
        let stats = registry.sweep_expired();

        assert_eq!(stats.removed_affiliates, 2);
        assert_eq!(stats.removed_clusters, 2);
        assert_eq!(stats.current_clusters, 1);
        assert_eq!(stats.current_affiliates, 1);
        assert_eq!(stats.current_endpoints, 1);
        assert_eq!(stats.current_subscriptions, 1);

        let event = subscription.next_event().await.expect("deletion event");
        assert!(event.deleted);
        assert_eq!(event.affiliates[0].affiliate_id, "gone");
        // Only c1's expiry reaches a c1 watcher.
        assert!(subscription.try_next_event().is_none());
    }

    #[test]
    fn sweep_on_clean_registry_is_a_no_op() {
        let registry = test_registry(32);
        registry.update("c1", "a1", &[1], &[], Some(Duration::from_secs(600)));
        registry.update("c2", "a2", &[1], &[], None); // no TTL yet, never pruned

        let stats = registry.sweep_expired();
        assert_eq!(stats.removed_affiliates, 0);
        assert_eq!(stats.removed_clusters, 0);
        assert_eq!(stats.current_affiliates, 2);
    }

    #[test]
    fn expired_record_becomes_visible_again_after_ttl_refresh() {
        let registry = test_registry(32);
        registry.update("c1", "a1", &[0xAA], &[], Some(Duration::ZERO));
        assert!(registry.list("c1").is_empty());

        registry.update("c1", "a1", &[], &[], Some(Duration::from_secs(60)));
        let listed = registry.list("c1");
        assert_eq!(listed.len(), 1);
        // The in-place refresh kept the previously published data.
        assert_eq!(listed[0].data.as_ref(), &[0xAA]);
    }

    #[test]
    fn ttl_is_clamped_to_the_configured_ceiling() {
        let config = ServerConfig {
            max_ttl: Duration::from_secs(3600),
            ..ServerConfig::default()
        };
        let registry = Arc::new(Registry::new(Arc::new(config)));
        let before = SystemTime::now();
        registry.update("c1", "a1", &[1], &[], Some(Duration::from_secs(99 * 3600)));

        let inner = registry.inner.read();
        let record = &inner.clusters["c1"]["a1"];
        let expires_at = record.expires_at.expect("expiry set");
        assert!(expires_at <= before + Duration::from_secs(3600) + Duration::from_secs(1));
    }
}
