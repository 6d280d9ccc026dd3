//! Rendezvous Server -- cluster membership and peer-discovery registry.
//!
//! Affiliates publish an encrypted self-description blob plus reachable
//! endpoints under a cluster id; peers list the current membership or watch
//! a live stream of changes over WebSocket. State is volatile by design: a
//! single process owns it, and a periodic GC sweep prunes expired records.

pub mod network;
pub mod registry;
pub mod service;

pub use network::{AppState, NetworkConfig, NetworkModule, ShutdownController, TlsConfig};
pub use registry::{Registry, RegistryTotals, SweepStats, WatchSubscription};
pub use service::{spawn_gc_loop, ServerConfig};


/// Integration tests for the registry core: store, fan-out, and GC working
/// together without the transport.
#[cfg(test)]
mod integration_tests {
    use std::sync::Arc;
    use std::time::Duration;

    use crate::registry::Registry;
    use crate::service::ServerConfig;

    fn setup() -> Arc<Registry> {
        let config = ServerConfig {
            watch_queue_capacity: 8,
            max_ttl: Duration::from_secs(3600),
            ..ServerConfig::default()
        };
        Arc::new(Registry::new(Arc::new(config)))
    }

    #[tokio::test]
    async fn full_lifecycle_update_watch_delete_sweep() {
        let registry = setup();

        // A record published before the watch shows up in the snapshot path.
        registry.update(
            "c1",
            "a1",
            &[0xAA],
            &[b"e1".to_vec()],
            Some(Duration::from_secs(60)),
        );
        let snapshot = registry.list("c1");
        assert_eq!(snapshot.len(), 1);

        let mut subscription = registry.watch("c1");

        // A later update reaches the tail.
        registry.update("c1", "a2", &[0xBB], &[], None);
        let event = subscription.next_event().await.expect("upsert event");
        assert!(!event.deleted);
        assert_eq!(event.affiliates[0].affiliate_id, "a2");

        // Explicit deletion produces a tombstone event.
        registry.delete("c1", "a1");
        let event = subscription.next_event().await.expect("deletion event");
        assert!(event.deleted);
        assert_eq!(event.affiliates[0].affiliate_id, "a1");

        // The GC prunes a record whose TTL has already passed and notifies.
        registry.update("c1", "a3", &[0xCC], &[], Some(Duration::ZERO));
        let event = subscription.next_event().await.expect("a3 upsert");
        assert_eq!(event.affiliates[0].affiliate_id, "a3");

        let stats = registry.sweep_expired();
        assert_eq!(stats.removed_affiliates, 1);
        let event = subscription.next_event().await.expect("a3 expiry");
        assert!(event.deleted);
        assert_eq!(event.affiliates[0].affiliate_id, "a3");

        // Only a2 remains.
        let remaining = registry.list("c1");
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].affiliate_id, "a2");
    }

    #[test]
    fn re_exports_accessible_from_crate_root() {
        // Verify that the key types are accessible from the crate root.
        let _config = crate::ServerConfig::default();
        let _net = crate::NetworkConfig::default();
        let _ctrl = crate::ShutdownController::new();
    }
}
