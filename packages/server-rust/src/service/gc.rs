//! Periodic garbage collection of expired affiliate records.
//!
//! List and watch snapshots only filter expired records; this loop is the
//! sole authoritative pruner. Each sweep removes every expired record under
//! the exclusive store lock, then publishes the deletion events through the
//! same non-blocking fan-out used by the write path.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::registry::Registry;

/// Spawns the GC loop, sweeping every `interval` until the shutdown signal
/// fires.
///
/// Each tick logs one structured summary line with the sweep counts and the
/// registry totals after removal.
pub fn spawn_gc_loop(
    registry: Arc<Registry>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let stats = registry.sweep_expired();
                    info!(
                        removed_clusters = stats.removed_clusters,
                        removed_affiliates = stats.removed_affiliates,
                        current_clusters = stats.current_clusters,
                        current_affiliates = stats.current_affiliates,
                        current_endpoints = stats.current_endpoints,
                        current_subscriptions = stats.current_subscriptions,
                        "registry sweep complete"
                    );
                }
                _ = shutdown.changed() => {
                    debug!("gc loop stopping on shutdown signal");
                    break;
                }
            }
        }
    })
}
