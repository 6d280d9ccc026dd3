//! Shutdown signalling and watch-session drain.
//!
//! The controller owns two things: the health state reported by the probes
//! and the broadcast signal that tells watch sessions and the GC loop to
//! stop. It keeps no session count of its own. The registry's watcher table
//! is the single source of truth for liveness: a session that ends drops its
//! `WatchSubscription`, which removes its watcher entry, so draining the
//! server is nothing more than waiting for that table to empty.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::sync::watch;

use crate::registry::Registry;

/// Server health state, transitioned by the shutdown controller.
///
/// State machine: Starting -> Ready -> Draining -> Stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    /// Server is initializing (not yet accepting requests).
    Starting,
    /// Server is fully operational and accepting requests.
    Ready,
    /// Server is draining watch sessions (no new requests accepted).
    Draining,
    /// Server has fully stopped (all watch sessions ended).
    Stopped,
}

impl HealthState {
    /// Lowercase name used in the health endpoint's JSON body.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Ready => "ready",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        }
    }
}

/// Coordinates shutdown across the server:
/// 1. Health probes read `health_state()` for readiness
/// 2. Watch sessions and the GC loop select on `shutdown_receiver()`
/// 3. `trigger_shutdown()` moves to Draining and signals all listeners
/// 4. `drain_watchers()` waits for the registry's watcher table to empty
#[derive(Debug)]
pub struct ShutdownController {
    shutdown_signal: watch::Sender<bool>,
    health_state: ArcSwap<HealthState>,
}

impl ShutdownController {
    /// Creates a new shutdown controller in the `Starting` state.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            shutdown_signal: tx,
            health_state: ArcSwap::from_pointee(HealthState::Starting),
        }
    }

    /// Transitions to the `Ready` state, indicating the server can accept requests.
    pub fn set_ready(&self) {
        self.health_state.store(Arc::new(HealthState::Ready));
    }

    /// Returns a receiver that will be notified when shutdown is triggered.
    ///
    /// Watch sessions and the GC loop select on this receiver alongside
    /// their main loop to initiate graceful teardown.
    #[must_use]
    pub fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.shutdown_signal.subscribe()
    }

    /// Initiates graceful shutdown.
    ///
    /// Transitions to `Draining` state and signals all shutdown receivers.
    pub fn trigger_shutdown(&self) {
        self.health_state.store(Arc::new(HealthState::Draining));
        // Ignore send errors -- receivers may have been dropped
        let _ = self.shutdown_signal.send(true);
    }

    /// Returns the current health state.
    #[must_use]
    pub fn health_state(&self) -> HealthState {
        **self.health_state.load()
    }

    /// Waits until every watch session has unregistered from the registry,
    /// up to `timeout`.
    ///
    /// Sessions remove themselves from the watcher table when they end, so
    /// an empty table means nothing is left to drain. Returns `true` and
    /// transitions to `Stopped` on success; returns `false` when the timeout
    /// expires with sessions still live (state remains `Draining`).
    pub async fn drain_watchers(&self, registry: &Registry, timeout: Duration) -> bool {
        let drained = tokio::time::timeout(timeout, async {
            while registry.totals().subscriptions > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .is_ok();

        if drained {
            self.health_state.store(Arc::new(HealthState::Stopped));
        }
        drained
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}
