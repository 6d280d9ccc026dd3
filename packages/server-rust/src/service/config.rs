use std::time::Duration;

/// Server-level configuration for the registry core.
///
/// Controls the expiry sweep cadence, per-watcher queue capacity, and the
/// TTL ceiling applied to Update requests.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Unique identifier for this server node, used in logs.
    pub node_id: String,
    /// Interval between garbage-collection sweeps.
    pub gc_interval: Duration,
    /// Bounded delivery-queue capacity per watch subscription. Events to a
    /// full queue are dropped for that subscriber only.
    pub watch_queue_capacity: usize,
    /// Ceiling for requested TTLs; larger values are silently clamped.
    pub max_ttl: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            node_id: format!("rendezvous-{}", uuid::Uuid::new_v4()),
            gc_interval: Duration::from_secs(15),
            watch_queue_capacity: 32,
            max_ttl: Duration::from_secs(3600),
        }
    }
}
