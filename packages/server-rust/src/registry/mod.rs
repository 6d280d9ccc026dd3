//! Affiliate store, watch subscriptions, and change fan-out.

pub mod record;
pub mod store;

pub use record::AffiliateRecord;
pub use store::{Registry, RegistryTotals, SweepStats, WatchSubscription};
