//! Record types for the affiliate store.
//!
//! Defines [`AffiliateRecord`], the server-side state kept for one affiliate,
//! and the mutation rules applied by Update requests.

use std::time::{Duration, SystemTime};

use serde_bytes::ByteBuf;

use rendezvous_core::{merge_endpoints, AffiliateInfo};

/// Stored state for one affiliate within a cluster.
///
/// Server-internal -- NOT serialized to the wire protocol. Projections for
/// List responses and watch events are built via [`AffiliateRecord::to_info`].
#[derive(Debug, Clone)]
pub struct AffiliateRecord {
    /// Client-encrypted self-description bundle, last-writer-wins.
    pub data: Vec<u8>,
    /// Reachable endpoints in first-seen order; grows by set-union only.
    pub endpoints: Vec<Vec<u8>>,
    /// Absolute expiry instant. `None` means no TTL has arrived yet and the
    /// record is never pruned.
    pub expires_at: Option<SystemTime>,
    /// Wall-clock time of the last write.
    pub updated_at: SystemTime,
}

impl AffiliateRecord {
    /// Creates an empty record with no data, endpoints, or expiry.
    #[must_use]
    pub fn new(now: SystemTime) -> Self {
        Self {
            data: Vec::new(),
            endpoints: Vec::new(),
            expires_at: None,
            updated_at: now,
        }
    }

    /// Applies one Update to the record.
    ///
    /// - Non-empty `data` overwrites the stored blob; empty `data` means
    ///   "endpoints/TTL refresh only" and preserves the previous value.
    /// - A non-empty `endpoints` list is merged into the stored list
    ///   (left-biased union, byte-exact dedup); empty leaves it untouched.
    /// - A present `ttl` sets `expires_at = now + min(ttl, max_ttl)`; an
    ///   absent one leaves the expiry as it was.
    pub fn apply_update(
        &mut self,
        data: &[u8],
        endpoints: &[Vec<u8>],
        ttl: Option<Duration>,
        max_ttl: Duration,
        now: SystemTime,
    ) {
        if !data.is_empty() {
            self.data = data.to_vec();
        }
        if !endpoints.is_empty() {
            self.endpoints = merge_endpoints(&self.endpoints, endpoints);
        }
        if let Some(ttl) = ttl {
            self.expires_at = Some(now + ttl.min(max_ttl));
        }
        self.updated_at = now;
    }

    /// Returns `true` once the expiry instant has been reached.
    ///
    /// Records without an expiry are never considered expired.
    #[must_use]
    pub fn is_expired(&self, now: SystemTime) -> bool {
        matches!(self.expires_at, Some(at) if at <= now)
    }

    /// Builds the wire projection of the current record state.
    #[must_use]
    pub fn to_info(&self, affiliate_id: &str) -> AffiliateInfo {
        AffiliateInfo {
            affiliate_id: affiliate_id.to_string(),
            data: ByteBuf::from(self.data.clone()),
            endpoints: self
                .endpoints
                .iter()
                .map(|endpoint| ByteBuf::from(endpoint.clone()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAX_TTL: Duration = Duration::from_secs(3600);

    fn base_record(now: SystemTime) -> AffiliateRecord {
        let mut record = AffiliateRecord::new(now);
        record.apply_update(
            &[0xAA],
            &[b"e1".to_vec()],
            Some(Duration::from_secs(60)),
            MAX_TTL,
            now,
        );
        record
    }

    #[test]
    fn new_record_is_empty_and_never_expires() {
        let now = SystemTime::now();
        let record = AffiliateRecord::new(now);

        assert!(record.data.is_empty());
        assert!(record.endpoints.is_empty());
        assert!(record.expires_at.is_none());
        assert!(!record.is_expired(now + Duration::from_secs(999_999)));
    }

    #[test]
    fn non_empty_data_overwrites() {
        let now = SystemTime::now();
        let mut record = base_record(now);

        record.apply_update(&[0xBB, 0xCC], &[], None, MAX_TTL, now);
        assert_eq!(record.data, vec![0xBB, 0xCC]);
    }

    #[test]
    fn empty_data_preserves_previous_value() {
        let now = SystemTime::now();
        let mut record = base_record(now);

        record.apply_update(&[], &[b"e2".to_vec()], None, MAX_TTL, now);
        assert_eq!(record.data, vec![0xAA]);
    }

    #[test]
    fn endpoints_merge_instead_of_replacing() {
        let now = SystemTime::now();
        let mut record = base_record(now);

        record.apply_update(&[], &[b"e2".to_vec(), b"e1".to_vec()], None, MAX_TTL, now);
        assert_eq!(record.endpoints, vec![b"e1".to_vec(), b"e2".to_vec()]);
    }

    #[test]
    fn empty_endpoints_leave_stored_list_untouched() {
        let now = SystemTime::now();
        let mut record = base_record(now);

        record.apply_update(&[0xBB], &[], None, MAX_TTL, now);
        assert_eq!(record.endpoints, vec![b"e1".to_vec()]);
    }

    #[test]
    fn absent_ttl_leaves_expiry_untouched() {
        let now = SystemTime::now();
        let mut record = base_record(now);
        let expiry = record.expires_at;

        record.apply_update(&[0xBB], &[], None, MAX_TTL, now + Duration::from_secs(1));
        assert_eq!(record.expires_at, expiry);
    }

    #[test]
    fn ttl_above_ceiling_is_clamped() {
        let now = SystemTime::now();
        let mut record = AffiliateRecord::new(now);

        record.apply_update(&[], &[], Some(Duration::from_secs(99 * 3600)), MAX_TTL, now);
        assert_eq!(record.expires_at, Some(now + MAX_TTL));
    }

    #[test]
    fn expiry_boundary_is_inclusive() {
        let now = SystemTime::now();
        let mut record = AffiliateRecord::new(now);
        record.apply_update(&[], &[], Some(Duration::from_secs(60)), MAX_TTL, now);

        let deadline = now + Duration::from_secs(60);
        assert!(!record.is_expired(deadline - Duration::from_secs(1)));
        assert!(record.is_expired(deadline));
        assert!(record.is_expired(deadline + Duration::from_secs(1)));
    }

    #[test]
    fn to_info_reflects_post_write_state() {
        let now = SystemTime::now();
        let record = base_record(now);
        let info = record.to_info("a1");

        assert_eq!(info.affiliate_id, "a1");
        assert_eq!(info.data.as_ref(), &[0xAA]);
        assert_eq!(info.endpoints.len(), 1);
        assert_eq!(info.endpoints[0].as_ref(), b"e1");
    }
}
