//! Registry operation payloads: Update, Delete, List, Hello, and Watch.
//!
//! `cluster_id` and `affiliate_id` are opaque non-empty strings; the server
//! never interprets them. `data` is a client-encrypted bundle and
//! `endpoints` are opaque address blobs -- both travel as MsgPack byte
//! strings and are compared byte-exact only.

use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;

// ---------------------------------------------------------------------------
// Projections
// ---------------------------------------------------------------------------

/// One affiliate as seen by List responses and watch events.
///
/// For deletion events only `affiliate_id` is meaningful; `data` and
/// `endpoints` are empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AffiliateInfo {
    /// Identifier of the affiliate, unique within its cluster.
    pub affiliate_id: String,

    /// Last-writer-wins self-description blob.
    pub data: ByteBuf,

    /// Reachable endpoints in first-seen order, no byte-equal duplicates.
    pub endpoints: Vec<ByteBuf>,
}

impl AffiliateInfo {
    /// Builds the projection used in deletion events: id only, empty payload.
    #[must_use]
    pub fn tombstone(affiliate_id: impl Into<String>) -> Self {
        Self {
            affiliate_id: affiliate_id.into(),
            data: ByteBuf::new(),
            endpoints: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Unary requests and responses
// ---------------------------------------------------------------------------

/// Publishes or refreshes one affiliate record.
///
/// Empty `data` means "endpoints/TTL refresh only" and never clears the
/// stored blob. A non-empty `endpoints` list is merged into the stored list,
/// not substituted for it. An absent `ttl_ms` leaves the record's expiry
/// untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateRequest {
    pub cluster_id: String,
    pub affiliate_id: String,

    #[serde(default)]
    pub data: ByteBuf,

    #[serde(default)]
    pub endpoints: Vec<ByteBuf>,

    /// Time-to-live in milliseconds; values above the server ceiling are
    /// silently clamped.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub ttl_ms: Option<u64>,
}

/// Removes one affiliate record. Deleting an absent key is a no-op.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteRequest {
    pub cluster_id: String,
    pub affiliate_id: String,
}

/// Requests the current non-expired membership of one cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListRequest {
    pub cluster_id: String,
}

/// Membership of one cluster at the moment the shared lock was held.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListResponse {
    pub affiliates: Vec<AffiliateInfo>,
}

/// Asks the server which IP address the caller appears to come from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelloRequest {
    pub cluster_id: String,
    pub client_version: String,
}

/// The caller's IP as observed by the server: 4 or 16 raw bytes, or empty
/// when the address could not be determined.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelloResponse {
    pub client_ip: ByteBuf,
}

/// Empty acknowledgement for Update and Delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Ack {}

// ---------------------------------------------------------------------------
// Watch stream
// ---------------------------------------------------------------------------

/// One frame on a watch stream.
///
/// The first frame of every stream is the snapshot: all non-expired
/// affiliates of the cluster, `deleted = false`. Every later frame carries
/// exactly one affiliate -- the post-write projection for upserts, or a
/// [`AffiliateInfo::tombstone`] with `deleted = true` for deletions and GC
/// expiries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchEvent {
    pub affiliates: Vec<AffiliateInfo>,

    #[serde(default)]
    pub deleted: bool,
}

impl WatchEvent {
    /// Snapshot or upsert frame.
    #[must_use]
    pub fn upsert(affiliates: Vec<AffiliateInfo>) -> Self {
        Self {
            affiliates,
            deleted: false,
        }
    }

    /// Deletion frame for one affiliate.
    #[must_use]
    pub fn deletion(affiliate_id: impl Into<String>) -> Self {
        Self {
            affiliates: vec![AffiliateInfo::tombstone(affiliate_id)],
            deleted: true,
        }
    }
}
