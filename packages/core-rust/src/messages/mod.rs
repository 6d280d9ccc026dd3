//! Wire schemas for the rendezvous registry protocol.
//!
//! All types use named MsgPack serialization (`rmp_serde::to_vec_named()`)
//! with camelCase field names. Opaque binary fields (`data`, `endpoints`,
//! `clientIp`) are carried as raw MsgPack byte strings via `serde_bytes`.

pub mod registry;

pub use registry::{
    Ack, AffiliateInfo, DeleteRequest, HelloRequest, HelloResponse, ListRequest, ListResponse,
    UpdateRequest, WatchEvent,
};
