//! Rendezvous Core -- wire schemas and pure algorithms for the peer-discovery registry.
//!
//! This crate provides the foundation layer shared by the server and test
//! clients:
//!
//! - **Messages** ([`messages`]): request/response/event schemas for the
//!   Update, Delete, List, Hello, and Watch operations
//! - **Endpoints** ([`endpoints`]): order-preserving set-union merge of
//!   affiliate endpoint lists

pub mod endpoints;
pub mod messages;

// Endpoints
pub use endpoints::merge_endpoints;

// Messages
pub use messages::registry::{
    Ack, AffiliateInfo, DeleteRequest, HelloRequest, HelloResponse, ListRequest, ListResponse,
    UpdateRequest, WatchEvent,
};
