//! Unary registry handlers: Update, Delete, List, and Hello.
//!
//! Requests and responses are named-MsgPack bodies. Empty identifiers and
//! undecodable bodies are rejected with 400 InvalidArgument on every path;
//! nothing is silently skipped.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use axum::extract::{ConnectInfo, State};
use axum::http::HeaderMap;
use bytes::Bytes;
use serde_bytes::ByteBuf;
use tracing::debug;

use rendezvous_core::{
    Ack, DeleteRequest, HelloRequest, HelloResponse, ListRequest, ListResponse, UpdateRequest,
};

use super::{decode_request, require_non_empty, ApiError, AppState, MsgPack};

/// Handles `POST /v1/update`: upserts one affiliate record and fans the
/// post-write projection out to the cluster's watchers.
pub async fn update_handler(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<MsgPack<Ack>, ApiError> {
    let req: UpdateRequest = decode_request(&body)?;
    require_non_empty(&req.cluster_id, "clusterId")?;
    require_non_empty(&req.affiliate_id, "affiliateId")?;

    let endpoints: Vec<Vec<u8>> = req.endpoints.into_iter().map(ByteBuf::into_vec).collect();
    let ttl = req.ttl_ms.map(Duration::from_millis);
    state
        .registry
        .update(&req.cluster_id, &req.affiliate_id, &req.data, &endpoints, ttl);

    Ok(MsgPack(Ack {}))
}

/// Handles `POST /v1/delete`: removes one affiliate record.
///
/// Idempotent -- deleting an absent key acks without emitting an event.
pub async fn delete_handler(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<MsgPack<Ack>, ApiError> {
    let req: DeleteRequest = decode_request(&body)?;
    require_non_empty(&req.cluster_id, "clusterId")?;
    require_non_empty(&req.affiliate_id, "affiliateId")?;

    state.registry.delete(&req.cluster_id, &req.affiliate_id);
    Ok(MsgPack(Ack {}))
}

/// Handles `POST /v1/list`: returns the cluster's non-expired membership.
pub async fn list_handler(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<MsgPack<ListResponse>, ApiError> {
    let req: ListRequest = decode_request(&body)?;
    require_non_empty(&req.cluster_id, "clusterId")?;

    let affiliates = state.registry.list(&req.cluster_id);
    Ok(MsgPack(ListResponse { affiliates }))
}

/// Handles `POST /v1/hello`: answers with the caller's IP address as the
/// server observed it. Observational only; no state change.
pub async fn hello_handler(
    State(_state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<MsgPack<HelloResponse>, ApiError> {
    let req: HelloRequest = decode_request(&body)?;
    require_non_empty(&req.cluster_id, "clusterId")?;

    let ip = observed_client_ip(&headers, Some(peer));
    debug!(
        cluster_id = %req.cluster_id,
        client_version = %req.client_version,
        client_ip = ?ip,
        "hello"
    );

    Ok(MsgPack(HelloResponse {
        client_ip: ByteBuf::from(ip_octets(ip)),
    }))
}

/// Resolves the caller's address: a parseable `x-real-ip` header wins,
/// otherwise the transport-reported peer address's host part.
fn observed_client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> Option<IpAddr> {
    headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse().ok())
        .or_else(|| peer.map(|addr| addr.ip()))
}

/// Raw address bytes: 4 for IPv4, 16 for IPv6, empty when unknown.
fn ip_octets(ip: Option<IpAddr>) -> Vec<u8> {
    match ip {
        Some(IpAddr::V4(v4)) => v4.octets().to_vec(),
        Some(IpAddr::V6(v6)) => v6.octets().to_vec(),
        None => Vec::new(),
    }
}
