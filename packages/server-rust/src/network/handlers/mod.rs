//! HTTP and WebSocket handler definitions for the rendezvous server.
//!
//! This module defines `AppState` (the shared state carried through axum
//! extractors), the MsgPack response wrapper, the error-to-status mapping,
//! and re-exports all handler functions for convenient access when building
//! the router.

pub mod health;
pub mod registry;
pub mod watch;

pub use health::{health_handler, liveness_handler, readiness_handler};
pub use registry::{delete_handler, hello_handler, list_handler, update_handler};
pub use watch::watch_handler;

use std::sync::Arc;
use std::time::Instant;

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::registry::Registry;
use crate::service::ServerConfig;

use super::{NetworkConfig, ShutdownController};

/// Shared application state passed to all axum handlers via `State` extraction.
///
/// Holds `Arc` references to shared resources so cloning is cheap.
#[derive(Clone)]
pub struct AppState {
    /// The affiliate store, watcher table, and fan-out.
    pub registry: Arc<Registry>,
    /// Registry-core configuration (queue capacity, TTL ceiling, sweep cadence).
    pub config: Arc<ServerConfig>,
    /// Graceful shutdown controller with health state and session tracking.
    pub shutdown: Arc<ShutdownController>,
    /// Network configuration (bind address, TLS, timeouts).
    pub net_config: Arc<NetworkConfig>,
    /// Server process start time, used for uptime calculation.
    pub start_time: Instant,
}

/// Errors surfaced to callers by the request handlers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Missing or empty identifier, or an undecodable request body.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::InvalidArgument(_) => {
                (StatusCode::BAD_REQUEST, self.to_string()).into_response()
            }
        }
    }
}

/// Response wrapper that serializes its payload as named MsgPack.
///
/// Field names survive on the wire (camelCase), matching the request codec.
#[derive(Debug)]
pub struct MsgPack<T>(pub T);

impl<T: Serialize> IntoResponse for MsgPack<T> {
    fn into_response(self) -> Response {
        match rmp_serde::to_vec_named(&self.0) {
            Ok(buf) => (
                [(header::CONTENT_TYPE, "application/msgpack")],
                buf,
            )
                .into_response(),
            Err(err) => {
                (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
            }
        }
    }
}

/// Decodes a MsgPack request body, mapping decode failures to InvalidArgument.
pub(crate) fn decode_request<T: serde::de::DeserializeOwned>(body: &[u8]) -> Result<T, ApiError> {
    rmp_serde::from_slice(body)
        .map_err(|err| ApiError::InvalidArgument(format!("malformed request body: {err}")))
}

/// Rejects empty identifiers. `name` is the camelCase wire field name.
pub(crate) fn require_non_empty(value: &str, name: &str) -> Result<(), ApiError> {
    if value.is_empty() {
        return Err(ApiError::InvalidArgument(format!("{name} must not be empty")));
    }
    Ok(())
}
