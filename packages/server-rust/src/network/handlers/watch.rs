//! Watch stream handler: WebSocket upgrade and the per-subscriber session.
//!
//! A session runs three phases: register the subscription, send one snapshot
//! frame, then tail the delivery queue until the client disconnects, a send
//! fails, or the server drains. Registration happens before the snapshot is
//! taken, so a change racing with the snapshot lands in the queue instead of
//! being lost; clients apply events idempotently keyed by affiliate id.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use tokio::sync::watch;
use tracing::debug;

use rendezvous_core::WatchEvent;

use super::{ApiError, AppState};
use crate::registry::Registry;

/// Query parameters of the watch upgrade request.
#[derive(Debug, Deserialize)]
pub struct WatchParams {
    /// Cluster whose membership changes are streamed.
    pub cluster: String,
}

/// Handles `GET /v1/watch?cluster=...`: upgrades to a WebSocket and streams
/// membership events until the client goes away.
pub async fn watch_handler(
    State(state): State<AppState>,
    Query(params): Query<WatchParams>,
    ws: WebSocketUpgrade,
) -> Response {
    if params.cluster.is_empty() {
        return ApiError::InvalidArgument("cluster must not be empty".to_string())
            .into_response();
    }

    let registry = Arc::clone(&state.registry);
    let shutdown_rx = state.shutdown.shutdown_receiver();

    ws.on_upgrade(move |socket| {
        run_watch_session(socket, registry, params.cluster, shutdown_rx)
    })
}

/// Drives one watch session: snapshot, then tail.
///
/// The subscription is an RAII handle; every exit path below unregisters the
/// watcher before the delivery queue is torn down.
async fn run_watch_session(
    mut socket: WebSocket,
    registry: Arc<Registry>,
    cluster_id: String,
    mut shutdown: watch::Receiver<bool>,
) {
    // Register first, snapshot second. Changes between the two are queued
    // and may be delivered twice (snapshot + tail), never zero times.
    let mut subscription = registry.watch(&cluster_id);
    let snapshot = registry.list(&cluster_id);

    let watch_id = subscription.id();
    if let Err(err) = send_event(&mut socket, &WatchEvent::upsert(snapshot)).await {
        debug!(watch_id, error = %err, "watch snapshot send failed");
        return;
    }
    debug!(watch_id, cluster_id = %cluster_id, "watch session started");

    loop {
        tokio::select! {
            frame = socket.recv() => {
                match frame {
                    // Client closed or dropped the connection: normal end.
                    Some(Ok(Message::Close(_))) | None => {
                        debug!(watch_id, "watch client disconnected");
                        break;
                    }
                    // Inbound payloads carry no meaning on a watch stream.
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        debug!(watch_id, error = %err, "watch socket error");
                        break;
                    }
                }
            }
            event = subscription.next_event() => {
                let Some(event) = event else { break };
                if let Err(err) = send_event(&mut socket, &event).await {
                    debug!(watch_id, error = %err, "watch stream send failed");
                    break;
                }
            }
            _ = shutdown.changed() => {
                debug!(watch_id, "watch session closing on server shutdown");
                let _ = socket.send(Message::Close(None)).await;
                break;
            }
        }
    }
}

/// Encodes one event as a named-MsgPack binary frame and sends it.
async fn send_event(socket: &mut WebSocket, event: &WatchEvent) -> Result<(), axum::Error> {
    let frame = rmp_serde::to_vec_named(event).map_err(axum::Error::new)?;
    socket.send(Message::Binary(frame.into())).await
}
