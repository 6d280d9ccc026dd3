//! Network module with deferred startup lifecycle.
//!
//! Implements the deferred startup pattern: `new()` creates resources,
//! `start()` binds the TCP listener, and `serve()` starts accepting
//! connections. This separation allows the rest of the application (GC loop,
//! metrics exporter) to wire itself to the shared state between `start()`
//! and `serve()`.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::registry::Registry;
use crate::service::ServerConfig;

use super::config::NetworkConfig;
use super::handlers::{
    delete_handler, health_handler, hello_handler, list_handler, liveness_handler,
    readiness_handler, update_handler, watch_handler, AppState,
};
use super::middleware::build_http_layers;
use super::shutdown::ShutdownController;

/// Manages the full HTTP/WebSocket server lifecycle.
///
/// Follows the deferred startup pattern:
/// 1. `new()` -- allocates shared state (shutdown controller, app state)
/// 2. `start()` -- binds the TCP listener to the configured address
/// 3. `serve()` -- begins accepting connections until shutdown is signalled
///
/// The shutdown controller is shared via `Arc` so the GC loop and watch
/// sessions can observe the shutdown signal.
pub struct NetworkModule {
    config: NetworkConfig,
    server_config: Arc<ServerConfig>,
    registry: Arc<Registry>,
    listener: Option<TcpListener>,
    shutdown: Arc<ShutdownController>,
}

impl NetworkModule {
    /// Creates a new network module without binding any port.
    #[must_use]
    pub fn new(
        config: NetworkConfig,
        server_config: Arc<ServerConfig>,
        registry: Arc<Registry>,
    ) -> Self {
        Self {
            config,
            server_config,
            registry,
            listener: None,
            shutdown: Arc::new(ShutdownController::new()),
        }
    }

    /// Returns a shared reference to the shutdown controller.
    ///
    /// The GC loop subscribes to its shutdown signal; watch sessions register
    /// with it for drain tracking.
    #[must_use]
    pub fn shutdown_controller(&self) -> Arc<ShutdownController> {
        Arc::clone(&self.shutdown)
    }

    /// Binds the TCP listener to the configured host and port.
    ///
    /// Returns the actual bound port, which may differ from the configured
    /// port when port 0 is used (OS-assigned ephemeral port).
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound (e.g., port in use).
    pub async fn start(&mut self) -> anyhow::Result<u16> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr).await?;
        let port = listener.local_addr()?.port();

        info!("TCP listener bound to {}:{}", self.config.host, port);

        self.listener = Some(listener);
        Ok(port)
    }

    /// Starts serving connections until the shutdown signal fires.
    ///
    /// Consumes `self` because the listener is moved into the server.
    ///
    /// After the external `shutdown` future resolves:
    /// 1. Health state transitions to Draining and the shutdown signal fires,
    ///    which tells every watch session to close its stream
    /// 2. The transport finishes its graceful shutdown
    /// 3. Waits up to 30 seconds for remaining sessions, then Stopped
    ///
    /// # Errors
    ///
    /// Returns an error if the server encounters a fatal I/O error.
    ///
    /// # Panics
    ///
    /// Panics if `start()` was not called before `serve()`.
    pub async fn serve(
        self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        let listener = self
            .listener
            .expect("start() must be called before serve()");

        let state = AppState {
            registry: Arc::clone(&self.registry),
            config: Arc::clone(&self.server_config),
            shutdown: Arc::clone(&self.shutdown),
            net_config: Arc::new(self.config.clone()),
            start_time: Instant::now(),
        };
        let router = build_router(state, &self.config);

        // Transition to Ready so readiness probes pass.
        self.shutdown.set_ready();

        // Watch sessions hold their connections open indefinitely, so the
        // controller must signal them BEFORE the transport starts waiting
        // for connections to finish.
        let shutdown_ctrl = Arc::clone(&self.shutdown);
        let graceful = async move {
            shutdown.await;
            shutdown_ctrl.trigger_shutdown();
        };

        if let Some(tls_config) = self.config.tls.clone() {
            serve_tls(
                listener,
                router,
                &tls_config,
                self.registry,
                self.shutdown,
                graceful,
            )
            .await
        } else {
            serve_plain(listener, router, self.registry, self.shutdown, graceful).await
        }
    }
}

/// Assembles the axum router with all routes and middleware.
fn build_router(state: AppState, config: &NetworkConfig) -> Router {
    let layers = build_http_layers(config);

    Router::new()
        .route("/health", get(health_handler))
        .route("/health/live", get(liveness_handler))
        .route("/health/ready", get(readiness_handler))
        .route("/v1/update", post(update_handler))
        .route("/v1/delete", post(delete_handler))
        .route("/v1/list", post(list_handler))
        .route("/v1/hello", post(hello_handler))
        .route("/v1/watch", get(watch_handler))
        .layer(DefaultBodyLimit::max(config.max_body_bytes))
        .layer(layers)
        .with_state(state)
}

/// Serves plain HTTP/WS connections using axum's built-in server.
async fn serve_plain(
    listener: TcpListener,
    router: Router,
    registry: Arc<Registry>,
    shutdown_ctrl: Arc<ShutdownController>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    info!("Serving plain HTTP/WS connections");

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await?;

    finish_drain(&registry, &shutdown_ctrl).await;
    Ok(())
}

/// Serves TLS connections using `axum-server` with rustls.
///
/// Reuses the pre-bound TCP listener by converting it to a `std::net::TcpListener`.
async fn serve_tls(
    listener: TcpListener,
    router: Router,
    tls_config: &super::config::TlsConfig,
    registry: Arc<Registry>,
    shutdown_ctrl: Arc<ShutdownController>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    use axum_server::tls_rustls::RustlsConfig;

    let rustls_config = RustlsConfig::from_pem_file(&tls_config.cert_path, &tls_config.key_path)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to load TLS certificates: {e}"))?;

    let addr = listener.local_addr()?;
    let std_listener = listener.into_std()?;
    let handle = axum_server::Handle::new();
    let shutdown_handle = handle.clone();

    // Waits for the shutdown signal, then triggers graceful shutdown on the
    // axum-server handle.
    tokio::spawn(async move {
        shutdown.await;
        shutdown_handle.graceful_shutdown(Some(Duration::from_secs(30)));
    });

    info!("Serving TLS connections on {}", addr);

    axum_server::from_tcp_rustls(std_listener, rustls_config)
        .handle(handle)
        .serve(router.into_make_service_with_connect_info::<SocketAddr>())
        .await?;

    finish_drain(&registry, &shutdown_ctrl).await;
    Ok(())
}

/// Waits for remaining watch sessions and transitions to Stopped.
///
/// Liveness is read from the registry's watcher table; a session that ends
/// removes its own entry.
async fn finish_drain(registry: &Registry, shutdown_ctrl: &ShutdownController) {
    let remaining = registry.totals().subscriptions;
    if remaining > 0 {
        info!("Draining {} watch sessions", remaining);
    }

    let drained = shutdown_ctrl
        .drain_watchers(registry, Duration::from_secs(30))
        .await;
    if drained {
        info!("All watch sessions drained successfully");
    } else {
        warn!("Drain timeout expired with watch sessions remaining");
    }
}
