//! Binary entry point for the rendezvous registry server.

use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::info;
use tracing_subscriber::EnvFilter;

use rendezvous_server::{
    spawn_gc_loop, NetworkConfig, NetworkModule, Registry, ServerConfig, TlsConfig,
};

/// Cluster membership and peer-discovery registry.
#[derive(Debug, Parser)]
#[command(name = "rendezvous-server", version)]
struct Args {
    /// Bind address.
    #[arg(long, env = "RENDEZVOUS_HOST", default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on. 0 means OS-assigned.
    #[arg(long, env = "RENDEZVOUS_PORT", default_value_t = 8080)]
    port: u16,

    /// Seconds between garbage-collection sweeps.
    #[arg(long, env = "RENDEZVOUS_GC_INTERVAL_SECS", default_value_t = 15)]
    gc_interval_secs: u64,

    /// Bounded delivery-queue capacity per watch subscription.
    #[arg(long, env = "RENDEZVOUS_WATCH_QUEUE_CAPACITY", default_value_t = 32)]
    watch_queue_capacity: usize,

    /// Ceiling in seconds for requested TTLs; larger values are clamped.
    #[arg(long, env = "RENDEZVOUS_MAX_TTL_SECS", default_value_t = 3600)]
    max_ttl_secs: u64,

    /// Node identifier used in logs. Generated when absent.
    #[arg(long, env = "RENDEZVOUS_NODE_ID")]
    node_id: Option<String>,

    /// Allowed CORS origins. Defaults to any origin.
    #[arg(long = "cors-origin", env = "RENDEZVOUS_CORS_ORIGIN")]
    cors_origins: Vec<String>,

    /// Maximum seconds a unary request may take.
    #[arg(long, env = "RENDEZVOUS_REQUEST_TIMEOUT_SECS", default_value_t = 30)]
    request_timeout_secs: u64,

    /// Path to a TLS certificate file. Requires --tls-key.
    #[arg(long, env = "RENDEZVOUS_TLS_CERT", requires = "tls_key")]
    tls_cert: Option<PathBuf>,

    /// Path to a TLS private key file. Requires --tls-cert.
    #[arg(long, env = "RENDEZVOUS_TLS_KEY", requires = "tls_cert")]
    tls_key: Option<PathBuf>,

    /// Port for the Prometheus metrics listener. Disabled when absent.
    #[arg(long, env = "RENDEZVOUS_METRICS_PORT")]
    metrics_port: Option<u16>,

    /// Emit logs as JSON lines instead of human-readable text.
    #[arg(long, env = "RENDEZVOUS_LOG_JSON")]
    log_json: bool,
}

impl Args {
    fn server_config(&self) -> ServerConfig {
        let defaults = ServerConfig::default();
        ServerConfig {
            node_id: self.node_id.clone().unwrap_or(defaults.node_id),
            gc_interval: Duration::from_secs(self.gc_interval_secs),
            watch_queue_capacity: self.watch_queue_capacity,
            max_ttl: Duration::from_secs(self.max_ttl_secs),
        }
    }

    fn network_config(&self) -> NetworkConfig {
        let tls = match (&self.tls_cert, &self.tls_key) {
            (Some(cert_path), Some(key_path)) => Some(TlsConfig {
                cert_path: cert_path.clone(),
                key_path: key_path.clone(),
            }),
            _ => None,
        };
        let cors_origins = if self.cors_origins.is_empty() {
            vec!["*".to_string()]
        } else {
            self.cors_origins.clone()
        };

        NetworkConfig {
            host: self.host.clone(),
            port: self.port,
            tls,
            cors_origins,
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            ..NetworkConfig::default()
        }
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_json);

    if let Some(metrics_port) = args.metrics_port {
        let metrics_host: IpAddr = args.host.parse()?;
        PrometheusBuilder::new()
            .with_http_listener((metrics_host, metrics_port))
            .install()?;
        info!(port = metrics_port, "Prometheus metrics listener started");
    }

    let server_config = Arc::new(args.server_config());
    let registry = Arc::new(Registry::new(Arc::clone(&server_config)));

    let mut module = NetworkModule::new(
        args.network_config(),
        Arc::clone(&server_config),
        Arc::clone(&registry),
    );
    let port = module.start().await?;
    info!(port, node_id = %server_config.node_id, "rendezvous server listening");

    let shutdown_ctrl = module.shutdown_controller();
    let gc_handle = spawn_gc_loop(
        registry,
        server_config.gc_interval,
        shutdown_ctrl.shutdown_receiver(),
    );

    module
        .serve(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await?;

    // trigger_shutdown has fired by now, so the GC loop exits promptly.
    gc_handle.await?;
    info!("rendezvous server stopped");
    Ok(())
}
