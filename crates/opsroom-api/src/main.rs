use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use opsroom_api::{build_router, AppState, HttpIdentityProvider, ServerConfig, StaticIdentityProvider};
use opsroom_core::defaults::POOL_METRICS_INTERVAL_SECS;
use opsroom_core::{ChannelHub, IdentityProvider};
use opsroom_crypto::EnvelopeSigner;
use opsroom_db::{Database, MemoryStore, PoolConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing with configurable output
    //
    // Environment variables:
    //   LOG_FORMAT  - "json" or "text" (default: "text")
    //   LOG_FILE    - path to log file (optional, enables file logging)
    //   LOG_ANSI    - "true"/"false" override ANSI colors (auto-detected by default)
    //   RUST_LOG    - standard env filter (default: "opsroom_api=debug,tower_http=debug")
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let log_file = std::env::var("LOG_FILE").ok();
    let log_ansi = std::env::var("LOG_ANSI")
        .ok()
        .map(|v| v == "true" || v == "1");

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "opsroom_api=debug,opsroom_db=info,tower_http=debug".into());

    let registry = tracing_subscriber::registry().with(env_filter);

    let _file_guard = if let Some(ref path) = log_file {
        let file_dir = std::path::Path::new(path)
            .parent()
            .unwrap_or(std::path::Path::new("."));
        let file_name = std::path::Path::new(path)
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("opsroom-api.log");
        let file_appender = tracing_appender::rolling::daily(file_dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(non_blocking),
                )
                .init();
        } else {
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(log_ansi.unwrap_or(false));
            registry.with(layer).init();
        }
        Some(guard)
    } else {
        if log_format == "json" {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        } else {
            let mut layer = tracing_subscriber::fmt::layer();
            if let Some(ansi) = log_ansi {
                layer = layer.with_ansi(ansi);
            }
            registry.with(layer).init();
        }
        None
    };

    info!(
        log_format = %log_format,
        log_file = log_file.as_deref().unwrap_or("(stdout)"),
        "Logging initialized"
    );

    let config = ServerConfig::from_env()?;
    let signer = EnvelopeSigner::new(config.webhook_secret.as_bytes())?;
    let hub = Arc::new(ChannelHub::default());

    let identity: Arc<dyn IdentityProvider> = match &config.identity {
        Some(identity) => {
            info!(identity_url = %identity.url, "Using HTTP identity provider");
            Arc::new(HttpIdentityProvider::new(identity)?)
        }
        None => {
            warn!("IDENTITY_URL not set; viewer authentication will reject every token");
            Arc::new(StaticIdentityProvider::new())
        }
    };

    let state = match &config.database_url {
        Some(database_url) => {
            info!("Connecting to database...");
            let db = Database::connect_with_config(database_url, PoolConfig::from_env()).await?;
            info!("Running database migrations...");
            db.migrate().await?;
            db.change_listener(hub.clone()).spawn();
            db.spawn_pool_monitor(Duration::from_secs(POOL_METRICS_INTERVAL_SECS));
            AppState::with_database(&db, hub.clone(), identity, signer, config.gateway.clone())
        }
        None => {
            warn!("DATABASE_URL not set; using the in-memory store (events are lost on restart)");
            let store = MemoryStore::new();
            AppState::with_memory_store(&store, hub.clone(), identity, signer, config.gateway.clone())
        }
    };

    let app = build_router(state, &config.router());

    let addr: SocketAddr = config.bind_address().parse()?;
    info!(
        max_connections = config.gateway.max_connections,
        "Starting server on {}", addr
    );
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
