//! Indicator Cache - gateway binary
//!
//! Serves role-scoped indicator datasets through the read-through cache.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use indicator_cache::access::AccessSettings;
use indicator_cache::api::{create_router, AppState};
use indicator_cache::cache::{CacheStore, FileStorage};
use indicator_cache::clock::SystemClock;
use indicator_cache::remote::{InMemoryStore, ProfileRow, RemoteStore, RestStore};
use indicator_cache::{spawn_cleanup_task, Config, DataAccess};

const DEV_TOKEN: &str = "dev-token";
const DEV_CALLER: &str = "dev-user";

/// Main entry point for the indicator cache gateway.
///
/// # Startup Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load configuration from environment variables
/// 3. Open the durable tier and rehydrate the cache store
/// 4. Select the remote backend
/// 5. Start background expiry sweep
/// 6. Start HTTP server on configured port
/// 7. Handle graceful shutdown on SIGINT/SIGTERM
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "indicator_cache=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Indicator Cache Gateway");

    let config = Config::from_env()?;
    info!(
        "Configuration loaded: fresh_for={}s, stale_for={}s, max_entries={}, port={}, cleanup_interval={}s",
        config.fresh_for_secs,
        config.stale_for_secs,
        config.max_entries,
        config.server_port,
        config.cleanup_interval
    );

    let clock = Arc::new(SystemClock);
    let durable = FileStorage::open(&config.cache_dir)?;
    let mut store = CacheStore::new(
        config.freshness_window()?,
        config.max_entries,
        Box::new(durable),
        config.cache_prefix.clone(),
        clock.clone(),
    );
    let report = store.rehydrate();
    info!(
        "Cache store rehydrated from {}: loaded={}, expired={}, corrupt={}",
        config.cache_dir.display(),
        report.loaded,
        report.expired,
        report.corrupt
    );

    let (remote, backend) = select_backend(&config);
    let access = DataAccess::new(store, remote, clock, AccessSettings::from(&config));

    let cleanup_handle = spawn_cleanup_task(access.clone(), config.cleanup_interval);
    info!("Background expiry sweep started");

    let app = create_router(AppState::new(access, backend));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cleanup_handle))
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Picks the REST backend when a URL is configured, otherwise an in-memory
/// store with a single development session.
fn select_backend(config: &Config) -> (Arc<dyn RemoteStore>, &'static str) {
    match &config.backend_url {
        Some(url) => {
            info!("Using REST backend at {}", url);
            let api_key = config.backend_api_key.clone().unwrap_or_default();
            if api_key.is_empty() {
                warn!("BACKEND_API_KEY is not set; requests will carry only the caller token");
            }
            (Arc::new(RestStore::new(url.clone(), api_key)), "rest")
        }
        None => {
            warn!(
                "BACKEND_URL not set; using in-memory backend with development token '{}'",
                DEV_TOKEN
            );
            let memory = InMemoryStore::new();
            memory.add_session(DEV_TOKEN, DEV_CALLER);
            memory.add_profile(
                DEV_CALLER,
                ProfileRow {
                    role: "gestor_pop".into(),
                    section_id: None,
                    team_id: None,
                    active: true,
                },
            );
            (Arc::new(memory), "memory")
        }
    }
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM).
///
/// On shutdown signal, aborts the expiry sweep and allows graceful shutdown.
async fn shutdown_signal(cleanup_handle: tokio::task::JoinHandle<()>) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }

    cleanup_handle.abort();
    warn!("Expiry sweep aborted");
}
