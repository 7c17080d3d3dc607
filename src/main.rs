//! slice-cache: background slice cache for paginated REST collections.
//!
//! Runs the cache against a backend and exposes an HTTP API for loading
//! slices, reporting navigations and inspecting the cached state.

use std::sync::Arc;
use std::time::Instant;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;

use slice_cache::config::{Cli, Config};
use slice_cache::server::api::{build_router, AppState};
use slice_cache::{ReqwestTransport, SliceCache};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments.
    let cli = Cli::parse();

    // Initialize tracing/logging.
    let filter = if cli.verbose {
        "slice_cache=debug,tower_http=debug"
    } else {
        "slice_cache=info,tower_http=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with_target(true)
        .init();

    info!("slice-cache v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration and apply CLI overrides.
    let mut config = Config::load(&cli.config)?;
    if let Some(listen) = cli.listen {
        config.server.listen = listen;
    }
    if let Some(base_url) = cli.base_url {
        config.backend.base_url = Some(base_url);
    }
    let config = Arc::new(config);

    info!(
        base_url = config.backend.base_url.as_deref().unwrap_or("<none>"),
        requests = config.requests.len(),
        chunk_size = config.chunk_size,
        query_interval_ms = ?config.query_interval_ms,
        autoload = config.router.autoload,
        "Configuration loaded"
    );

    let transport =
        ReqwestTransport::new(config.backend.base_url.clone(), config.request_timeout())?;

    let cache = SliceCache::new(config.clone(), Arc::new(transport))?;

    let state = Arc::new(AppState {
        cache,
        start_time: Instant::now(),
    });

    let app = build_router(state.clone());

    let listen_addr = config.server.listen.clone();
    let listener = TcpListener::bind(&listen_addr).await?;
    info!("Listening on {listen_addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await?;

    state.cache.shutdown();

    Ok(())
}
