//! Velo server entry point.

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use velo_cache::{CacheBackend, HttpCache, LruBackend, LruConfig, WriteThroughCache};
use velo_lock::InMemoryLockManager;
use velo_rewrite::RewriteEngine;
use velo_serve::routes::{create_router, AppState};
use velo_serve::{Config, ReqwestFetcher};

/// Velo server - serves content-addressed optimized subresources
#[derive(Parser, Debug)]
#[command(name = "velo-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "velo.yaml")]
    config: PathBuf,

    /// Listen address (overrides the configuration file)
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = if args.config.exists() {
        Config::load(&args.config)?
    } else {
        Config::default()
    };
    if let Some(listen) = args.listen {
        config.listen = listen;
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("velo={}", args.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting Velo server");
    tracing::info!(listen = %config.listen, config = %args.config.display(), "Server configuration");

    // Two-tier write-through cache: a small fast tier in front of the
    // large one, promotion bounded by cache1_size_limit.
    let cache1 = LruBackend::new(LruConfig {
        max_entries: config.cache1_max_entries,
        max_bytes: config.cache1_max_bytes,
    });
    let cache2 = LruBackend::new(LruConfig {
        max_entries: config.cache2_max_entries,
        max_bytes: config.cache2_max_bytes,
    });
    let mut composite = WriteThroughCache::new(cache1, cache2);
    composite.set_cache1_size_limit(config.options.cache1_size_limit);
    let backend: Arc<dyn CacheBackend> = Arc::new(composite);
    let cache = Arc::new(HttpCache::new(backend));
    cache.set_force_caching(config.options.force_caching);

    let engine = RewriteEngine::new(
        cache,
        Arc::new(InMemoryLockManager::new()),
        Arc::new(ReqwestFetcher::new(config.options.fetch_timeout_ms)?),
        config.domain_policy()?,
        config.options.clone(),
    );
    let state = AppState {
        engine: Arc::new(engine),
    };

    let listener = tokio::net::TcpListener::bind(config.listen).await?;
    tracing::info!("Server is ready. Press Ctrl+C to stop.");
    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "Failed to install Ctrl+C handler");
    }
}
