//! HTTP event engine server (reverse-proxy runtime).
//!
//! # Architecture Overview
//!
//! ```text
//!     Client Request
//!     ──────────────▶ http::server (axum, request id, timeout, body limit)
//!                        │
//!                        ▼
//!                     runtime::Runtime ──▶ HttpEvent (cookies, session, user)
//!                        │
//!                        ▼
//!                     dispatch (middleware → routing → normalize → commit)
//!                        │ no route
//!                        ▼
//!                     caching::CachingStrategyEngine ──▶ upstream origin
//!
//!     Cross-cutting: config (TOML + hot reload), observability,
//!                    lifecycle (shutdown, session/port sweepers)
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;

use http_event_engine::caching::{
    remote_fallthrough, CacheLimits, CachingStrategyEngine, HyperFetcher, MemoryCacheStorage,
};
use http_event_engine::config::watcher::ConfigWatcher;
use http_event_engine::config::{load_config, EngineConfig};
use http_event_engine::observability::{logging, metrics};
use http_event_engine::routing::RouteTree;
use http_event_engine::{Dispatcher, HttpServer, Runtime, Shutdown};

#[derive(Parser)]
#[command(name = "http-event-engine")]
#[command(about = "Serve a route tree with storage-aware dispatch and cached upstream fallthrough", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override `listener.bind_address`.
    #[arg(short, long)]
    bind: Option<String>,

    /// Override `upstream.origin`.
    #[arg(short, long)]
    upstream: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => EngineConfig::default(),
    };
    if let Some(bind) = cli.bind {
        config.listener.bind_address = bind;
    }
    if let Some(upstream) = cli.upstream {
        config.upstream.origin = Some(upstream);
    }

    logging::init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "http-event-engine starting");

    tracing::info!(
        bind_address = %config.listener.bind_address,
        request_timeout_secs = config.timeouts.request_secs,
        upstream = ?config.upstream.origin,
        default_strategy = %config.caching.default_strategy,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    // Unrouted requests fall through to the upstream under the caching strategies.
    let mut builder = Dispatcher::builder(RouteTree::new());
    let mut caching = None;
    if let Some(origin) = &config.upstream.origin {
        let fetcher = HyperFetcher::new(config.security.max_body_size).with_upstream(origin)?;
        let engine = Arc::new(CachingStrategyEngine::new(
            &config.caching,
            Arc::new(MemoryCacheStorage::with_limits(CacheLimits::from_config(&config.caching))),
            Arc::new(fetcher),
        ));
        builder = builder.default_handler(remote_fallthrough(engine.clone()));
        caching = Some(engine);
    } else {
        tracing::warn!("No upstream configured, unrouted requests answer 404");
    }

    let runtime = Runtime::server(&config, builder.build());
    let shutdown = Shutdown::new();
    let sweepers = runtime.spawn_sweepers(&shutdown);

    let mut server = HttpServer::new(&config, runtime);
    if let Some(engine) = caching {
        server = server.with_caching(engine);
    }

    let (config_updates, _watcher) = match &cli.config {
        Some(path) => {
            let (watcher, updates) = ConfigWatcher::new(path);
            (updates, Some(watcher.run()?))
        }
        None => (tokio::sync::mpsc::unbounded_channel().1, None),
    };

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            return;
        }
        signal_shutdown.trigger();
    });

    server.run(listener, config_updates, shutdown.subscribe()).await?;

    for sweeper in sweepers {
        let _ = sweeper.await;
    }
    tracing::info!("Shutdown complete");
    Ok(())
}
