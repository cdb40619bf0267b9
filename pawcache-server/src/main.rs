use anyhow::{Context, Result};
use clap::Parser;
use pawcache_server::{AppState, ResponseCache, ServerConfig, create_router, init_metrics};
use std::net::SocketAddr;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "pawcache-server", version, about = "Response cache operations service")]
struct Args {
    /// Path to the YAML configuration file
    #[arg(short, long)]
    config: Option<String>,
}

fn init_tracing(config: &ServerConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));

    if config.logging.format == "pretty" {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .pretty()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => ServerConfig::from_file(path)
            .with_context(|| format!("failed to load config from {}", path))?,
        None => ServerConfig::default(),
    };
    config.apply_env_overrides()?;
    config.validate()?;

    init_tracing(&config);
    init_metrics();

    info!("Starting Pawcache Server v{}", env!("CARGO_PKG_VERSION"));

    // Connect store and start the cache writer
    let cache = ResponseCache::from_config(&config)
        .await
        .context("failed to initialize the cache store")?;

    let app = create_router(AppState::new(cache.clone()));

    let addr: SocketAddr = config
        .server_addr()
        .parse()
        .with_context(|| format!("invalid listen address {}", config.server_addr()))?;
    info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Drain pending cache writes before exiting
    cache.shutdown().await;
    info!("Pawcache Server stopped");

    Ok(())
}
