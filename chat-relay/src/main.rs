//! veilchat-relay binary entry point.
//!
//! Usage:
//! ```bash
//! veilchat-relay --config relay.toml
//! veilchat-relay --help
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use veilchat_relay::cleanup::spawn_cleanup_task;
use veilchat_relay::config::Config;
use veilchat_relay::http::build_router;
use veilchat_relay::server::ChatRelay;
use veilchat_relay::storage::{QueueSettings, SqliteStorage};

/// End-to-end encrypted chat relay.
#[derive(Parser, Debug)]
#[command(name = "veilchat-relay")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, short, default_value = "relay.toml")]
    config: PathBuf,

    /// Override `server.bind_address`
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,veilchat_relay=debug")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = Config::load_or_default(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;
    if let Some(bind) = cli.bind {
        config.server.bind_address = bind;
    }

    tracing::info!("Starting veilchat-relay v{}", env!("CARGO_PKG_VERSION"));

    let settings = QueueSettings::from(config.storage.clone());
    let storage = if config.storage.database == Path::new(":memory:") {
        tracing::warn!("Using an in-memory database; queued messages will not survive restart");
        SqliteStorage::in_memory_with(settings).await
    } else {
        SqliteStorage::new(&config.storage.database, settings).await
    }
    .context("Failed to open database")?;
    let storage = Arc::new(storage);

    let addr: SocketAddr = config
        .server
        .bind_address
        .parse()
        .with_context(|| format!("Invalid bind address {}", config.server.bind_address))?;

    let cleanup_config = config.cleanup.clone();
    let relay = Arc::new(ChatRelay::with_storage(config, storage.clone()));
    let cleanup = spawn_cleanup_task(storage, relay.rate_limits().clone(), cleanup_config);
    let app = build_router(relay);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    tracing::info!(addr = %addr, "Relay listening");

    tokio::select! {
        result = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .into_future() => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e.into());
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }

    cleanup.abort();
    Ok(())
}

