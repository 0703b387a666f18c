//! Dialog Router Bot API — HTTP transport for bot participants.
//!
//! Exposes `/bot{token}/getUpdates` and `/bot{token}/sendMessage` over the
//! same `Orchestrator`/`BotGateway` core `router-cli` drives for humans,
//! proving the hexagonal split: a second frontend reusing all of `router-core`.

mod handlers;
mod startup;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use router_core::store::memory::InMemoryStore;
use router_core::store::PeerStore;
use router_core::store::SqliteStore;
use router_core::OrchestratorConfig;

/// Dialog Router Bot API — bot-facing HTTP interface
#[derive(Parser)]
#[command(name = "router-bot-api")]
struct Args {
    /// Path to a custom config file (overrides default search locations)
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// `sqlite:` database URL; defaults to a process-local in-memory store.
    #[arg(short = 'd', long)]
    database: Option<String>,

    /// Address to bind the HTTP listener to.
    #[arg(short = 'b', long, default_value = "127.0.0.1:8080")]
    bind: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    startup::init_tracing().context("Failed to initialize tracing")?;
    tracing::info!("Starting Dialog Router Bot API");

    let config = match &args.config {
        Some(path) => OrchestratorConfig::load_from(path).context("Failed to load config")?,
        None => OrchestratorConfig::load().context("Failed to load config")?,
    };

    let store: Arc<dyn PeerStore> = match &args.database {
        Some(url) => Arc::new(SqliteStore::new(url).await.context("Failed to open database")?),
        None => {
            tracing::warn!("No --database given, using a process-local in-memory store");
            Arc::new(InMemoryStore::default())
        }
    };

    let (_orchestrator, bot_gateway) = startup::compose(store, config).await;
    let app = handlers::router(handlers::AppState { bot_gateway })
        .layer(tower_http::trace::TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&args.bind)
        .await
        .with_context(|| format!("Failed to bind {}", args.bind))?;
    tracing::info!(addr = %args.bind, "Listening for bot HTTP traffic");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Shut down cleanly");
    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c().await.ok();
    tracing::info!("Ctrl+C received, shutting down");
}
