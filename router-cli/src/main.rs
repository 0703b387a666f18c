//! Dialog Router CLI — a terminal testing harness for the human side of the
//! router: drives a single local `HumanGateway` session over a stdin/stdout
//! REPL, without a real Telegram/Facebook transport.

mod repl;
mod startup;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use router_core::model::{Platform, UserKey};
use router_core::store::memory::InMemoryStore;
use router_core::store::PeerStore;
use router_core::store::SqliteStore;
use router_core::OrchestratorConfig;

/// Dialog Router CLI — local human testing harness
#[derive(Parser)]
#[command(name = "router-cli")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to a custom config file (overrides default search locations)
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// `sqlite:` database URL; defaults to a process-local in-memory store.
    #[arg(short = 'd', long)]
    database: Option<String>,

    /// Identifier for the local tester. The CLI has no platform of its own,
    /// so it presents itself as a Telegram user under this id.
    #[arg(short = 'u', long, default_value = "local-tester")]
    user: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    startup::init_tracing().context("Failed to initialize tracing")?;

    let config = match &args.config {
        Some(path) => OrchestratorConfig::load_from(path).context("Failed to load config")?,
        None => OrchestratorConfig::load().context("Failed to load config")?,
    };

    let store: Arc<dyn PeerStore> = match &args.database {
        Some(url) => Arc::new(SqliteStore::new(url).await.context("Failed to open database")?),
        None => Arc::new(InMemoryStore::default()),
    };

    let (_orchestrator, human_gateway) = startup::compose(store, config).await;
    let user = UserKey::new(Platform::Telegram, args.user);

    repl::run(human_gateway, user).await
}
