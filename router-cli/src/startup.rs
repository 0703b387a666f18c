//! Startup helpers: tracing initialization, the terminal `Messenger`, and the
//! composition root wiring a local human session through `router-core`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use router_core::gateway::{DialogHandler, Gateway};
use router_core::human::{HumanGateway, Messenger};
use router_core::mailbox::BotMailbox;
use router_core::model::UserKey;
use router_core::store::PeerStore;
use router_core::trigram::TrigramGuard;
use router_core::{BotGateway, Orchestrator, OrchestratorConfig};

/// Default tracing directives enabling info-level logs for this crate and `router_core`.
const DEFAULT_DIRECTIVES: &[&str] = &["router_cli=info", "router_core=info"];

/// Build the default `EnvFilter`: `RUST_LOG` (if set) plus our default directives.
pub fn default_env_filter() -> anyhow::Result<tracing_subscriber::EnvFilter> {
    let mut filter = tracing_subscriber::EnvFilter::from_default_env();
    for directive in DEFAULT_DIRECTIVES {
        filter = filter.add_directive(directive.parse()?);
    }
    Ok(filter)
}

/// Initialize the stdout tracing subscriber.
pub fn init_tracing() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter(default_env_filter()?).init();
    Ok(())
}

/// Prints orchestrator/gateway output to the terminal. The returned id is a
/// monotonic counter standing in for a platform message id; nothing in this
/// binary needs to look it back up.
pub struct TerminalMessenger {
    next_id: AtomicU64,
}

impl TerminalMessenger {
    pub fn new() -> Self {
        Self { next_id: AtomicU64::new(1) }
    }
}

impl Default for TerminalMessenger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Messenger for TerminalMessenger {
    async fn send_text(&self, _user: &UserKey, text: &str) -> String {
        println!("\n{text}\n");
        self.next_id.fetch_add(1, Ordering::Relaxed).to_string()
    }
}

/// Wire up the gateways and orchestrator around a store, as the single
/// composition root. This binary has no bot transport of its own; the
/// `BotGateway` it builds exists only so `Orchestrator::new` has both halves
/// of the gateway pair it needs to route conversations — a real bot transport
/// (`router-bot-api`) attaches to the same store independently.
pub async fn compose(store: Arc<dyn PeerStore>, config: OrchestratorConfig) -> (Arc<Orchestrator>, Arc<HumanGateway>) {
    let human_gateway = Arc::new(HumanGateway::new(store.clone(), config.clone(), Arc::new(TerminalMessenger::new())));
    let bot_gateway = Arc::new(BotGateway::new(
        store.clone(),
        Arc::new(BotMailbox::new()),
        Arc::new(TrigramGuard::new(config.trigram_window, config.n_bad_messages_in_a_row_threshold)),
    ));

    let orchestrator = Orchestrator::new(
        store,
        config,
        human_gateway.clone() as Arc<dyn Gateway>,
        bot_gateway.clone() as Arc<dyn Gateway>,
    );
    let handler: Arc<dyn DialogHandler> = orchestrator.clone();
    human_gateway.set_dialog_handler(handler.clone()).await;
    bot_gateway.set_dialog_handler(handler).await;

    (orchestrator, human_gateway)
}
