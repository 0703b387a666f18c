//! Startup helpers: tracing initialization and composition root.

use std::sync::Arc;

use router_core::gateway::{DialogHandler, Gateway};
use router_core::human::{HumanGateway, Messenger};
use router_core::mailbox::BotMailbox;
use router_core::model::UserKey;
use router_core::store::PeerStore;
use router_core::trigram::TrigramGuard;
use router_core::{BotGateway, OrchestratorConfig, Orchestrator};

#[cfg(test)]
mod tests;

/// Default tracing directives enabling info-level logs for this crate and `router_core`.
const DEFAULT_DIRECTIVES: &[&str] = &["router_bot_api=info", "router_core=info"];

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

/// No human transport is attached to this binary — it only serves bots.
/// Text that would go to a human participant is dropped with a log line
/// instead of raised as an error, matching the "gateway swallows what it
/// can't deliver" policy used elsewhere for non-critical output.
struct UnattachedMessenger;

#[async_trait::async_trait]
impl Messenger for UnattachedMessenger {
    async fn send_text(&self, user: &UserKey, text: &str) -> String {
        tracing::debug!(?user, text, "no human transport attached to this binary, dropping");
        String::new()
    }
}

/// Wire up the gateways and orchestrator around a store, as the single
/// composition root. The resulting `Arc<Orchestrator>` is both the
/// `DialogHandler` each gateway is given and the handle the bot HTTP
/// surface drives through `bot_gateway`.
pub async fn compose(
    store: Arc<dyn PeerStore>,
    config: OrchestratorConfig,
) -> (Arc<Orchestrator>, Arc<BotGateway>) {
    let human_gateway = Arc::new(HumanGateway::new(store.clone(), config.clone(), Arc::new(UnattachedMessenger)));
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

    (orchestrator, bot_gateway)
}
