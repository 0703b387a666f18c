use std::sync::Arc;

use router_core::OrchestratorConfig;
use router_core::store::memory::InMemoryStore;

use super::compose;

#[test]
fn default_env_filter_builds() {
    assert!(super::default_env_filter().is_ok());
}

#[tokio::test]
async fn compose_wires_orchestrator_and_bot_gateway() {
    let store: Arc<dyn router_core::store::PeerStore> = Arc::new(InMemoryStore::default());
    let (_orchestrator, bot_gateway) = compose(store, OrchestratorConfig::default()).await;

    // Unregistered token still errors cleanly through the wired gateway.
    let result = bot_gateway.get_updates("ghost", std::time::Duration::ZERO, 10).await;
    assert!(result.is_err());
}
