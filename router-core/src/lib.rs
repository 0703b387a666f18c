//! Dialog orchestrator core.
//!
//! Matches humans with other humans or bots, drives a timed and
//! length-bounded role-play dialog through to evaluation, and persists the
//! result through a document-store port. `router-bot-api` and `router-cli`
//! are thin transport shells around this crate.

pub mod bot_gateway;
pub mod config;
pub mod error;
pub mod gateway;
pub mod human;
pub mod mailbox;
pub mod model;
pub mod orchestrator;
pub mod scheduler;
pub mod store;
pub mod trigram;

pub use bot_gateway::BotGateway;
pub use config::OrchestratorConfig;
pub use error::OrchestratorError;
pub use gateway::{DialogHandler, Gateway};
pub use orchestrator::Orchestrator;
