//! The capability set both gateways expose to the orchestrator, and the
//! reverse contract the orchestrator exposes back to them.
//!
//! Gateway selection is a function of a [`crate::model::Peer`]'s variant,
//! never a runtime class lookup — see `DESIGN NOTES` in `SPEC_FULL.md`.

use std::ops::RangeInclusive;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::OrchestratorError;
use crate::model::{Peer, PersonProfile};

/// What the orchestrator can ask either gateway to do on its peer's behalf.
#[async_trait]
pub trait Gateway: Send + Sync {
    /// A conversation has been matched; tell `peer` about it.
    async fn start_conversation(
        &self,
        conversation_id: u32,
        peer: &Peer,
        profile: &PersonProfile,
        guid: Uuid,
    ) -> Result<(), OrchestratorError>;

    /// Forward a message from the other participant to `peer`.
    async fn send_message(
        &self,
        conversation_id: u32,
        msg_id: u32,
        text: &str,
        peer: &Peer,
    ) -> Result<(), OrchestratorError>;

    /// The dialog ended; prompt `peer` for a score and a profile guess.
    async fn start_evaluation(
        &self,
        conversation_id: u32,
        peer: &Peer,
        options: &[PersonProfile],
        true_profile: &PersonProfile,
        score_range: RangeInclusive<i32>,
    ) -> Result<(), OrchestratorError>;

    /// Both sides are done evaluating; tear down any gateway-local state.
    async fn finish_conversation(&self, conversation_id: u32) -> Result<(), OrchestratorError>;
}

/// The events the orchestrator handles on behalf of either gateway.
///
/// Both `HumanGateway` and `BotGateway` hold one of these (defaulting to
/// [`NoopDialogHandler`]) and forward user/bot intents through it.
#[async_trait]
pub trait DialogHandler: Send + Sync {
    async fn on_human_initiated_dialog(&self, user: Peer) -> Result<(), OrchestratorError>;

    async fn on_message_received(
        &self,
        conversation_id: u32,
        sender: Peer,
        text: String,
        time: DateTime<Utc>,
    ) -> Result<u32, OrchestratorError>;

    async fn on_message_evaluated(
        &self,
        conversation_id: u32,
        evaluator: Peer,
        score: u8,
        msg_id: Option<u32>,
    ) -> Result<(), OrchestratorError>;

    async fn switch_to_next_topic(
        &self,
        conversation_id: u32,
        peer: Peer,
    ) -> Result<bool, OrchestratorError>;

    async fn trigger_dialog_end(&self, conversation_id: u32, peer: Peer) -> Result<(), OrchestratorError>;

    async fn evaluate_dialog(
        &self,
        conversation_id: u32,
        evaluator: Peer,
        score: Option<i32>,
    ) -> Result<(), OrchestratorError>;

    async fn select_other_peer_profile(
        &self,
        conversation_id: u32,
        evaluator: Peer,
        profile_idx: Option<usize>,
    ) -> Result<(), OrchestratorError>;

    async fn select_other_peer_profile_sentence(
        &self,
        conversation_id: u32,
        evaluator: Peer,
        sentence: String,
        sentence_idx: Option<usize>,
    ) -> Result<(), OrchestratorError>;

    async fn complain(&self, conversation_id: u32, complainer: Peer) -> Result<bool, OrchestratorError>;
}

/// The gateway default before the orchestrator is wired in: every call is an
/// invariant violation, since nothing should reach a gateway before
/// construction finishes.
pub struct NoopDialogHandler;

#[async_trait]
impl DialogHandler for NoopDialogHandler {
    async fn on_human_initiated_dialog(&self, _user: Peer) -> Result<(), OrchestratorError> {
        Err(OrchestratorError::InvalidState)
    }

    async fn on_message_received(
        &self,
        _conversation_id: u32,
        _sender: Peer,
        _text: String,
        _time: DateTime<Utc>,
    ) -> Result<u32, OrchestratorError> {
        Err(OrchestratorError::InvalidState)
    }

    async fn on_message_evaluated(
        &self,
        _conversation_id: u32,
        _evaluator: Peer,
        _score: u8,
        _msg_id: Option<u32>,
    ) -> Result<(), OrchestratorError> {
        Err(OrchestratorError::InvalidState)
    }

    async fn switch_to_next_topic(
        &self,
        _conversation_id: u32,
        _peer: Peer,
    ) -> Result<bool, OrchestratorError> {
        Err(OrchestratorError::InvalidState)
    }

    async fn trigger_dialog_end(&self, _conversation_id: u32, _peer: Peer) -> Result<(), OrchestratorError> {
        Err(OrchestratorError::InvalidState)
    }

    async fn evaluate_dialog(
        &self,
        _conversation_id: u32,
        _evaluator: Peer,
        _score: Option<i32>,
    ) -> Result<(), OrchestratorError> {
        Err(OrchestratorError::InvalidState)
    }

    async fn select_other_peer_profile(
        &self,
        _conversation_id: u32,
        _evaluator: Peer,
        _profile_idx: Option<usize>,
    ) -> Result<(), OrchestratorError> {
        Err(OrchestratorError::InvalidState)
    }

    async fn select_other_peer_profile_sentence(
        &self,
        _conversation_id: u32,
        _evaluator: Peer,
        _sentence: String,
        _sentence_idx: Option<usize>,
    ) -> Result<(), OrchestratorError> {
        Err(OrchestratorError::InvalidState)
    }

    async fn complain(&self, _conversation_id: u32, _complainer: Peer) -> Result<bool, OrchestratorError> {
        Err(OrchestratorError::InvalidState)
    }
}
