//! Matching, conversation lifecycle, timers, and evaluation aggregation.
//!
//! Keeps all live state behind a single `tokio::sync::Mutex`, acquired only
//! for the in-memory bookkeeping and always released before a store call,
//! a gateway call, or a timer fire — the only points where another handler
//! may interleave, per the cooperative-concurrency model this core assumes.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use rand::seq::{IndexedRandom, IteratorRandom, SliceRandom};
use tokio::sync::Mutex;

use crate::config::OrchestratorConfig;
use crate::error::OrchestratorError;
use crate::gateway::{DialogHandler, Gateway};
use crate::model::{Complaint, Conversation, ConversationPeer, Message, Peer, User};
use crate::scheduler::{Handle, Scheduler};
use crate::store::{PeerStore, StorageError};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct EvalState {
    score_given: bool,
    profile_selected: bool,
}

#[derive(Default)]
struct OrchestratorState {
    lobby: HashMap<Peer, Handle>,
    active_dialogs: HashMap<u32, Conversation>,
    dialog_timeouts: HashMap<u32, Handle>,
    evaluations: HashMap<u32, (EvalState, EvalState)>,
}

/// The matching/lifecycle/evaluation core. Constructed behind an `Arc` so its
/// timer callbacks can hold a reference back to itself; gateways only ever
/// see it through the [`DialogHandler`] trait.
pub struct Orchestrator {
    store: Arc<dyn PeerStore>,
    config: OrchestratorConfig,
    scheduler: Scheduler,
    human_gateway: Arc<dyn Gateway>,
    bot_gateway: Arc<dyn Gateway>,
    state: Mutex<OrchestratorState>,
    self_ref: Weak<Orchestrator>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn PeerStore>,
        config: OrchestratorConfig,
        human_gateway: Arc<dyn Gateway>,
        bot_gateway: Arc<dyn Gateway>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            store,
            config,
            scheduler: Scheduler::new(),
            human_gateway,
            bot_gateway,
            state: Mutex::new(OrchestratorState::default()),
            self_ref: weak.clone(),
        })
    }

    fn arc(&self) -> Arc<Self> {
        self.self_ref.upgrade().expect("orchestrator outlives its own timers")
    }

    fn gateway_for(&self, peer: &Peer) -> &Arc<dyn Gateway> {
        match peer {
            Peer::User(_) => &self.human_gateway,
            Peer::Bot(_) => &self.bot_gateway,
        }
    }

    async fn generate_conversation_id(&self) -> u32 {
        loop {
            let candidate = rand::rng().random::<u32>() & 0x7FFF_FFFF;
            let live = self.state.lock().await.active_dialogs.contains_key(&candidate);
            if live {
                continue;
            }
            if matches!(self.store.conversation_id_exists(candidate).await, Ok(true)) {
                continue;
            }
            return candidate;
        }
    }

    // ---- 4.7.1 matching ----------------------------------------------

    async fn initiate_impl(&self, user: Peer) -> Result<(), OrchestratorError> {
        let Peer::User(user_key) = &user else {
            return Err(OrchestratorError::InvalidState);
        };

        let record = self
            .store
            .get_user(user_key)
            .await?
            .unwrap_or_else(|| User::new(user_key.clone()));
        if record.banned {
            return Err(OrchestratorError::UserBanned);
        }

        {
            let state = self.state.lock().await;
            let busy = state.lobby.contains_key(&user)
                || state.active_dialogs.values().any(|c| c.is_participant(&user));
            if busy {
                return Err(OrchestratorError::SimultaneousDialogs);
            }
        }

        let draws_bot: bool = {
            let r: f64 = rand::rng().random();
            r >= self.config.human_bot_ratio
        };
        if draws_bot {
            return self.match_with_bot(user).await;
        }

        let lobbied_peer = {
            let mut state = self.state.lock().await;
            let mut rng = rand::rng();
            let picked = state.lobby.keys().choose(&mut rng).cloned();
            if let Some(ref peer) = picked {
                if let Some(handle) = state.lobby.remove(peer) {
                    handle.cancel();
                }
            }
            picked
        };

        match lobbied_peer {
            Some(peer) => self.instantiate_conversation(user, peer).await,
            None => {
                let this = self.arc();
                let target = user.clone();
                let delay = Duration::from_secs(self.config.max_time_in_lobby);
                let handle = self.scheduler.schedule(delay, async move {
                    this.lobby_timeout_fired(target).await;
                });
                self.state.lock().await.lobby.insert(user, handle);
                Ok(())
            }
        }
    }

    async fn lobby_timeout_fired(&self, user: Peer) {
        let still_waiting = self.state.lock().await.lobby.remove(&user).is_some();
        if !still_waiting {
            return;
        }
        if let Err(err) = self.match_with_bot(user.clone()).await {
            // Best-effort notice: no dedicated failure channel exists on the
            // capability set, so this reuses `send_message` as a plain
            // notice to the peer that was waiting.
            self.gateway_for(&user)
                .send_message(0, 0, &format!("No partner could be found: {err}"), &user)
                .await
                .ok();
        }
    }

    async fn match_with_bot(&self, user: Peer) -> Result<(), OrchestratorError> {
        let Peer::User(user_key) = &user else {
            return Err(OrchestratorError::InvalidState);
        };
        let record = self
            .store
            .get_user(user_key)
            .await?
            .unwrap_or_else(|| User::new(user_key.clone()));

        let mut candidates = self.store.list_non_banned_bots().await?;
        if let Some(assigned) = &record.assigned_test_bot {
            candidates.retain(|b| &b.token == assigned);
        }

        let mut eligible = Vec::with_capacity(candidates.len());
        for bot in candidates {
            if !self.store.is_banned_pair(user_key, &bot.token).await? {
                eligible.push(bot);
            }
        }

        let chosen = eligible.choose(&mut rand::rng()).cloned();
        let Some(bot) = chosen else {
            return Err(OrchestratorError::PeerNotFound);
        };

        self.instantiate_conversation(user, Peer::Bot(bot.token)).await
    }

    // ---- 4.7.2 instantiation -------------------------------------------

    async fn instantiate_conversation(&self, peer1: Peer, peer2: Peer) -> Result<(), OrchestratorError> {
        let conversation_id = self.generate_conversation_id().await;

        let p1 = self
            .store
            .sample_profile()
            .await?
            .ok_or_else(|| OrchestratorError::ValidationFailure("no profiles available".into()))?;

        let linked = match p1.link_group_id {
            Some(group) => self.store.sample_profile_in_link_group(group, p1.id).await?,
            None => None,
        };
        let p2 = match linked {
            Some(p) => p,
            None => self
                .store
                .sample_profile_with_different_sentences(&p1.sentences)
                .await?
                .unwrap_or_else(|| p1.clone()),
        };

        let cp1 = ConversationPeer::new(peer1.clone(), p1.clone());
        let cp2 = ConversationPeer::new(peer2.clone(), p2.clone());
        let guid1 = cp1.peer_conversation_guid;
        let guid2 = cp2.peer_conversation_guid;
        let conv = Conversation::new(conversation_id, cp1, cp2, self.config.messages_to_switch_topic);

        {
            let mut state = self.state.lock().await;
            state.active_dialogs.insert(conversation_id, conv);
        }

        self.gateway_for(&peer1)
            .start_conversation(conversation_id, &peer1, &p1, guid1)
            .await?;
        self.gateway_for(&peer2)
            .start_conversation(conversation_id, &peer2, &p2, guid2)
            .await?;

        if self.config.show_topics {
            if let Some(topic) = p1.topic_at(0) {
                self.emit_topic(conversation_id, topic.to_string()).await;
            }
        }

        self.reset_inactivity_timer(conversation_id).await;
        Ok(())
    }

    async fn emit_topic(&self, conversation_id: u32, topic: String) {
        let result = {
            let mut state = self.state.lock().await;
            let Some(conv) = state.active_dialogs.get_mut(&conversation_id) else {
                return;
            };
            let msg_id = conv.messages.len() as u32;
            let sender = conv.participant1.peer.clone();
            let text = format!("Topic: {topic}");
            let mut msg = Message::new(msg_id, sender, text.clone());
            msg.system = true;
            conv.messages.push(msg);
            (conv.participant1.peer.clone(), conv.participant2.peer.clone(), msg_id, text)
        };
        let (p1, p2, msg_id, text) = result;
        self.gateway_for(&p1).send_message(conversation_id, msg_id, &text, &p1).await.ok();
        self.gateway_for(&p2).send_message(conversation_id, msg_id, &text, &p2).await.ok();
    }

    // ---- 4.7.3 message flow --------------------------------------------

    async fn receive_message_impl(
        &self,
        conversation_id: u32,
        sender: Peer,
        text: String,
        time: DateTime<Utc>,
    ) -> Result<u32, OrchestratorError> {
        let (msg_id, receiver, trigger_end) = {
            let mut state = self.state.lock().await;
            if state.evaluations.contains_key(&conversation_id) {
                return Err(OrchestratorError::InvalidState);
            }
            let conv = state
                .active_dialogs
                .get_mut(&conversation_id)
                .ok_or_else(|| OrchestratorError::ValidationFailure("conversation not found".into()))?;
            if !conv.is_participant(&sender) {
                return Err(OrchestratorError::ValidationFailure("not a participant".into()));
            }

            let msg_id = conv.messages.len() as u32;
            let mut msg = Message::new(msg_id, sender.clone(), text.clone());
            msg.time = time;
            conv.messages.push(msg);

            if conv.messages_to_switch_topic > 0 && conv.messages_to_switch_topic_left > 0 {
                conv.messages_to_switch_topic_left -= 1;
            }

            let receiver = conv.other_participant(&sender).unwrap().peer.clone();
            let trigger_end = conv.messages.len() >= self.config.max_length;
            (msg_id, receiver, trigger_end)
        };

        self.gateway_for(&receiver)
            .send_message(conversation_id, msg_id, &text, &receiver)
            .await
            .ok();

        if trigger_end {
            self.trigger_dialog_end_impl(conversation_id, sender).await?;
        } else {
            self.reset_inactivity_timer(conversation_id).await;
        }

        Ok(msg_id)
    }

    async fn message_evaluated_impl(
        &self,
        conversation_id: u32,
        evaluator: Peer,
        score: u8,
        msg_id: Option<u32>,
    ) -> Result<(), OrchestratorError> {
        if score > 1 {
            return Err(OrchestratorError::ValidationFailure("score must be 0 or 1".into()));
        }

        let mut state = self.state.lock().await;
        let conv = state
            .active_dialogs
            .get_mut(&conversation_id)
            .ok_or_else(|| OrchestratorError::ValidationFailure("conversation not found".into()))?;

        let target_idx = match msg_id {
            Some(id) => conv.messages.iter().position(|m| m.msg_id == id),
            None => conv.messages.iter().rposition(|m| m.sender != evaluator),
        };
        let Some(idx) = target_idx else {
            return Err(OrchestratorError::ValidationFailure("message not found".into()));
        };
        if conv.messages[idx].sender == evaluator {
            return Err(OrchestratorError::ValidationFailure("cannot evaluate your own message".into()));
        }
        conv.messages[idx].evaluation_score = Some(score);
        Ok(())
    }

    async fn switch_topic_impl(&self, conversation_id: u32, peer: Peer) -> Result<bool, OrchestratorError> {
        let next_topic = {
            let mut state = self.state.lock().await;
            let conv = state
                .active_dialogs
                .get_mut(&conversation_id)
                .ok_or_else(|| OrchestratorError::ValidationFailure("conversation not found".into()))?;
            if !conv.is_participant(&peer) {
                return Err(OrchestratorError::ValidationFailure("not a participant".into()));
            }
            if conv.messages_to_switch_topic > 0 && conv.messages_to_switch_topic_left > 0 {
                return Ok(false);
            }

            let next_index = conv.active_topic_index + 1;
            let both_defined = conv.participant1.assigned_profile.topic_at(next_index).is_some()
                && conv.participant2.assigned_profile.topic_at(next_index).is_some();
            if !both_defined {
                return Ok(false);
            }

            let topic = conv
                .participant1
                .assigned_profile
                .topic_at(next_index)
                .unwrap()
                .to_string();
            conv.active_topic_index = next_index;
            conv.messages_to_switch_topic_left = conv.messages_to_switch_topic;
            topic
        };

        self.emit_topic(conversation_id, next_topic).await;
        Ok(true)
    }

    // ---- 4.7.4 termination & evaluation ---------------------------------

    async fn trigger_dialog_end_impl(&self, conversation_id: u32, peer: Peer) -> Result<(), OrchestratorError> {
        let should_transition = {
            let mut state = self.state.lock().await;
            let already_evaluating = state.evaluations.contains_key(&conversation_id);
            let conv = state
                .active_dialogs
                .get_mut(&conversation_id)
                .ok_or_else(|| OrchestratorError::ValidationFailure("conversation not found".into()))?;
            if let Some(p) = conv.participant_for_mut(&peer) {
                p.triggered_dialog_end = true;
            }
            !already_evaluating
        };

        if should_transition {
            self.transition_to_evaluation(conversation_id).await?;
        }
        Ok(())
    }

    async fn transition_to_evaluation(&self, conversation_id: u32) -> Result<(), OrchestratorError> {
        let snapshot = {
            let mut state = self.state.lock().await;
            if state.evaluations.contains_key(&conversation_id) {
                return Ok(());
            }
            let conv = state
                .active_dialogs
                .get(&conversation_id)
                .ok_or_else(|| OrchestratorError::ValidationFailure("conversation not found".into()))?;
            let snapshot = (
                conv.participant1.peer.clone(),
                conv.participant1.assigned_profile.clone(),
                conv.participant2.peer.clone(),
                conv.participant2.assigned_profile.clone(),
            );
            state
                .evaluations
                .insert(conversation_id, (EvalState::default(), EvalState::default()));
            snapshot
        };
        let (p1_peer, p1_profile, p2_peer, p2_profile) = snapshot;

        let distractor_for_p2 = self
            .store
            .sample_profile_with_different_sentences(&p2_profile.sentences)
            .await?
            .unwrap_or_else(|| p2_profile.clone());
        let distractor_for_p1 = self
            .store
            .sample_profile_with_different_sentences(&p1_profile.sentences)
            .await?
            .unwrap_or_else(|| p1_profile.clone());

        let mut options_for_p1 = vec![p2_profile.clone(), distractor_for_p2];
        let mut options_for_p2 = vec![p1_profile.clone(), distractor_for_p1];
        {
            let mut rng = rand::rng();
            options_for_p1.shuffle(&mut rng);
            options_for_p2.shuffle(&mut rng);
        }

        {
            let mut state = self.state.lock().await;
            if let Some(conv) = state.active_dialogs.get_mut(&conversation_id) {
                conv.participant1.other_peer_profile_options = options_for_p1.clone();
                conv.participant2.other_peer_profile_options = options_for_p2.clone();
            }
        }

        let eval_range = self.config.eval_min..=self.config.eval_max;
        self.gateway_for(&p1_peer)
            .start_evaluation(conversation_id, &p1_peer, &options_for_p1, &p2_profile, eval_range.clone())
            .await?;
        self.gateway_for(&p2_peer)
            .start_evaluation(conversation_id, &p2_peer, &options_for_p2, &p1_profile, eval_range)
            .await?;

        self.reset_inactivity_timer(conversation_id).await;
        Ok(())
    }

    async fn evaluate_dialog_impl(
        &self,
        conversation_id: u32,
        evaluator: Peer,
        score: Option<i32>,
    ) -> Result<(), OrchestratorError> {
        if let Some(s) = score {
            if s < self.config.eval_min || s > self.config.eval_max {
                return Err(OrchestratorError::ValidationFailure("score out of range".into()));
            }
        }

        let both_complete = {
            let mut state = self.state.lock().await;
            let OrchestratorState { active_dialogs, evaluations, .. } = &mut *state;

            if !evaluations.contains_key(&conversation_id) {
                return Err(OrchestratorError::InvalidState);
            }
            let conv = active_dialogs
                .get_mut(&conversation_id)
                .ok_or_else(|| OrchestratorError::ValidationFailure("conversation not found".into()))?;

            let is_first = conv.participant1.peer == evaluator;
            let participant = conv
                .participant_for_mut(&evaluator)
                .ok_or_else(|| OrchestratorError::ValidationFailure("not a participant".into()))?;
            if let Some(s) = score {
                participant.dialog_score = Some(s);
            }

            let pair = evaluations.get_mut(&conversation_id).unwrap();
            let eval_state = if is_first { &mut pair.0 } else { &mut pair.1 };
            eval_state.score_given = true;
            if !self.config.assign_profile || !self.config.guess_profile {
                eval_state.profile_selected = true;
            }

            let p1_complete = (pair.0.score_given && pair.0.profile_selected) || conv.participant1.is_bot();
            let p2_complete = (pair.1.score_given && pair.1.profile_selected) || conv.participant2.is_bot();
            p1_complete && p2_complete
        };

        if both_complete {
            self.cleanup(conversation_id).await;
        }
        Ok(())
    }

    async fn select_profile_impl(
        &self,
        conversation_id: u32,
        evaluator: Peer,
        profile_idx: Option<usize>,
    ) -> Result<(), OrchestratorError> {
        let Some(idx) = profile_idx else {
            return Err(OrchestratorError::ValidationFailure("profile_idx required".into()));
        };

        let both_complete = {
            let mut state = self.state.lock().await;
            let OrchestratorState { active_dialogs, evaluations, .. } = &mut *state;

            if !evaluations.contains_key(&conversation_id) {
                return Err(OrchestratorError::InvalidState);
            }
            let conv = active_dialogs
                .get_mut(&conversation_id)
                .ok_or_else(|| OrchestratorError::ValidationFailure("conversation not found".into()))?;

            let is_first = conv.participant1.peer == evaluator;
            let participant = conv
                .participant_for_mut(&evaluator)
                .ok_or_else(|| OrchestratorError::ValidationFailure("not a participant".into()))?;
            let chosen = participant
                .other_peer_profile_options
                .get(idx)
                .cloned()
                .ok_or_else(|| OrchestratorError::ValidationFailure("invalid profile index".into()))?;
            participant.other_peer_profile_selected = Some(chosen);

            let pair = evaluations.get_mut(&conversation_id).unwrap();
            let eval_state = if is_first { &mut pair.0 } else { &mut pair.1 };
            eval_state.profile_selected = true;

            let p1_complete = (pair.0.score_given && pair.0.profile_selected) || conv.participant1.is_bot();
            let p2_complete = (pair.1.score_given && pair.1.profile_selected) || conv.participant2.is_bot();
            p1_complete && p2_complete
        };

        if both_complete {
            self.cleanup(conversation_id).await;
        }
        Ok(())
    }

    async fn select_sentence_impl(
        &self,
        conversation_id: u32,
        evaluator: Peer,
        sentence: String,
        sentence_idx: Option<usize>,
    ) -> Result<(), OrchestratorError> {
        let Some(idx) = sentence_idx else {
            return Err(OrchestratorError::ValidationFailure("sentence_idx required".into()));
        };

        let both_complete = {
            let mut state = self.state.lock().await;
            let OrchestratorState { active_dialogs, evaluations, .. } = &mut *state;

            if !evaluations.contains_key(&conversation_id) {
                return Err(OrchestratorError::InvalidState);
            }
            let conv = active_dialogs
                .get_mut(&conversation_id)
                .ok_or_else(|| OrchestratorError::ValidationFailure("conversation not found".into()))?;

            let is_first = conv.participant1.peer == evaluator;
            let true_len = conv
                .other_participant(&evaluator)
                .ok_or_else(|| OrchestratorError::ValidationFailure("not a participant".into()))?
                .assigned_profile
                .sentences
                .len();

            let participant = conv.participant_for_mut(&evaluator).unwrap();
            if participant.other_peer_profile_selected_sentences.len() <= idx {
                participant.other_peer_profile_selected_sentences.resize(idx + 1, None);
            }
            participant.other_peer_profile_selected_sentences[idx] = Some(sentence);

            let all_filled = true_len > 0
                && participant.other_peer_profile_selected_sentences.len() >= true_len
                && participant.other_peer_profile_selected_sentences[..true_len]
                    .iter()
                    .all(Option::is_some);

            let pair = evaluations.get_mut(&conversation_id).unwrap();
            let eval_state = if is_first { &mut pair.0 } else { &mut pair.1 };
            if all_filled {
                eval_state.profile_selected = true;
            }

            let p1_complete = (pair.0.score_given && pair.0.profile_selected) || conv.participant1.is_bot();
            let p2_complete = (pair.1.score_given && pair.1.profile_selected) || conv.participant2.is_bot();
            p1_complete && p2_complete
        };

        if both_complete {
            self.cleanup(conversation_id).await;
        }
        Ok(())
    }

    async fn cleanup(&self, conversation_id: u32) {
        let conv = {
            let mut state = self.state.lock().await;
            state.evaluations.remove(&conversation_id);
            if let Some(handle) = state.dialog_timeouts.remove(&conversation_id) {
                handle.cancel();
            }
            state.active_dialogs.remove(&conversation_id)
        };

        let Some(conv) = conv else {
            return;
        };

        let p1 = conv.participant1.peer.clone();
        let p2 = conv.participant2.peer.clone();

        let (r1, r2) = tokio::join!(
            self.gateway_for(&p1).finish_conversation(conversation_id),
            self.gateway_for(&p2).finish_conversation(conversation_id),
        );
        if let Err(err) = r1 {
            tracing::warn!(conversation_id, error = %err, "finish_conversation failed for participant 1");
        }
        if let Err(err) = r2 {
            tracing::warn!(conversation_id, error = %err, "finish_conversation failed for participant 2");
        }

        match self.store.save_conversation(&conv).await {
            Ok(()) => tracing::info!(conversation_id, "conversation persisted"),
            Err(StorageError::EmptyConversation) => {
                tracing::warn!(conversation_id, "discarding conversation with no messages");
            }
            Err(err) => tracing::warn!(conversation_id, error = %err, "failed to persist conversation"),
        }
    }

    // ---- 4.7.5 inactivity ------------------------------------------------

    fn reset_inactivity_timer(
        &self,
        conversation_id: u32,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            let this = self.arc();
            let delay = Duration::from_secs(self.config.inactivity_timeout);
            let fired: std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>> = Box::pin(async move {
                this.inactivity_fired(conversation_id).await;
            });
            let new_handle = self.scheduler.schedule(delay, fired);

            let mut state = self.state.lock().await;
            if !state.active_dialogs.contains_key(&conversation_id) {
                new_handle.cancel();
                return;
            }
            if let Some(old) = state.dialog_timeouts.insert(conversation_id, new_handle) {
                old.cancel();
            }
        })
    }

    async fn inactivity_fired(&self, conversation_id: u32) {
        let in_evaluation = {
            let state = self.state.lock().await;
            if !state.active_dialogs.contains_key(&conversation_id) {
                return;
            }
            state.evaluations.contains_key(&conversation_id)
        };

        if in_evaluation {
            self.cleanup(conversation_id).await;
            return;
        }

        let peer = {
            let state = self.state.lock().await;
            state.active_dialogs.get(&conversation_id).map(|c| c.participant1.peer.clone())
        };
        if let Some(peer) = peer {
            self.trigger_dialog_end_impl(conversation_id, peer).await.ok();
        }
    }

    // ---- 4.7.6 complaints -------------------------------------------------

    async fn complain_impl(&self, conversation_id: u32, complainer: Peer) -> Result<bool, OrchestratorError> {
        let conv = self.state.lock().await.active_dialogs.get(&conversation_id).cloned();
        let Some(conv) = conv else {
            return Ok(false);
        };
        if conv.messages.is_empty() {
            return Ok(false);
        }
        let Some(complain_to) = conv.other_participant(&complainer).map(|p| p.peer.clone()) else {
            return Ok(false);
        };

        self.store
            .save_complaint(&Complaint {
                complainer,
                complain_to,
                conversation_id,
                processed: false,
            })
            .await?;
        Ok(true)
    }
}

#[async_trait]
impl DialogHandler for Orchestrator {
    async fn on_human_initiated_dialog(&self, user: Peer) -> Result<(), OrchestratorError> {
        self.initiate_impl(user).await
    }

    async fn on_message_received(
        &self,
        conversation_id: u32,
        sender: Peer,
        text: String,
        time: DateTime<Utc>,
    ) -> Result<u32, OrchestratorError> {
        self.receive_message_impl(conversation_id, sender, text, time).await
    }

    async fn on_message_evaluated(
        &self,
        conversation_id: u32,
        evaluator: Peer,
        score: u8,
        msg_id: Option<u32>,
    ) -> Result<(), OrchestratorError> {
        self.message_evaluated_impl(conversation_id, evaluator, score, msg_id).await
    }

    async fn switch_to_next_topic(&self, conversation_id: u32, peer: Peer) -> Result<bool, OrchestratorError> {
        self.switch_topic_impl(conversation_id, peer).await
    }

    async fn trigger_dialog_end(&self, conversation_id: u32, peer: Peer) -> Result<(), OrchestratorError> {
        self.trigger_dialog_end_impl(conversation_id, peer).await
    }

    async fn evaluate_dialog(
        &self,
        conversation_id: u32,
        evaluator: Peer,
        score: Option<i32>,
    ) -> Result<(), OrchestratorError> {
        self.evaluate_dialog_impl(conversation_id, evaluator, score).await
    }

    async fn select_other_peer_profile(
        &self,
        conversation_id: u32,
        evaluator: Peer,
        profile_idx: Option<usize>,
    ) -> Result<(), OrchestratorError> {
        self.select_profile_impl(conversation_id, evaluator, profile_idx).await
    }

    async fn select_other_peer_profile_sentence(
        &self,
        conversation_id: u32,
        evaluator: Peer,
        sentence: String,
        sentence_idx: Option<usize>,
    ) -> Result<(), OrchestratorError> {
        self.select_sentence_impl(conversation_id, evaluator, sentence, sentence_idx).await
    }

    async fn complain(&self, conversation_id: u32, complainer: Peer) -> Result<bool, OrchestratorError> {
        self.complain_impl(conversation_id, complainer).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Bot, BannedPair, Platform, PersonProfile, UserKey};
    use crate::store::InMemoryStore;
    use std::sync::Mutex as StdMutex;
    use uuid::Uuid;

    #[derive(Default)]
    struct RecordingGateway {
        started: StdMutex<Vec<(u32, Peer)>>,
        messages: StdMutex<Vec<(u32, u32, String, Peer)>>,
        evaluations_started: StdMutex<Vec<(u32, Peer)>>,
        finished: StdMutex<Vec<u32>>,
    }

    #[async_trait]
    impl Gateway for RecordingGateway {
        async fn start_conversation(
            &self,
            conversation_id: u32,
            peer: &Peer,
            _profile: &crate::model::PersonProfile,
            _guid: Uuid,
        ) -> Result<(), OrchestratorError> {
            self.started.lock().unwrap().push((conversation_id, peer.clone()));
            Ok(())
        }

        async fn send_message(
            &self,
            conversation_id: u32,
            msg_id: u32,
            text: &str,
            peer: &Peer,
        ) -> Result<(), OrchestratorError> {
            self.messages
                .lock()
                .unwrap()
                .push((conversation_id, msg_id, text.to_string(), peer.clone()));
            Ok(())
        }

        async fn start_evaluation(
            &self,
            conversation_id: u32,
            peer: &Peer,
            _options: &[crate::model::PersonProfile],
            _true_profile: &crate::model::PersonProfile,
            _score_range: std::ops::RangeInclusive<i32>,
        ) -> Result<(), OrchestratorError> {
            self.evaluations_started.lock().unwrap().push((conversation_id, peer.clone()));
            Ok(())
        }

        async fn finish_conversation(&self, conversation_id: u32) -> Result<(), OrchestratorError> {
            self.finished.lock().unwrap().push(conversation_id);
            Ok(())
        }
    }

    fn user(id: &str) -> Peer {
        Peer::User(UserKey::new(Platform::Telegram, id))
    }

    async fn seeded_store() -> Arc<InMemoryStore> {
        let store = Arc::new(InMemoryStore::default());
        store.add_profile(PersonProfile::new(vec!["I like cats.".into(), "I live in Berlin.".into()])).await;
        store.add_profile(PersonProfile::new(vec!["I like dogs.".into(), "I live in Paris.".into()])).await;
        store
    }

    fn orchestrator_with(
        store: Arc<InMemoryStore>,
        config: OrchestratorConfig,
    ) -> (Arc<Orchestrator>, Arc<RecordingGateway>, Arc<RecordingGateway>) {
        let human = Arc::new(RecordingGateway::default());
        let bot = Arc::new(RecordingGateway::default());
        let orchestrator = Orchestrator::new(store, config, human.clone(), bot.clone());
        (orchestrator, human, bot)
    }

    #[tokio::test]
    async fn two_humans_in_lobby_are_paired() {
        let store = seeded_store().await;
        let mut config = OrchestratorConfig::default();
        config.human_bot_ratio = 1.0; // always prefer human match
        let (orchestrator, human, _bot) = orchestrator_with(store, config);

        let alice = user("alice");
        let bob = user("bob");

        orchestrator.on_human_initiated_dialog(alice.clone()).await.unwrap();
        assert!(human.started.lock().unwrap().is_empty());

        orchestrator.on_human_initiated_dialog(bob.clone()).await.unwrap();
        let started = human.started.lock().unwrap();
        assert_eq!(started.len(), 2);
    }

    #[tokio::test]
    async fn simultaneous_dialog_is_rejected() {
        let store = seeded_store().await;
        let mut config = OrchestratorConfig::default();
        config.human_bot_ratio = 0.0; // always bot match
        let (orchestrator, _human, _bot) = orchestrator_with(store.clone(), config);
        store.add_bot(Bot::new("tok", "Bot")).await;

        let alice = user("alice");
        orchestrator.on_human_initiated_dialog(alice.clone()).await.unwrap();

        let err = orchestrator.on_human_initiated_dialog(alice).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::SimultaneousDialogs));
    }

    #[tokio::test]
    async fn banned_pair_is_skipped_leaving_no_eligible_bot() {
        let store = seeded_store().await;
        store.add_bot(Bot::new("tok", "Bot")).await;
        store
            .save_banned_pair(&BannedPair {
                user: UserKey::new(Platform::Telegram, "alice"),
                bot_token: "tok".into(),
            })
            .await
            .unwrap();

        let mut config = OrchestratorConfig::default();
        config.human_bot_ratio = 0.0;
        let (orchestrator, _human, _bot) = orchestrator_with(store, config);

        let err = orchestrator.on_human_initiated_dialog(user("alice")).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::PeerNotFound));
    }

    #[tokio::test]
    async fn length_cap_triggers_automatic_evaluation() {
        let store = seeded_store().await;
        store.add_bot(Bot::new("tok", "Bot")).await;
        let mut config = OrchestratorConfig::default();
        config.human_bot_ratio = 0.0;
        config.max_length = 2;
        let (orchestrator, human, bot) = orchestrator_with(store, config);

        let alice = user("alice");
        orchestrator.on_human_initiated_dialog(alice.clone()).await.unwrap();
        let conversation_id = human.started.lock().unwrap()[0].0;

        orchestrator
            .on_message_received(conversation_id, alice.clone(), "hi".into(), Utc::now())
            .await
            .unwrap();
        orchestrator
            .on_message_received(conversation_id, Peer::Bot("tok".into()), "hello".into(), Utc::now())
            .await
            .unwrap();

        assert_eq!(human.evaluations_started.lock().unwrap().len(), 1);
        assert_eq!(bot.evaluations_started.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn evaluation_completes_and_cleans_up_without_profile_guessing() {
        let store = seeded_store().await;
        store.add_bot(Bot::new("tok", "Bot")).await;
        let mut config = OrchestratorConfig::default();
        config.human_bot_ratio = 0.0;
        config.guess_profile = false;
        let (orchestrator, human, bot) = orchestrator_with(store, config);

        let alice = user("alice");
        orchestrator.on_human_initiated_dialog(alice.clone()).await.unwrap();
        let conversation_id = human.started.lock().unwrap()[0].0;

        orchestrator
            .on_message_received(conversation_id, alice.clone(), "hi".into(), Utc::now())
            .await
            .unwrap();
        orchestrator.trigger_dialog_end(conversation_id, alice.clone()).await.unwrap();

        // Human side must submit a score; the bot side completes on any submission.
        orchestrator.evaluate_dialog(conversation_id, alice, Some(3)).await.unwrap();
        orchestrator
            .evaluate_dialog(conversation_id, Peer::Bot("tok".into()), Some(4))
            .await
            .unwrap();

        assert_eq!(human.finished.lock().unwrap().len(), 1);
        assert_eq!(bot.finished.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn repeated_trigger_dialog_end_does_not_reset_evaluation() {
        let store = seeded_store().await;
        store.add_bot(Bot::new("tok", "Bot")).await;
        let mut config = OrchestratorConfig::default();
        config.human_bot_ratio = 0.0;
        let (orchestrator, human, _bot) = orchestrator_with(store, config);

        let alice = user("alice");
        orchestrator.on_human_initiated_dialog(alice.clone()).await.unwrap();
        let conversation_id = human.started.lock().unwrap()[0].0;
        orchestrator
            .on_message_received(conversation_id, alice.clone(), "hi".into(), Utc::now())
            .await
            .unwrap();

        orchestrator.trigger_dialog_end(conversation_id, alice.clone()).await.unwrap();
        orchestrator.trigger_dialog_end(conversation_id, alice).await.unwrap();

        assert_eq!(human.evaluations_started.lock().unwrap().len(), 1);
    }
}
