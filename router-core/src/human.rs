//! Per-user finite-state machine translating messenger commands into
//! orchestrator calls, and orchestrator events into messenger text.
//!
//! Owns transient per-user state (FSM, message-id mirroring, in-progress
//! profile guesses) whose lifetime outlives any one conversation — the
//! orchestrator itself only ever sees the current conversation.

use std::collections::HashMap;
use std::ops::RangeInclusive;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use rand::seq::SliceRandom;
use tokio::sync::{Mutex, RwLock};

use crate::config::OrchestratorConfig;
use crate::error::OrchestratorError;
use crate::gateway::{DialogHandler, Gateway, NoopDialogHandler};
use crate::model::{Peer, PersonProfile, UserKey};
use crate::store::PeerStore;

/// Outbound boundary a `HumanGateway` renders through. Rendering of buttons,
/// keyboards, or platform-specific formatting is transport-layer concern and
/// stays out of this trait; it only needs plain text and an id to mirror back.
#[async_trait]
pub trait Messenger: Send + Sync {
    /// Send `text` to `user`, returning the platform's own id for that message.
    async fn send_text(&self, user: &UserKey, text: &str) -> String;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UserState {
    #[default]
    Idle,
    InLobby,
    InDialog {
        conversation_id: u32,
    },
    Evaluating {
        conversation_id: u32,
    },
    WaitingForPartnerEvaluation {
        conversation_id: u32,
    },
    WaitingForBotToken,
}

struct SentencePrep {
    /// Per sentence-index, the shuffled candidate sentences to present.
    tuples: Vec<Vec<String>>,
    answered: Vec<Option<String>>,
    current_index: usize,
}

#[derive(Default)]
struct UserSession {
    state: UserState,
    last_conversation_id: Option<u32>,
    msg_id_by_external: HashMap<String, u32>,
    external_by_msg_id: HashMap<u32, String>,
    score_submitted: bool,
    profile_submitted: bool,
    sentence_prep: Option<SentencePrep>,
}

impl UserSession {
    /// Whether this session's current state still belongs to `conversation_id`,
    /// in any of the three dialog-bearing phases.
    fn waiting_on(&self, conversation_id: u32) -> bool {
        matches!(
            self.state,
            UserState::InDialog { conversation_id: id }
            | UserState::Evaluating { conversation_id: id }
            | UserState::WaitingForPartnerEvaluation { conversation_id: id }
                if id == conversation_id
        )
    }
}

/// State machine and messenger adapter for human participants.
pub struct HumanGateway {
    store: Arc<dyn PeerStore>,
    config: OrchestratorConfig,
    messenger: Arc<dyn Messenger>,
    dialog_handler: RwLock<Arc<dyn DialogHandler>>,
    sessions: Mutex<HashMap<UserKey, UserSession>>,
}

impl HumanGateway {
    pub fn new(store: Arc<dyn PeerStore>, config: OrchestratorConfig, messenger: Arc<dyn Messenger>) -> Self {
        Self {
            store,
            config,
            messenger,
            dialog_handler: RwLock::new(Arc::new(NoopDialogHandler)),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Wire the orchestrator in once it exists. See the cyclic-reference note
    /// in the design notes: the gateway defaults to a no-op handler until this
    /// is called.
    pub async fn set_dialog_handler(&self, handler: Arc<dyn DialogHandler>) {
        *self.dialog_handler.write().await = handler;
    }

    async fn handler(&self) -> Arc<dyn DialogHandler> {
        self.dialog_handler.read().await.clone()
    }

    fn state_of<'a>(sessions: &'a mut HashMap<UserKey, UserSession>, user: &UserKey) -> &'a mut UserSession {
        sessions.entry(user.clone()).or_default()
    }

    fn describe_error(err: &OrchestratorError) -> String {
        match err {
            OrchestratorError::UserBanned => "You are banned from using this service.".to_string(),
            OrchestratorError::SimultaneousDialogs => {
                "You already have a conversation in progress.".to_string()
            }
            OrchestratorError::PeerNotFound => "No partner is available right now.".to_string(),
            OrchestratorError::InvalidState => "That isn't available right now.".to_string(),
            OrchestratorError::ValidationFailure(msg) => format!("That didn't work: {msg}"),
            OrchestratorError::ProfileLeak => "The dialog was ended.".to_string(),
            OrchestratorError::BotNotRegistered => "That bot isn't registered.".to_string(),
            OrchestratorError::Storage(_) => "Something went wrong, please try again.".to_string(),
        }
    }

    async fn say(&self, user: &UserKey, text: impl AsRef<str>) {
        self.messenger.send_text(user, text.as_ref()).await;
    }

    /// `/begin`: request a match. Always forwarded; the orchestrator is the
    /// source of truth for the simultaneous-dialog and banned-user checks.
    pub async fn on_begin(&self, user: &UserKey) {
        self.store.upsert_user(user, None).await.ok();

        let handler = self.handler().await;
        match handler.on_human_initiated_dialog(Peer::User(user.clone())).await {
            Ok(()) => {
                let mut sessions = self.sessions.lock().await;
                let session = Self::state_of(&mut sessions, user);
                if session.state == UserState::Idle {
                    session.state = UserState::InLobby;
                }
            }
            Err(err) => self.say(user, Self::describe_error(&err)).await,
        }
    }

    pub async fn on_help(&self, user: &UserKey) {
        self.say(
            user,
            "/begin starts a conversation. /end finishes the current one. /complain reports a partner.",
        )
        .await;
    }

    pub async fn on_get_started(&self, user: &UserKey, display_name: Option<&str>) {
        self.store.upsert_user(user, display_name).await.ok();
        self.say(user, "Welcome. Send /begin whenever you'd like to talk to someone.").await;
    }

    /// Free text sent while `InDialog`; anything else is rejected locally.
    pub async fn on_message_received(&self, user: &UserKey, text: String) {
        let conversation_id = {
            let mut sessions = self.sessions.lock().await;
            match Self::state_of(&mut sessions, user).state {
                UserState::InDialog { conversation_id } => conversation_id,
                _ => {
                    drop(sessions);
                    self.say(user, "You aren't in a conversation right now.").await;
                    return;
                }
            }
        };

        let handler = self.handler().await;
        if let Err(err) = handler
            .on_message_received(conversation_id, Peer::User(user.clone()), text, Utc::now())
            .await
        {
            self.say(user, Self::describe_error(&err)).await;
        }
    }

    /// Inline evaluation of a previously received message, referenced by the
    /// platform's own message id.
    pub async fn on_evaluate_message(&self, user: &UserKey, external_msg_id: &str, score: u8) {
        let conversation_id = {
            let mut sessions = self.sessions.lock().await;
            let session = Self::state_of(&mut sessions, user);
            match session.state {
                UserState::InDialog { conversation_id } => conversation_id,
                _ => {
                    drop(sessions);
                    self.say(user, "That message can no longer be rated.").await;
                    return;
                }
            }
        };

        let msg_id = {
            let mut sessions = self.sessions.lock().await;
            Self::state_of(&mut sessions, user)
                .msg_id_by_external
                .get(external_msg_id)
                .copied()
        };
        let Some(msg_id) = msg_id else {
            self.say(user, "That message can no longer be rated.").await;
            return;
        };

        let handler = self.handler().await;
        if let Err(err) = handler
            .on_message_evaluated(conversation_id, Peer::User(user.clone()), score, Some(msg_id))
            .await
        {
            self.say(user, Self::describe_error(&err)).await;
        }
    }

    pub async fn on_switch_topic(&self, user: &UserKey) {
        let conversation_id = {
            let mut sessions = self.sessions.lock().await;
            match Self::state_of(&mut sessions, user).state {
                UserState::InDialog { conversation_id } => conversation_id,
                _ => return,
            }
        };
        let handler = self.handler().await;
        handler.switch_to_next_topic(conversation_id, Peer::User(user.clone())).await.ok();
    }

    /// `/end`: request dialog termination.
    pub async fn on_end_dialog(&self, user: &UserKey) {
        let conversation_id = {
            let mut sessions = self.sessions.lock().await;
            match Self::state_of(&mut sessions, user).state {
                UserState::InDialog { conversation_id } => conversation_id,
                _ => {
                    drop(sessions);
                    self.say(user, "You aren't in a conversation right now.").await;
                    return;
                }
            }
        };
        let handler = self.handler().await;
        if let Err(err) = handler.trigger_dialog_end(conversation_id, Peer::User(user.clone())).await {
            self.say(user, Self::describe_error(&err)).await;
        }
    }

    pub async fn on_complain(&self, user: &UserKey) {
        let conversation_id = {
            let mut sessions = self.sessions.lock().await;
            Self::state_of(&mut sessions, user).last_conversation_id
        };
        let Some(conversation_id) = conversation_id else {
            self.say(user, "There's no conversation to complain about.").await;
            return;
        };

        let handler = self.handler().await;
        match handler.complain(conversation_id, Peer::User(user.clone())).await {
            Ok(true) => self.say(user, "Thanks, your complaint was recorded.").await,
            Ok(false) => self.say(user, "That conversation can't be reported.").await,
            Err(err) => self.say(user, Self::describe_error(&err)).await,
        }
    }

    /// Numeric dialog score during evaluation.
    pub async fn on_evaluate_dialog(&self, user: &UserKey, score: Option<i32>) {
        let conversation_id = {
            let mut sessions = self.sessions.lock().await;
            match Self::state_of(&mut sessions, user).state {
                UserState::Evaluating { conversation_id } => conversation_id,
                _ => {
                    drop(sessions);
                    self.say(user, "There's nothing to evaluate right now.").await;
                    return;
                }
            }
        };

        let handler = self.handler().await;
        match handler.evaluate_dialog(conversation_id, Peer::User(user.clone()), score).await {
            Ok(()) => {
                let mut sessions = self.sessions.lock().await;
                let session = Self::state_of(&mut sessions, user);
                session.score_submitted = true;
                self.advance_if_complete(session, conversation_id);
            }
            Err(err) => self.say(user, Self::describe_error(&err)).await,
        }
    }

    /// Whole-profile guess: one pick completes the guess.
    pub async fn on_profile_option_selected(&self, user: &UserKey, profile_idx: usize) {
        let conversation_id = {
            let mut sessions = self.sessions.lock().await;
            match Self::state_of(&mut sessions, user).state {
                UserState::Evaluating { conversation_id } => conversation_id,
                _ => {
                    drop(sessions);
                    self.say(user, "There's nothing to guess right now.").await;
                    return;
                }
            }
        };

        let handler = self.handler().await;
        match handler
            .select_other_peer_profile(conversation_id, Peer::User(user.clone()), Some(profile_idx))
            .await
        {
            Ok(()) => {
                let mut sessions = self.sessions.lock().await;
                let session = Self::state_of(&mut sessions, user);
                session.profile_submitted = true;
                self.advance_if_complete(session, conversation_id);
            }
            Err(err) => self.say(user, Self::describe_error(&err)).await,
        }
    }

    /// Sentence-by-sentence guess. `sentence_idx = None` targets whatever
    /// tuple is currently presented; re-selecting an already-answered index
    /// updates the stored guess without advancing.
    pub async fn on_profile_sentence_selected(
        &self,
        user: &UserKey,
        sentence: String,
        sentence_idx: Option<usize>,
    ) {
        let (conversation_id, target_idx, is_fresh) = {
            let mut sessions = self.sessions.lock().await;
            let session = Self::state_of(&mut sessions, user);
            let conversation_id = match session.state {
                UserState::Evaluating { conversation_id } => conversation_id,
                _ => {
                    drop(sessions);
                    self.say(user, "There's nothing to guess right now.").await;
                    return;
                }
            };
            let Some(prep) = session.sentence_prep.as_ref() else {
                drop(sessions);
                self.say(user, "There's nothing to guess right now.").await;
                return;
            };
            let target_idx = sentence_idx.unwrap_or(prep.current_index);
            let is_fresh = target_idx == prep.current_index && prep.answered[target_idx].is_none();
            (conversation_id, target_idx, is_fresh)
        };

        let handler = self.handler().await;
        if let Err(err) = handler
            .select_other_peer_profile_sentence(
                conversation_id,
                Peer::User(user.clone()),
                sentence.clone(),
                Some(target_idx),
            )
            .await
        {
            self.say(user, Self::describe_error(&err)).await;
            return;
        }

        let mut sessions = self.sessions.lock().await;
        let session = Self::state_of(&mut sessions, user);
        let Some(prep) = session.sentence_prep.as_mut() else {
            return;
        };
        prep.answered[target_idx] = Some(sentence);

        if !is_fresh {
            self.say(user, "Updated your guess for that sentence.").await;
            return;
        }

        prep.current_index += 1;
        if prep.current_index < prep.tuples.len() {
            let next_index = prep.current_index;
            let options = prep.tuples[next_index].clone();
            drop(sessions);
            self.prompt_sentence_tuple(user, next_index, &options).await;
        } else {
            session.profile_submitted = true;
            self.advance_if_complete(session, conversation_id);
        }
    }

    fn advance_if_complete(&self, session: &mut UserSession, conversation_id: u32) {
        let score_ok = !self.config.score_dialog || session.score_submitted;
        let profile_ok = !self.config.guess_profile || session.profile_submitted;
        if score_ok && profile_ok {
            session.state = UserState::WaitingForPartnerEvaluation { conversation_id };
        }
    }

    async fn prompt_sentence_tuple(&self, user: &UserKey, index: usize, options: &[String]) {
        let mut text = format!("Which sentence ({}) belongs to your partner's profile?\n", index + 1);
        for (i, sentence) in options.iter().enumerate() {
            text.push_str(&format!("{i}. {sentence}\n"));
        }
        self.say(user, text).await;
    }

    pub async fn on_set_bot(&self, user: &UserKey) {
        if !self.config.allow_set_bot {
            self.say(user, "Setting a test bot isn't available.").await;
            return;
        }
        {
            let mut sessions = self.sessions.lock().await;
            let session = Self::state_of(&mut sessions, user);
            if session.state != UserState::Idle {
                drop(sessions);
                self.say(user, "Finish what you're doing first.").await;
                return;
            }
            session.state = UserState::WaitingForBotToken;
        }
        self.send_bot_list(user).await;
    }

    async fn send_bot_list(&self, user: &UserKey) {
        let bots = self.store.list_non_banned_bots().await.unwrap_or_default();
        let mut text = String::from("Send a bot token to test against it, \"unset\" to clear, or \"cancel\".\n");
        for bot in bots {
            text.push_str(&format!("{} — {}\n", bot.token, bot.name));
        }
        self.say(user, text).await;
    }

    pub async fn on_bot_token_input(&self, user: &UserKey, input: &str) {
        let in_flow = {
            let mut sessions = self.sessions.lock().await;
            Self::state_of(&mut sessions, user).state == UserState::WaitingForBotToken
        };
        if !in_flow {
            return;
        }

        match input.trim() {
            "cancel" => {
                self.finish_bot_flow(user).await;
                self.say(user, "Cancelled.").await;
            }
            "list" => self.send_bot_list(user).await,
            "unset" => {
                if let Ok(Some(mut existing)) = self.store.get_user(user).await {
                    existing.assigned_test_bot = None;
                    self.store.save_user(&existing).await.ok();
                }
                self.finish_bot_flow(user).await;
                self.say(user, "Test bot unset.").await;
            }
            token => match self.store.get_bot(token).await {
                Ok(Some(bot)) if !bot.banned => {
                    if let Ok(Some(mut existing)) = self.store.get_user(user).await {
                        existing.assigned_test_bot = Some(bot.token.clone());
                        self.store.save_user(&existing).await.ok();
                    }
                    self.finish_bot_flow(user).await;
                    self.say(user, "Test bot set.").await;
                }
                _ => self.say(user, "Unknown token, try again.").await,
            },
        }
    }

    async fn finish_bot_flow(&self, user: &UserKey) {
        let mut sessions = self.sessions.lock().await;
        Self::state_of(&mut sessions, user).state = UserState::Idle;
    }

    /// `AbstractGateway.ConversationFailReason`-style surfacing of a failed
    /// match attempt that never reached `startConversation`.
    pub async fn on_conversation_failed(&self, user: &UserKey, reason: &OrchestratorError) {
        {
            let mut sessions = self.sessions.lock().await;
            let session = Self::state_of(&mut sessions, user);
            if session.state == UserState::InLobby {
                session.state = UserState::Idle;
            }
        }
        self.say(user, Self::describe_error(reason)).await;
    }

    pub async fn current_state(&self, user: &UserKey) -> UserState {
        let mut sessions = self.sessions.lock().await;
        Self::state_of(&mut sessions, user).state
    }
}

#[async_trait]
impl Gateway for HumanGateway {
    async fn start_conversation(
        &self,
        conversation_id: u32,
        peer: &Peer,
        profile: &PersonProfile,
        _guid: uuid::Uuid,
    ) -> Result<(), OrchestratorError> {
        let Peer::User(user) = peer else {
            return Err(OrchestratorError::InvalidState);
        };

        {
            let mut sessions = self.sessions.lock().await;
            let session = Self::state_of(&mut sessions, user);
            session.state = UserState::InDialog { conversation_id };
            session.last_conversation_id = Some(conversation_id);
            session.msg_id_by_external.clear();
            session.external_by_msg_id.clear();
            session.score_submitted = false;
            session.profile_submitted = false;
            session.sentence_prep = None;
        }

        let mut text = format!("You're matched. Here's your role:\n{}", profile.description());
        if self.config.show_topics {
            if let Some(topic) = profile.topic_at(0) {
                text.push_str(&format!("\n\nTopic: {topic}"));
            }
        }
        if self.config.reveal_dialog_id {
            text.push_str(&format!("\n\n(conversation #{conversation_id})"));
        }
        self.say(user, text).await;
        Ok(())
    }

    async fn send_message(
        &self,
        _conversation_id: u32,
        msg_id: u32,
        text: &str,
        peer: &Peer,
    ) -> Result<(), OrchestratorError> {
        let Peer::User(user) = peer else {
            return Err(OrchestratorError::InvalidState);
        };

        let external_id = self.messenger.send_text(user, text).await;
        let mut sessions = self.sessions.lock().await;
        let session = Self::state_of(&mut sessions, user);
        session.msg_id_by_external.insert(external_id.clone(), msg_id);
        session.external_by_msg_id.insert(msg_id, external_id);
        Ok(())
    }

    async fn start_evaluation(
        &self,
        conversation_id: u32,
        peer: &Peer,
        options: &[PersonProfile],
        true_profile: &PersonProfile,
        score_range: RangeInclusive<i32>,
    ) -> Result<(), OrchestratorError> {
        let Peer::User(user) = peer else {
            return Err(OrchestratorError::InvalidState);
        };

        {
            let mut sessions = self.sessions.lock().await;
            let session = Self::state_of(&mut sessions, user);
            session.state = UserState::Evaluating { conversation_id };
            session.score_submitted = false;
            session.profile_submitted = false;
            session.sentence_prep = None;
        }

        let mut text = String::from("The dialog ended.");
        if self.config.score_dialog {
            text.push_str(&format!(
                "\nRate it from {} to {}.",
                score_range.start(),
                score_range.end()
            ));
        }

        if self.config.guess_profile && self.config.guess_profile_sentence_by_sentence {
            let prep = self.build_sentence_prep(options, true_profile).await;
            let first_tuple = prep.tuples.first().cloned();
            {
                let mut sessions = self.sessions.lock().await;
                Self::state_of(&mut sessions, user).sentence_prep = Some(prep);
            }
            self.say(user, text).await;
            if let Some(tuple) = first_tuple {
                self.prompt_sentence_tuple(user, 0, &tuple).await;
            }
            return Ok(());
        }

        if self.config.guess_profile {
            text.push_str("\nWhich profile was your partner playing?");
            for (i, option) in options.iter().enumerate() {
                text.push_str(&format!("\n{i}. {}", option.description()));
            }
        }
        self.say(user, text).await;
        Ok(())
    }

    async fn finish_conversation(&self, conversation_id: u32) -> Result<(), OrchestratorError> {
        let mut sessions = self.sessions.lock().await;
        if let Some(session) = sessions.values_mut().find(|s| s.waiting_on(conversation_id)) {
            session.state = UserState::Idle;
        }
        Ok(())
    }
}

impl HumanGateway {
    async fn build_sentence_prep(&self, options: &[PersonProfile], true_profile: &PersonProfile) -> SentencePrep {
        let mut tuples = Vec::with_capacity(true_profile.sentences.len());
        for index in 0..true_profile.sentences.len() {
            let mut tuple = Vec::with_capacity(options.len());
            for candidate in options {
                let sentence = match candidate.sentences.get(index) {
                    Some(s) => s.clone(),
                    None => self
                        .store
                        .sample_sentence_at_index(index)
                        .await
                        .ok()
                        .flatten()
                        .unwrap_or_else(|| candidate.description()),
                };
                tuple.push(sentence);
            }
            tuple.shuffle(&mut rand::rng());
            tuples.push(tuple);
        }
        SentencePrep {
            answered: vec![None; tuples.len()],
            tuples,
            current_index: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Platform;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct RecordingMessenger {
        sent: StdMutex<Vec<(UserKey, String)>>,
        next_id: StdMutex<u64>,
    }

    #[async_trait]
    impl Messenger for RecordingMessenger {
        async fn send_text(&self, user: &UserKey, text: &str) -> String {
            self.sent.lock().unwrap().push((user.clone(), text.to_string()));
            let mut next_id = self.next_id.lock().unwrap();
            *next_id += 1;
            format!("ext-{next_id}")
        }
    }

    struct RecordingHandler {
        start_calls: StdMutex<u32>,
    }

    #[async_trait]
    impl DialogHandler for RecordingHandler {
        async fn on_human_initiated_dialog(&self, _user: Peer) -> Result<(), OrchestratorError> {
            *self.start_calls.lock().unwrap() += 1;
            Ok(())
        }

        async fn on_message_received(
            &self,
            _conversation_id: u32,
            _sender: Peer,
            _text: String,
            _time: chrono::DateTime<Utc>,
        ) -> Result<u32, OrchestratorError> {
            Ok(0)
        }

        async fn on_message_evaluated(
            &self,
            _conversation_id: u32,
            _evaluator: Peer,
            _score: u8,
            _msg_id: Option<u32>,
        ) -> Result<(), OrchestratorError> {
            Ok(())
        }

        async fn switch_to_next_topic(&self, _conversation_id: u32, _peer: Peer) -> Result<bool, OrchestratorError> {
            Ok(false)
        }

        async fn trigger_dialog_end(&self, _conversation_id: u32, _peer: Peer) -> Result<(), OrchestratorError> {
            Ok(())
        }

        async fn evaluate_dialog(
            &self,
            _conversation_id: u32,
            _evaluator: Peer,
            _score: Option<i32>,
        ) -> Result<(), OrchestratorError> {
            Ok(())
        }

        async fn select_other_peer_profile(
            &self,
            _conversation_id: u32,
            _evaluator: Peer,
            _profile_idx: Option<usize>,
        ) -> Result<(), OrchestratorError> {
            Ok(())
        }

        async fn select_other_peer_profile_sentence(
            &self,
            _conversation_id: u32,
            _evaluator: Peer,
            _sentence: String,
            _sentence_idx: Option<usize>,
        ) -> Result<(), OrchestratorError> {
            Ok(())
        }

        async fn complain(&self, _conversation_id: u32, _complainer: Peer) -> Result<bool, OrchestratorError> {
            Ok(true)
        }
    }

    fn test_user() -> UserKey {
        UserKey::new(Platform::Telegram, "42")
    }

    #[tokio::test]
    async fn begin_moves_idle_user_to_lobby() {
        let store = Arc::new(crate::store::InMemoryStore::default());
        let messenger = Arc::new(RecordingMessenger::default());
        let gateway = HumanGateway::new(store, OrchestratorConfig::default(), messenger);
        gateway
            .set_dialog_handler(Arc::new(RecordingHandler {
                start_calls: StdMutex::new(0),
            }))
            .await;

        let user = test_user();
        gateway.on_begin(&user).await;
        assert_eq!(gateway.current_state(&user).await, UserState::InLobby);
    }

    #[tokio::test]
    async fn start_conversation_sets_in_dialog_and_sends_profile() {
        let store = Arc::new(crate::store::InMemoryStore::default());
        let messenger = Arc::new(RecordingMessenger::default());
        let gateway = HumanGateway::new(store, OrchestratorConfig::default(), messenger.clone());

        let user = test_user();
        let profile = PersonProfile::new(vec!["I like cats.".into()]);
        gateway
            .start_conversation(5, &Peer::User(user.clone()), &profile, uuid::Uuid::now_v7())
            .await
            .unwrap();

        assert_eq!(gateway.current_state(&user).await, UserState::InDialog { conversation_id: 5 });
        assert!(messenger.sent.lock().unwrap()[0].1.contains("I like cats."));
    }

    #[tokio::test]
    async fn message_outside_dialog_is_rejected_locally() {
        let store = Arc::new(crate::store::InMemoryStore::default());
        let messenger = Arc::new(RecordingMessenger::default());
        let gateway = HumanGateway::new(store, OrchestratorConfig::default(), messenger.clone());
        gateway
            .set_dialog_handler(Arc::new(RecordingHandler {
                start_calls: StdMutex::new(0),
            }))
            .await;

        let user = test_user();
        gateway.on_message_received(&user, "hello".into()).await;
        let sent = messenger.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].1.contains("aren't in a conversation"));
    }

    #[tokio::test]
    async fn set_bot_disabled_by_config_replies_immediately() {
        let store = Arc::new(crate::store::InMemoryStore::default());
        let messenger = Arc::new(RecordingMessenger::default());
        let mut config = OrchestratorConfig::default();
        config.allow_set_bot = false;
        let gateway = HumanGateway::new(store, config, messenger.clone());

        let user = test_user();
        gateway.on_set_bot(&user).await;
        assert_eq!(gateway.current_state(&user).await, UserState::Idle);
    }

    #[tokio::test]
    async fn set_bot_token_flow_assigns_test_bot() {
        let store = Arc::new(crate::store::InMemoryStore::default());
        store.add_bot(crate::model::Bot::new("tok1", "Test Bot")).await;
        let messenger = Arc::new(RecordingMessenger::default());
        let mut config = OrchestratorConfig::default();
        config.allow_set_bot = true;
        let gateway = HumanGateway::new(store.clone(), config, messenger);

        let user = test_user();
        store.upsert_user(&user, None).await.unwrap();
        gateway.on_set_bot(&user).await;
        assert_eq!(gateway.current_state(&user).await, UserState::WaitingForBotToken);

        gateway.on_bot_token_input(&user, "tok1").await;
        assert_eq!(gateway.current_state(&user).await, UserState::Idle);

        let updated = store.get_user(&user).await.unwrap().unwrap();
        assert_eq!(updated.assigned_test_bot, Some("tok1".to_string()));
    }

    #[tokio::test]
    async fn evaluate_dialog_without_profile_guessing_completes_immediately() {
        let store = Arc::new(crate::store::InMemoryStore::default());
        let messenger = Arc::new(RecordingMessenger::default());
        let mut config = OrchestratorConfig::default();
        config.guess_profile = false;
        let gateway = HumanGateway::new(store, config, messenger);
        gateway
            .set_dialog_handler(Arc::new(RecordingHandler {
                start_calls: StdMutex::new(0),
            }))
            .await;

        let user = test_user();
        let profile = PersonProfile::new(vec!["a".into()]);
        gateway
            .start_evaluation(3, &Peer::User(user.clone()), &[], &profile, 0..=5)
            .await
            .unwrap();
        gateway.on_evaluate_dialog(&user, Some(4)).await;

        assert_eq!(
            gateway.current_state(&user).await,
            UserState::WaitingForPartnerEvaluation { conversation_id: 3 }
        );
    }
}
