//! In-memory [`PeerStore`] used by orchestrator unit tests.
//!
//! Mirrors the teacher's `MockSessionStore` test double: a plain `HashMap`
//! behind a mutex, with none of the SQLite adapter's persistence concerns.

use std::collections::HashMap;

use async_trait::async_trait;
use rand::seq::{IndexedRandom, IteratorRandom};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::model::{BannedPair, Bot, Complaint, Conversation, PersonProfile, User, UserKey};
use crate::store::{PeerStore, StorageError};

/// In-memory, non-persistent store for fast tests.
#[derive(Default)]
pub struct InMemoryStore {
    users: Mutex<HashMap<UserKey, User>>,
    bots: Mutex<HashMap<String, Bot>>,
    banned_pairs: Mutex<Vec<BannedPair>>,
    profiles: Mutex<HashMap<Uuid, PersonProfile>>,
    conversations: Mutex<HashMap<u32, Conversation>>,
    complaints: Mutex<Vec<Complaint>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a profile for tests that need deterministic sampling.
    pub async fn add_profile(&self, profile: PersonProfile) {
        self.profiles.lock().await.insert(profile.id, profile);
    }

    /// Seed a bot for tests that need deterministic matching.
    pub async fn add_bot(&self, bot: Bot) {
        self.bots.lock().await.insert(bot.token.clone(), bot);
    }

    /// Look up a saved conversation by id, for asserting on persisted state in tests.
    pub async fn get_conversation(&self, id: u32) -> Option<Conversation> {
        self.conversations.lock().await.get(&id).cloned()
    }
}

#[async_trait]
impl PeerStore for InMemoryStore {
    async fn upsert_user(
        &self,
        key: &UserKey,
        display_name: Option<&str>,
    ) -> Result<User, StorageError> {
        let mut users = self.users.lock().await;
        let user = users.entry(key.clone()).or_insert_with(|| User::new(key.clone()));
        if let Some(name) = display_name {
            user.display_name = Some(name.to_string());
        }
        Ok(user.clone())
    }

    async fn get_user(&self, key: &UserKey) -> Result<Option<User>, StorageError> {
        Ok(self.users.lock().await.get(key).cloned())
    }

    async fn save_user(&self, user: &User) -> Result<(), StorageError> {
        self.users.lock().await.insert(user.key.clone(), user.clone());
        Ok(())
    }

    async fn get_bot(&self, token: &str) -> Result<Option<Bot>, StorageError> {
        Ok(self.bots.lock().await.get(token).cloned())
    }

    async fn list_non_banned_bots(&self) -> Result<Vec<Bot>, StorageError> {
        Ok(self
            .bots
            .lock()
            .await
            .values()
            .filter(|b| !b.banned)
            .cloned()
            .collect())
    }

    async fn save_bot(&self, bot: &Bot) -> Result<(), StorageError> {
        self.bots.lock().await.insert(bot.token.clone(), bot.clone());
        Ok(())
    }

    async fn is_banned_pair(&self, user: &UserKey, bot_token: &str) -> Result<bool, StorageError> {
        Ok(self
            .banned_pairs
            .lock()
            .await
            .iter()
            .any(|p| &p.user == user && p.bot_token == bot_token))
    }

    async fn sample_profile(&self) -> Result<Option<PersonProfile>, StorageError> {
        let profiles = self.profiles.lock().await;
        let mut rng = rand::rng();
        Ok(profiles.values().choose(&mut rng).cloned())
    }

    async fn sample_profile_in_link_group(
        &self,
        link_group_id: Uuid,
        excluding: Uuid,
    ) -> Result<Option<PersonProfile>, StorageError> {
        let profiles = self.profiles.lock().await;
        let mut rng = rand::rng();
        Ok(profiles
            .values()
            .filter(|p| p.id != excluding && p.link_group_id == Some(link_group_id))
            .choose(&mut rng)
            .cloned())
    }

    async fn sample_profile_with_different_sentences(
        &self,
        sentences: &[String],
    ) -> Result<Option<PersonProfile>, StorageError> {
        let profiles = self.profiles.lock().await;
        let mut rng = rand::rng();
        Ok(profiles
            .values()
            .filter(|p| p.sentences != sentences)
            .choose(&mut rng)
            .cloned())
    }

    async fn sample_sentence_at_index(&self, index: usize) -> Result<Option<String>, StorageError> {
        let profiles = self.profiles.lock().await;
        let candidates: Vec<&String> = profiles
            .values()
            .filter_map(|p| p.sentences.get(index))
            .collect();
        let mut rng = rand::rng();
        Ok(candidates.choose(&mut rng).map(|s| (*s).clone()))
    }

    async fn conversation_id_exists(&self, id: u32) -> Result<bool, StorageError> {
        Ok(self.conversations.lock().await.contains_key(&id))
    }

    async fn save_conversation(&self, conversation: &Conversation) -> Result<(), StorageError> {
        if conversation.messages.is_empty() {
            return Err(StorageError::EmptyConversation);
        }
        self.conversations
            .lock()
            .await
            .insert(conversation.conversation_id, conversation.clone());
        Ok(())
    }

    async fn save_complaint(&self, complaint: &Complaint) -> Result<(), StorageError> {
        self.complaints.lock().await.push(complaint.clone());
        Ok(())
    }

    async fn save_banned_pair(&self, pair: &BannedPair) -> Result<(), StorageError> {
        self.banned_pairs.lock().await.push(pair.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Platform;

    #[tokio::test]
    async fn upsert_user_creates_then_refreshes_display_name() {
        let store = InMemoryStore::new();
        let key = UserKey::new(Platform::Telegram, "1");

        let created = store.upsert_user(&key, None).await.unwrap();
        assert_eq!(created.display_name, None);

        let refreshed = store.upsert_user(&key, Some("Ada")).await.unwrap();
        assert_eq!(refreshed.display_name, Some("Ada".to_string()));

        assert_eq!(store.users.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn save_conversation_rejects_empty() {
        use crate::model::{Conversation, ConversationPeer, Peer};

        let store = InMemoryStore::new();
        let p1 = ConversationPeer::new(
            Peer::User(UserKey::new(Platform::Telegram, "1")),
            PersonProfile::new(vec!["hi".into()]),
        );
        let p2 = ConversationPeer::new(Peer::Bot("tok".into()), PersonProfile::new(vec!["hi".into()]));
        let conv = Conversation::new(1, p1, p2, 0);

        let result = store.save_conversation(&conv).await;
        assert!(matches!(result, Err(StorageError::EmptyConversation)));
    }

    #[tokio::test]
    async fn banned_pair_is_detected() {
        let store = InMemoryStore::new();
        let key = UserKey::new(Platform::Telegram, "1");
        store
            .save_banned_pair(&BannedPair {
                user: key.clone(),
                bot_token: "tok".into(),
            })
            .await
            .unwrap();

        assert!(store.is_banned_pair(&key, "tok").await.unwrap());
        assert!(!store.is_banned_pair(&key, "other").await.unwrap());
    }
}
