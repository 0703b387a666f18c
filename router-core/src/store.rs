//! Storage abstraction for peers, profiles, and conversations.
//!
//! Provides the [`PeerStore`] trait as a port for storage implementations, a
//! SQLite adapter, and an in-memory adapter for tests.

pub mod memory;
pub mod sqlite;

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::model::{BannedPair, Bot, Complaint, Conversation, PersonProfile, User, UserKey};

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// A database operation failed.
    #[error("database error: {0}")]
    Database(String),

    /// A migration operation failed.
    #[error("migration error: {0}")]
    Migration(String),

    /// Invalid data was encountered (corrupt JSON document, bad UUID, etc.).
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// A save was attempted for a conversation with no messages.
    ///
    /// This is a valid outcome for an abandoned match, not a hard failure;
    /// callers are expected to swallow it with a warning per the orchestrator's
    /// error-handling policy.
    #[error("conversation has no messages")]
    EmptyConversation,
}

/// Document-store façade the orchestrator reads and writes through.
///
/// All operations are awaitable; the orchestrator never holds a lock across
/// a call into this trait.
#[async_trait]
pub trait PeerStore: Send + Sync {
    /// Find a user by key, creating it (with default fields) if absent.
    ///
    /// Also refreshes `display_name` when a non-`None` value is supplied, so
    /// this doubles as the "touch on every contact" hook the human gateway uses.
    async fn upsert_user(
        &self,
        key: &UserKey,
        display_name: Option<&str>,
    ) -> Result<User, StorageError>;

    /// Fetch a user by key without creating it.
    async fn get_user(&self, key: &UserKey) -> Result<Option<User>, StorageError>;

    /// Persist a user record (used for `banned` and `assigned_test_bot` updates).
    async fn save_user(&self, user: &User) -> Result<(), StorageError>;

    /// Fetch a bot by its token.
    async fn get_bot(&self, token: &str) -> Result<Option<Bot>, StorageError>;

    /// List all non-banned bots.
    async fn list_non_banned_bots(&self) -> Result<Vec<Bot>, StorageError>;

    /// Persist a bot record (used for `last_update_id` bumps).
    async fn save_bot(&self, bot: &Bot) -> Result<(), StorageError>;

    /// Check whether `(user, bot_token)` is a banned pair.
    async fn is_banned_pair(&self, user: &UserKey, bot_token: &str) -> Result<bool, StorageError>;

    /// Sample a uniformly random profile, if any are stored.
    async fn sample_profile(&self) -> Result<Option<PersonProfile>, StorageError>;

    /// Sample a uniformly random profile sharing `link_group_id`, excluding `excluding`.
    async fn sample_profile_in_link_group(
        &self,
        link_group_id: Uuid,
        excluding: Uuid,
    ) -> Result<Option<PersonProfile>, StorageError>;

    /// Sample a uniformly random profile whose sentences differ from `sentences`.
    async fn sample_profile_with_different_sentences(
        &self,
        sentences: &[String],
    ) -> Result<Option<PersonProfile>, StorageError>;

    /// Sample a random sentence at `index` from any stored profile long enough to have one.
    ///
    /// Used as the sentence-mode fallback when a candidate profile is shorter
    /// than the true profile being guessed.
    async fn sample_sentence_at_index(&self, index: usize) -> Result<Option<String>, StorageError>;

    /// Whether a conversation id is already in use by a stored conversation.
    async fn conversation_id_exists(&self, id: u32) -> Result<bool, StorageError>;

    /// Persist a finished conversation.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::EmptyConversation`] if the conversation has no
    /// messages; callers should treat that as a valid, swallowable outcome.
    async fn save_conversation(&self, conversation: &Conversation) -> Result<(), StorageError>;

    /// Persist a complaint.
    async fn save_complaint(&self, complaint: &Complaint) -> Result<(), StorageError>;

    /// Persist a banned pair (used by administrative tooling, not the orchestrator itself).
    async fn save_banned_pair(&self, pair: &BannedPair) -> Result<(), StorageError>;
}
