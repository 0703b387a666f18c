//! SQLite storage implementation.
//!
//! Realizes the document-store façade of [`crate::store::PeerStore`] as
//! JSON-in-SQLite: each table keeps a `data` column holding the
//! `serde_json`-serialized document, alongside the few indexed columns the
//! required queries need.

use std::path::PathBuf;

use async_trait::async_trait;
use rand::seq::IteratorRandom;
use sqlx::Row;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use uuid::Uuid;

use crate::model::{BannedPair, Bot, Complaint, Conversation, PersonProfile, User, UserKey};
use crate::store::{PeerStore, StorageError};

/// SQLite-based peer storage.
///
/// Uses connection pooling and WAL mode for performance. Runs migrations
/// automatically on startup.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Create a new `SqliteStore` from a database URL.
    ///
    /// The URL should be in the format `sqlite:path/to/database.db`.
    /// Runs migrations automatically and enables WAL mode.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Database`] if connection fails.
    /// Returns [`StorageError::Migration`] if migrations fail.
    pub async fn new(database_url: &str) -> Result<Self, StorageError> {
        let url = database_url.strip_prefix("sqlite:").unwrap_or(database_url);

        let path = PathBuf::from(url);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StorageError::Database(format!("failed to create database directory: {}", e))
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(url)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Database(e.to_string()))?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), StorageError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StorageError::Migration(e.to_string()))
    }

    fn decode_user(row_data: &str) -> Result<User, StorageError> {
        serde_json::from_str(row_data)
            .map_err(|e| StorageError::InvalidData(format!("invalid user document: {}", e)))
    }

    fn decode_bot(row_data: &str) -> Result<Bot, StorageError> {
        serde_json::from_str(row_data)
            .map_err(|e| StorageError::InvalidData(format!("invalid bot document: {}", e)))
    }

    fn decode_profile(row_data: &str) -> Result<PersonProfile, StorageError> {
        serde_json::from_str(row_data)
            .map_err(|e| StorageError::InvalidData(format!("invalid profile document: {}", e)))
    }

    fn user_key_column(key: &UserKey) -> String {
        format!("{:?}:{}", key.platform, key.external_id)
    }

    /// Insert or replace a profile document.
    ///
    /// Not part of [`PeerStore`]: profile import is administrative tooling
    /// outside the orchestrator core, but something has to seed the table
    /// this adapter samples from.
    pub async fn save_profile(&self, profile: &PersonProfile) -> Result<(), StorageError> {
        let data = serde_json::to_string(profile).map_err(|e| {
            StorageError::InvalidData(format!("failed to serialize profile: {}", e))
        })?;

        sqlx::query(
            r#"
            INSERT INTO profiles (id, link_group_id, data)
            VALUES (?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET link_group_id = excluded.link_group_id, data = excluded.data
            "#,
        )
        .bind(profile.id.to_string())
        .bind(profile.link_group_id.map(|id| id.to_string()))
        .bind(data)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Database(e.to_string()))?;

        Ok(())
    }
}

#[async_trait]
impl PeerStore for SqliteStore {
    async fn upsert_user(
        &self,
        key: &UserKey,
        display_name: Option<&str>,
    ) -> Result<User, StorageError> {
        let column_key = Self::user_key_column(key);
        let row = sqlx::query("SELECT data FROM users WHERE user_key = ?")
            .bind(&column_key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::Database(e.to_string()))?;

        let mut user = match row {
            Some(row) => Self::decode_user(row.get("data"))?,
            None => User::new(key.clone()),
        };
        if let Some(name) = display_name {
            user.display_name = Some(name.to_string());
        }

        let data = serde_json::to_string(&user)
            .map_err(|e| StorageError::InvalidData(format!("failed to serialize user: {}", e)))?;

        sqlx::query(
            r#"
            INSERT INTO users (user_key, banned, data)
            VALUES (?, ?, ?)
            ON CONFLICT(user_key) DO UPDATE SET banned = excluded.banned, data = excluded.data
            "#,
        )
        .bind(&column_key)
        .bind(user.banned)
        .bind(&data)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Database(e.to_string()))?;

        Ok(user)
    }

    async fn get_user(&self, key: &UserKey) -> Result<Option<User>, StorageError> {
        let row = sqlx::query("SELECT data FROM users WHERE user_key = ?")
            .bind(Self::user_key_column(key))
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::Database(e.to_string()))?;

        row.map(|row| Self::decode_user(row.get("data"))).transpose()
    }

    async fn save_user(&self, user: &User) -> Result<(), StorageError> {
        let column_key = Self::user_key_column(&user.key);
        let data = serde_json::to_string(user)
            .map_err(|e| StorageError::InvalidData(format!("failed to serialize user: {}", e)))?;

        sqlx::query(
            r#"
            INSERT INTO users (user_key, banned, data)
            VALUES (?, ?, ?)
            ON CONFLICT(user_key) DO UPDATE SET banned = excluded.banned, data = excluded.data
            "#,
        )
        .bind(column_key)
        .bind(user.banned)
        .bind(data)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Database(e.to_string()))?;

        Ok(())
    }

    async fn get_bot(&self, token: &str) -> Result<Option<Bot>, StorageError> {
        let row = sqlx::query("SELECT data FROM bots WHERE token = ?")
            .bind(token)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::Database(e.to_string()))?;

        row.map(|row| Self::decode_bot(row.get("data"))).transpose()
    }

    async fn list_non_banned_bots(&self) -> Result<Vec<Bot>, StorageError> {
        let rows = sqlx::query("SELECT data FROM bots WHERE banned = 0")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StorageError::Database(e.to_string()))?;

        rows.iter().map(|row| Self::decode_bot(row.get("data"))).collect()
    }

    async fn save_bot(&self, bot: &Bot) -> Result<(), StorageError> {
        let data = serde_json::to_string(bot)
            .map_err(|e| StorageError::InvalidData(format!("failed to serialize bot: {}", e)))?;

        sqlx::query(
            r#"
            INSERT INTO bots (token, banned, data)
            VALUES (?, ?, ?)
            ON CONFLICT(token) DO UPDATE SET banned = excluded.banned, data = excluded.data
            "#,
        )
        .bind(&bot.token)
        .bind(bot.banned)
        .bind(data)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Database(e.to_string()))?;

        Ok(())
    }

    async fn is_banned_pair(&self, user: &UserKey, bot_token: &str) -> Result<bool, StorageError> {
        let row = sqlx::query(
            "SELECT COUNT(*) as count FROM banned_pairs WHERE user_key = ? AND bot_token = ?",
        )
        .bind(Self::user_key_column(user))
        .bind(bot_token)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StorageError::Database(e.to_string()))?;

        let count: i64 = row.get("count");
        Ok(count > 0)
    }

    async fn sample_profile(&self) -> Result<Option<PersonProfile>, StorageError> {
        let row = sqlx::query("SELECT data FROM profiles ORDER BY RANDOM() LIMIT 1")
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::Database(e.to_string()))?;

        row.map(|row| Self::decode_profile(row.get("data"))).transpose()
    }

    async fn sample_profile_in_link_group(
        &self,
        link_group_id: Uuid,
        excluding: Uuid,
    ) -> Result<Option<PersonProfile>, StorageError> {
        let row = sqlx::query(
            r#"
            SELECT data FROM profiles
            WHERE link_group_id = ? AND id != ?
            ORDER BY RANDOM() LIMIT 1
            "#,
        )
        .bind(link_group_id.to_string())
        .bind(excluding.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::Database(e.to_string()))?;

        row.map(|row| Self::decode_profile(row.get("data"))).transpose()
    }

    async fn sample_profile_with_different_sentences(
        &self,
        sentences: &[String],
    ) -> Result<Option<PersonProfile>, StorageError> {
        // Sentence equality isn't expressible in SQL over the JSON document
        // cheaply, so filter in process over a randomized candidate scan.
        let rows = sqlx::query("SELECT data FROM profiles ORDER BY RANDOM() LIMIT 50")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StorageError::Database(e.to_string()))?;

        for row in rows {
            let profile = Self::decode_profile(row.get("data"))?;
            if profile.sentences != sentences {
                return Ok(Some(profile));
            }
        }
        Ok(None)
    }

    async fn sample_sentence_at_index(&self, index: usize) -> Result<Option<String>, StorageError> {
        let rows = sqlx::query("SELECT data FROM profiles")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StorageError::Database(e.to_string()))?;

        let mut candidates = Vec::new();
        for row in rows {
            let profile = Self::decode_profile(row.get("data"))?;
            if let Some(sentence) = profile.sentences.get(index) {
                candidates.push(sentence.clone());
            }
        }

        let mut rng = rand::rng();
        Ok(candidates.into_iter().choose(&mut rng))
    }

    async fn conversation_id_exists(&self, id: u32) -> Result<bool, StorageError> {
        let row = sqlx::query("SELECT COUNT(*) as count FROM conversations WHERE conversation_id = ?")
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StorageError::Database(e.to_string()))?;

        let count: i64 = row.get("count");
        Ok(count > 0)
    }

    async fn save_conversation(&self, conversation: &Conversation) -> Result<(), StorageError> {
        if conversation.messages.is_empty() {
            return Err(StorageError::EmptyConversation);
        }

        let data = serde_json::to_string(conversation).map_err(|e| {
            StorageError::InvalidData(format!("failed to serialize conversation: {}", e))
        })?;
        let start_time = conversation.start_time().unwrap().to_rfc3339();
        let end_time = conversation.end_time().unwrap().to_rfc3339();

        sqlx::query(
            r#"
            INSERT INTO conversations (conversation_id, start_time, end_time, data)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(conversation_id) DO UPDATE SET
                start_time = excluded.start_time,
                end_time = excluded.end_time,
                data = excluded.data
            "#,
        )
        .bind(conversation.conversation_id)
        .bind(start_time)
        .bind(end_time)
        .bind(data)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Database(e.to_string()))?;

        Ok(())
    }

    async fn save_complaint(&self, complaint: &Complaint) -> Result<(), StorageError> {
        let data = serde_json::to_string(complaint).map_err(|e| {
            StorageError::InvalidData(format!("failed to serialize complaint: {}", e))
        })?;

        sqlx::query(
            "INSERT INTO complaints (conversation_id, processed, data) VALUES (?, ?, ?)",
        )
        .bind(complaint.conversation_id)
        .bind(complaint.processed)
        .bind(data)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Database(e.to_string()))?;

        Ok(())
    }

    async fn save_banned_pair(&self, pair: &BannedPair) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO banned_pairs (user_key, bot_token)
            VALUES (?, ?)
            ON CONFLICT(user_key, bot_token) DO NOTHING
            "#,
        )
        .bind(Self::user_key_column(&pair.user))
        .bind(&pair.bot_token)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Database(e.to_string()))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Platform;
    use std::env::temp_dir;

    async fn create_test_store() -> SqliteStore {
        let db_path = temp_dir().join(format!("router_test_{}.db", Uuid::new_v4()));
        let url = format!("sqlite:{}", db_path.display());
        SqliteStore::new(&url).await.expect("failed to create test store")
    }

    #[tokio::test]
    async fn upsert_user_creates_then_updates() {
        let store = create_test_store().await;
        let key = UserKey::new(Platform::Telegram, "42");

        let created = store.upsert_user(&key, None).await.unwrap();
        assert_eq!(created.display_name, None);

        let updated = store.upsert_user(&key, Some("Grace")).await.unwrap();
        assert_eq!(updated.display_name, Some("Grace".to_string()));

        let fetched = store.get_user(&key).await.unwrap().unwrap();
        assert_eq!(fetched.display_name, Some("Grace".to_string()));
    }

    #[tokio::test]
    async fn get_user_not_found_returns_none() {
        let store = create_test_store().await;
        let key = UserKey::new(Platform::Facebook, "missing");
        assert!(store.get_user(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn banned_pair_roundtrip() {
        let store = create_test_store().await;
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

    #[tokio::test]
    async fn save_conversation_rejects_empty() {
        use crate::model::{Conversation, ConversationPeer, Peer};

        let store = create_test_store().await;
        let p1 = ConversationPeer::new(
            Peer::User(UserKey::new(Platform::Telegram, "1")),
            PersonProfile::new(vec!["hi".into()]),
        );
        let p2 = ConversationPeer::new(Peer::Bot("tok".into()), PersonProfile::new(vec!["hi".into()]));
        let conv = Conversation::new(99, p1, p2, 0);

        let result = store.save_conversation(&conv).await;
        assert!(matches!(result, Err(StorageError::EmptyConversation)));
    }

    #[tokio::test]
    async fn list_non_banned_bots_excludes_banned() {
        let store = create_test_store().await;
        let mut good = Bot::new("good", "Good Bot");
        good.banned = false;
        let mut bad = Bot::new("bad", "Bad Bot");
        bad.banned = true;

        store.save_bot(&good).await.unwrap();
        store.save_bot(&bad).await.unwrap();

        let bots = store.list_non_banned_bots().await.unwrap();
        assert_eq!(bots.len(), 1);
        assert_eq!(bots[0].token, "good");
    }

    #[tokio::test]
    async fn conversation_id_exists_tracks_saved_conversations() {
        use crate::model::{Conversation, ConversationPeer, Message, Peer};

        let store = create_test_store().await;
        assert!(!store.conversation_id_exists(123).await.unwrap());

        let mut p1 = ConversationPeer::new(
            Peer::User(UserKey::new(Platform::Telegram, "1")),
            PersonProfile::new(vec!["hi".into()]),
        );
        p1.peer_conversation_guid = Uuid::now_v7();
        let p2 = ConversationPeer::new(Peer::Bot("tok".into()), PersonProfile::new(vec!["hi".into()]));
        let mut conv = Conversation::new(123, p1.clone(), p2, 0);
        conv.messages.push(Message::new(0, p1.peer.clone(), "hi"));

        store.save_conversation(&conv).await.unwrap();
        assert!(store.conversation_id_exists(123).await.unwrap());
    }

    #[tokio::test]
    async fn sample_profile_returns_a_saved_profile() {
        let store = create_test_store().await;
        assert!(store.sample_profile().await.unwrap().is_none());

        let profile = PersonProfile::new(vec!["I like tea.".into()]);
        store.save_profile(&profile).await.unwrap();

        let sampled = store.sample_profile().await.unwrap().unwrap();
        assert_eq!(sampled.id, profile.id);
    }

    #[test]
    fn user_key_column_is_stable_per_platform_and_id() {
        let a = UserKey::new(Platform::Telegram, "1");
        let b = UserKey::new(Platform::Facebook, "1");
        assert_ne!(SqliteStore::user_key_column(&a), SqliteStore::user_key_column(&b));
    }
}
