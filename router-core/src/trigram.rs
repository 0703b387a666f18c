//! Detects a bot echoing its own assigned profile back into a dialog.
//!
//! For each `(conversation, bot)` pair, holds the set of n-grams extracted
//! from the bot's profile description and a running bad-streak counter.

use std::collections::{HashMap, HashSet};

use regex::Regex;
use tokio::sync::Mutex;

/// Outcome of checking a bot message against its profile n-grams.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Clean,
    Leak,
}

struct ChatGuard {
    ngrams: HashSet<String>,
    bad_streak: u32,
}

/// Tracks leak state across all live `(conversation, bot)` pairs.
pub struct TrigramGuard {
    window: usize,
    threshold: u32,
    chats: Mutex<HashMap<(u32, String), ChatGuard>>,
    word_splitter: Regex,
}

impl TrigramGuard {
    /// `threshold == 0` disables the guard: [`TrigramGuard::check`] always
    /// reports [`Verdict::Clean`].
    pub fn new(window: usize, threshold: u32) -> Self {
        Self {
            window,
            threshold,
            chats: Mutex::new(HashMap::new()),
            word_splitter: Regex::new(r"\W+").expect("static regex"),
        }
    }

    fn tokenize(&self, text: &str) -> Vec<String> {
        self.word_splitter
            .split(&text.to_lowercase())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }

    fn ngrams(&self, text: &str) -> HashSet<String> {
        let words = self.tokenize(text);
        if words.len() < self.window || self.window == 0 {
            return HashSet::new();
        }
        words
            .windows(self.window)
            .map(|w| w.join(" "))
            .collect()
    }

    /// Register the bot's profile for a conversation, seeding its n-gram set.
    pub async fn register(&self, conversation_id: u32, bot_token: &str, profile_description: &str) {
        let ngrams = self.ngrams(profile_description);
        self.chats.lock().await.insert(
            (conversation_id, bot_token.to_string()),
            ChatGuard {
                ngrams,
                bad_streak: 0,
            },
        );
    }

    /// Check a bot message and update its bad streak.
    ///
    /// Returns [`Verdict::Leak`] once the streak reaches the configured
    /// threshold; the caller is responsible for forcing the dialog to end.
    pub async fn check(&self, conversation_id: u32, bot_token: &str, text: &str) -> Verdict {
        if self.threshold == 0 {
            return Verdict::Clean;
        }

        let text_ngrams = self.ngrams(text);
        let mut chats = self.chats.lock().await;
        let Some(guard) = chats.get_mut(&(conversation_id, bot_token.to_string())) else {
            return Verdict::Clean;
        };

        let leaked = !guard.ngrams.is_disjoint(&text_ngrams);
        if leaked {
            guard.bad_streak += 1;
        } else {
            guard.bad_streak = 0;
        }

        if guard.bad_streak >= self.threshold {
            Verdict::Leak
        } else {
            Verdict::Clean
        }
    }

    /// Drop tracking state for a conversation once it ends.
    pub async fn forget(&self, conversation_id: u32, bot_token: &str) {
        self.chats.lock().await.remove(&(conversation_id, bot_token.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn clean_message_resets_streak() {
        let guard = TrigramGuard::new(3, 2);
        guard.register(1, "bot", "I have a red cat").await;

        assert_eq!(guard.check(1, "bot", "good morning").await, Verdict::Clean);
        assert_eq!(guard.check(1, "bot", "I have a red cat").await, Verdict::Clean);
    }

    #[tokio::test]
    async fn leak_streak_triggers_at_threshold() {
        let guard = TrigramGuard::new(3, 2);
        guard.register(1, "bot", "I have a red cat").await;

        assert_eq!(guard.check(1, "bot", "I have a red cat").await, Verdict::Clean);
        assert_eq!(guard.check(1, "bot", "I have a red cat").await, Verdict::Leak);
    }

    #[tokio::test]
    async fn threshold_zero_disables_guard() {
        let guard = TrigramGuard::new(3, 0);
        guard.register(1, "bot", "I have a red cat").await;

        assert_eq!(guard.check(1, "bot", "I have a red cat").await, Verdict::Clean);
        assert_eq!(guard.check(1, "bot", "I have a red cat").await, Verdict::Clean);
    }

    #[tokio::test]
    async fn unregistered_chat_is_always_clean() {
        let guard = TrigramGuard::new(3, 1);
        assert_eq!(guard.check(99, "bot", "I have a red cat").await, Verdict::Clean);
    }

    #[tokio::test]
    async fn tokenization_is_case_and_punctuation_insensitive() {
        let guard = TrigramGuard::new(3, 1);
        guard.register(1, "bot", "I have a red cat").await;
        assert_eq!(guard.check(1, "bot", "I... HAVE, a RED cat!").await, Verdict::Leak);
    }

    #[tokio::test]
    async fn forget_drops_tracking_state() {
        let guard = TrigramGuard::new(3, 1);
        guard.register(1, "bot", "I have a red cat").await;
        guard.forget(1, "bot").await;
        assert_eq!(guard.check(1, "bot", "I have a red cat").await, Verdict::Clean);
    }
}
