//! Data model for peers, profiles, and conversations.
//!
//! These types are the document shapes the orchestrator reads and writes
//! through [`crate::store::PeerStore`]. They carry no behavior beyond small
//! constructors and derived accessors.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The messaging platform a [`UserKey`] was contacted through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Telegram,
    Facebook,
}

/// Unique identity of a human user: a platform plus the platform's own
/// identifier for that user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserKey {
    pub platform: Platform,
    pub external_id: String,
}

impl UserKey {
    pub fn new(platform: Platform, external_id: impl Into<String>) -> Self {
        Self {
            platform,
            external_id: external_id.into(),
        }
    }
}

/// A human user, created lazily on first contact.
///
/// Mutated only to refresh `display_name` and to set `assigned_test_bot`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub key: UserKey,
    pub display_name: Option<String>,
    pub banned: bool,
    pub assigned_test_bot: Option<String>,
}

impl User {
    pub fn new(key: UserKey) -> Self {
        Self {
            key,
            display_name: None,
            banned: false,
            assigned_test_bot: None,
        }
    }
}

/// A registered automated peer. `token` doubles as identity and auth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bot {
    pub token: String,
    pub name: String,
    pub banned: bool,
    /// Monotonically increasing counter the bot sees across long-poll responses.
    pub last_update_id: u64,
}

impl Bot {
    pub fn new(token: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            name: name.into(),
            banned: false,
            last_update_id: 0,
        }
    }
}

/// A `(user, bot)` pair that must never be matched together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BannedPair {
    pub user: UserKey,
    pub bot_token: String,
}

/// A role-play persona assigned to a conversation participant.
///
/// Profiles sharing a `link_group_id` are paraphrases of one another and are
/// preferred when assigning the second participant's profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonProfile {
    pub id: Uuid,
    pub sentences: Vec<String>,
    pub link_group_id: Option<Uuid>,
    pub topics: Vec<String>,
}

impl PersonProfile {
    pub fn new(sentences: Vec<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            sentences,
            link_group_id: None,
            topics: Vec::new(),
        }
    }

    /// The newline-joined sentences, as shown to the other participant.
    pub fn description(&self) -> String {
        self.sentences.join("\n")
    }

    pub fn topic_at(&self, index: usize) -> Option<&str> {
        self.topics.get(index).map(String::as_str)
    }
}

/// Either side of a conversation: a human user or a registered bot.
///
/// A tagged variant rather than a trait object, per the polymorphic-peer
/// design: gateway selection is a function of this tag, not a runtime lookup.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Peer {
    User(UserKey),
    Bot(String),
}

/// One side of a [`Conversation`]: the peer, their assigned profile, and
/// everything gathered about them during evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationPeer {
    pub peer: Peer,
    pub assigned_profile: PersonProfile,
    pub dialog_score: Option<i32>,
    pub other_peer_profile_options: Vec<PersonProfile>,
    pub other_peer_profile_selected: Option<PersonProfile>,
    /// Sparse: `None` at indices not yet guessed.
    pub other_peer_profile_selected_sentences: Vec<Option<String>>,
    pub triggered_dialog_end: bool,
    pub peer_conversation_guid: Uuid,
}

impl ConversationPeer {
    pub fn new(peer: Peer, assigned_profile: PersonProfile) -> Self {
        Self {
            peer,
            assigned_profile,
            dialog_score: None,
            other_peer_profile_options: Vec::new(),
            other_peer_profile_selected: None,
            other_peer_profile_selected_sentences: Vec::new(),
            triggered_dialog_end: false,
            peer_conversation_guid: Uuid::now_v7(),
        }
    }

    pub fn is_bot(&self) -> bool {
        matches!(self.peer, Peer::Bot(_))
    }
}

/// One message exchanged within a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Dense per-conversation index starting at 0.
    pub msg_id: u32,
    pub text: String,
    pub sender: Peer,
    pub time: DateTime<Utc>,
    /// `0` or `1` once evaluated.
    pub evaluation_score: Option<u8>,
    pub system: bool,
}

impl Message {
    pub fn new(msg_id: u32, sender: Peer, text: impl Into<String>) -> Self {
        Self {
            msg_id,
            text: text.into(),
            sender,
            time: Utc::now(),
            evaluation_score: None,
            system: false,
        }
    }
}

/// An ordered exchange between exactly two peers, plus their profiles,
/// scores, and timestamps.
///
/// `conversation_id` is a 31-bit random value, unique among live and stored
/// conversations. Lives only in memory until the orchestrator hands it to
/// the store on cleanup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub conversation_id: u32,
    pub participant1: ConversationPeer,
    pub participant2: ConversationPeer,
    pub messages: Vec<Message>,
    pub active_topic_index: usize,
    /// Supplemented: non-system messages remaining before `active_topic_index`
    /// may advance again. `0` means no cooldown is in effect.
    pub messages_to_switch_topic: u32,
    pub messages_to_switch_topic_left: u32,
}

impl Conversation {
    pub fn new(
        conversation_id: u32,
        participant1: ConversationPeer,
        participant2: ConversationPeer,
        messages_to_switch_topic: u32,
    ) -> Self {
        Self {
            conversation_id,
            participant1,
            participant2,
            messages: Vec::new(),
            active_topic_index: 0,
            messages_to_switch_topic,
            messages_to_switch_topic_left: messages_to_switch_topic,
        }
    }

    /// Earliest message time, if any have been exchanged.
    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.messages.iter().map(|m| m.time).min()
    }

    /// Latest message time, if any have been exchanged.
    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.messages.iter().map(|m| m.time).max()
    }

    pub fn participant_for(&self, peer: &Peer) -> Option<&ConversationPeer> {
        if &self.participant1.peer == peer {
            Some(&self.participant1)
        } else if &self.participant2.peer == peer {
            Some(&self.participant2)
        } else {
            None
        }
    }

    pub fn participant_for_mut(&mut self, peer: &Peer) -> Option<&mut ConversationPeer> {
        if &self.participant1.peer == peer {
            Some(&mut self.participant1)
        } else if &self.participant2.peer == peer {
            Some(&mut self.participant2)
        } else {
            None
        }
    }

    /// The other participant's conversation-peer record, given one side.
    pub fn other_participant(&self, peer: &Peer) -> Option<&ConversationPeer> {
        if &self.participant1.peer == peer {
            Some(&self.participant2)
        } else if &self.participant2.peer == peer {
            Some(&self.participant1)
        } else {
            None
        }
    }

    pub fn other_participant_mut(&mut self, peer: &Peer) -> Option<&mut ConversationPeer> {
        if &self.participant1.peer == peer {
            Some(&mut self.participant2)
        } else if &self.participant2.peer == peer {
            Some(&mut self.participant1)
        } else {
            None
        }
    }

    pub fn is_participant(&self, peer: &Peer) -> bool {
        &self.participant1.peer == peer || &self.participant2.peer == peer
    }
}

/// A user's report against the other participant of a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Complaint {
    pub complainer: Peer,
    pub complain_to: Peer,
    pub conversation_id: u32,
    pub processed: bool,
}
