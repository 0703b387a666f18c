//! Error types produced by the orchestrator core.
//!
//! Mirrors the error kinds a caller must distinguish between: ones that are
//! user-facing (surfaced by a gateway as a message, or by the HTTP boundary
//! as a status code) and ones that are programming errors.

use thiserror::Error;

use crate::store::StorageError;

/// Errors the orchestrator and its collaborators can produce.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// The bot token in a request does not correspond to a registered bot.
    #[error("bot not registered")]
    BotNotRegistered,

    /// A banned user attempted to start a dialog.
    #[error("user is banned")]
    UserBanned,

    /// No non-banned peer could be found to match against.
    #[error("no eligible peer found")]
    PeerNotFound,

    /// The user is already in the lobby or an active conversation.
    #[error("simultaneous dialogs are not allowed")]
    SimultaneousDialogs,

    /// A command or call arrived in a state that forbids it.
    ///
    /// Gateways handle this by informing the user and returning gracefully;
    /// it must never propagate past the gateway boundary.
    #[error("invalid state for this operation")]
    InvalidState,

    /// A request failed validation (out-of-range score, missing message,
    /// non-participant peer, unknown conversation).
    #[error("validation failed: {0}")]
    ValidationFailure(String),

    /// Internal signal from [`crate::trigram::TrigramGuard`]; never surfaced
    /// to a bot. The orchestrator treats it like an invoked dialog end once
    /// the bad-streak threshold is reached.
    #[error("profile leak detected")]
    ProfileLeak,

    /// A persistence operation failed in a way that must propagate.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}
