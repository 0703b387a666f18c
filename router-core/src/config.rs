//! Configuration loading for the dialog orchestrator.
//!
//! Follows the teacher's precedence: an environment variable override, then
//! `./config.toml`, then `~/.config/router/config.toml`, else defaults.

use std::path::PathBuf;

use serde::Deserialize;
use thiserror::Error;

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file '{path}': {source}")]
    IoError {
        /// Path to the configuration file that could not be read.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the configuration file as TOML.
    #[error("failed to parse config file '{path}': {source}")]
    ParseError {
        /// Path to the configuration file that could not be parsed.
        path: PathBuf,
        /// The underlying TOML parse error.
        source: toml::de::Error,
    },
}

/// All tunables the orchestrator reads at startup.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OrchestratorConfig {
    /// Probability in `[0,1)` of preferring a human match over a bot match.
    #[serde(default = "default_human_bot_ratio")]
    pub human_bot_ratio: f64,

    /// Seconds a lobbied user waits for a human match before falling back to a bot.
    #[serde(default = "default_max_time_in_lobby")]
    pub max_time_in_lobby: u64,

    /// Seconds of silence before the inactivity timer fires.
    #[serde(default = "default_inactivity_timeout")]
    pub inactivity_timeout: u64,

    /// Maximum number of messages before a dialog is auto-ended.
    #[serde(default = "default_max_length")]
    pub max_length: usize,

    /// Minimum accepted dialog evaluation score.
    #[serde(default = "default_eval_min")]
    pub eval_min: i32,

    /// Maximum accepted dialog evaluation score.
    #[serde(default = "default_eval_max")]
    pub eval_max: i32,

    /// Whether participants guess the other peer's profile during evaluation.
    #[serde(default = "default_guess_profile")]
    pub guess_profile: bool,

    /// Whether profile guessing happens sentence-by-sentence rather than whole-profile.
    #[serde(default)]
    pub guess_profile_sentence_by_sentence: bool,

    /// Whether a profile is assigned to conversation participants at all.
    #[serde(default = "default_assign_profile")]
    pub assign_profile: bool,

    /// Whether participants submit a numeric dialog score during evaluation.
    #[serde(default = "default_score_dialog")]
    pub score_dialog: bool,

    /// Whether `/setbot` is available to users.
    #[serde(default)]
    pub allow_set_bot: bool,

    /// Whether the initial and switched-to topics are sent to participants.
    #[serde(default)]
    pub show_topics: bool,

    /// Whether the conversation id is shown to human participants.
    #[serde(default)]
    pub reveal_dialog_id: bool,

    /// Consecutive-leak threshold before the trigram guard forces dialog end; `0` disables it.
    #[serde(default = "default_bad_messages_threshold")]
    pub n_bad_messages_in_a_row_threshold: u32,

    /// n-gram window size used by the trigram guard.
    #[serde(default = "default_trigram_window")]
    pub trigram_window: usize,

    /// Non-system messages required between topic switches. `0` disables the cooldown.
    #[serde(default)]
    pub messages_to_switch_topic: u32,
}

fn default_human_bot_ratio() -> f64 {
    0.5
}

fn default_max_time_in_lobby() -> u64 {
    30
}

fn default_inactivity_timeout() -> u64 {
    600
}

fn default_max_length() -> usize {
    40
}

fn default_eval_min() -> i32 {
    0
}

fn default_eval_max() -> i32 {
    5
}

fn default_guess_profile() -> bool {
    true
}

fn default_assign_profile() -> bool {
    true
}

fn default_score_dialog() -> bool {
    true
}

fn default_bad_messages_threshold() -> u32 {
    2
}

fn default_trigram_window() -> usize {
    3
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            human_bot_ratio: default_human_bot_ratio(),
            max_time_in_lobby: default_max_time_in_lobby(),
            inactivity_timeout: default_inactivity_timeout(),
            max_length: default_max_length(),
            eval_min: default_eval_min(),
            eval_max: default_eval_max(),
            guess_profile: default_guess_profile(),
            guess_profile_sentence_by_sentence: false,
            assign_profile: default_assign_profile(),
            score_dialog: default_score_dialog(),
            allow_set_bot: false,
            show_topics: false,
            reveal_dialog_id: false,
            n_bad_messages_in_a_row_threshold: default_bad_messages_threshold(),
            trigram_window: default_trigram_window(),
            messages_to_switch_topic: 0,
        }
    }
}

impl OrchestratorConfig {
    /// Load configuration from the file system.
    ///
    /// Priority order:
    /// 1. `ROUTER_CONFIG` environment variable
    /// 2. `./config.toml` (local directory)
    /// 3. `~/.config/router/config.toml` (user config)
    ///
    /// Returns default config if no config file is found.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::IoError`] if a found file cannot be read.
    /// Returns [`ConfigError::ParseError`] if a found file is not valid TOML.
    pub fn load() -> Result<Self, ConfigError> {
        if let Ok(path) = std::env::var("ROUTER_CONFIG") {
            let p = PathBuf::from(&path);
            if p.exists() {
                return Self::load_from(p);
            }
        }

        let local = PathBuf::from("config.toml");
        if local.exists() {
            return Self::load_from(local);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".config/router/config.toml");
            if user_config.exists() {
                return Self::load_from(user_config);
            }
        }

        Ok(Self::default())
    }

    /// Load configuration from a specific path.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::IoError`] if the file cannot be read.
    /// Returns [`ConfigError::ParseError`] if the file is not valid TOML.
    pub fn load_from(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::IoError {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::ParseError {
            path: path.to_path_buf(),
            source,
        })
    }
}
