//! Engine configuration surface.
//!
//! # Responsibility
//! - Define every recognized option with its default.
//! - Load/save the options as a JSON settings file.
//! - Reject values the engine cannot run with.
//!
//! # Invariants
//! - Unknown keys are ignored; missing keys take their defaults.
//! - A missing settings file yields `MentionConfig::default()`.

use crate::model::preference::NotificationChannel;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// How mention candidates are recognized in chat text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TriggerRule {
    /// Only `@name`-style tokens count.
    MentionMarkerOnly,
    /// Any name-shaped word counts, markers included.
    InlineNameMatch,
}

/// Durable store settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StorageConfig {
    /// SQLite file; `None` keeps preferences in memory.
    pub path: Option<PathBuf>,
    pub pool_size: usize,
    pub acquire_timeout_ms: u64,
    pub write_retry_attempts: u32,
    pub write_retry_backoff_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: None,
            pool_size: 4,
            acquire_timeout_ms: 250,
            write_retry_attempts: 3,
            write_retry_backoff_ms: 50,
        }
    }
}

impl StorageConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    pub fn write_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.write_retry_backoff_ms)
    }
}

/// All options recognized by the mention engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MentionConfig {
    pub trigger_rule: TriggerRule,
    /// Characters that mark an explicit mention, e.g. `@Steve`.
    pub markers: Vec<char>,
    pub self_mentions_allowed: bool,
    pub pair_cooldown_seconds: u64,
    pub sender_quota_count: u32,
    pub sender_quota_window_seconds: u64,
    pub cooldown_entry_ttl_seconds: u64,
    pub default_channel: NotificationChannel,
    /// Distinct targets notified per message; extra ones are dropped.
    pub max_mentions_per_message: usize,
    /// Allow inline (unmarked) words to resolve by prefix.
    pub inline_prefix_matching: bool,
    pub min_inline_token_length: usize,
    pub max_token_length: usize,
    /// Replacement for a resolved mention in the rendered message.
    /// `{name}` expands to the target's display name.
    pub highlight_format: String,
    pub default_sound: String,
    pub sound_volume: f32,
    pub sound_pitch: f32,
    pub preference_cache_ttl_seconds: u64,
    pub worker_threads: usize,
    pub worker_queue_capacity: usize,
    pub storage: StorageConfig,
}

impl Default for MentionConfig {
    fn default() -> Self {
        Self {
            trigger_rule: TriggerRule::MentionMarkerOnly,
            markers: vec!['@', '!'],
            self_mentions_allowed: false,
            pair_cooldown_seconds: 30,
            sender_quota_count: 5,
            sender_quota_window_seconds: 60,
            cooldown_entry_ttl_seconds: 600,
            default_channel: NotificationChannel::Sound,
            max_mentions_per_message: 3,
            inline_prefix_matching: false,
            min_inline_token_length: 3,
            max_token_length: 32,
            highlight_format: "@{name}".to_string(),
            default_sound: "entity.player.levelup".to_string(),
            sound_volume: 1.0,
            sound_pitch: 1.0,
            preference_cache_ttl_seconds: 300,
            worker_threads: 2,
            worker_queue_capacity: 256,
            storage: StorageConfig::default(),
        }
    }
}

impl MentionConfig {
    pub fn pair_cooldown(&self) -> Duration {
        Duration::from_secs(self.pair_cooldown_seconds)
    }

    pub fn sender_quota_window(&self) -> Duration {
        Duration::from_secs(self.sender_quota_window_seconds)
    }

    pub fn cooldown_entry_ttl(&self) -> Duration {
        Duration::from_secs(self.cooldown_entry_ttl_seconds)
    }

    pub fn preference_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.preference_cache_ttl_seconds)
    }

    /// Checks cross-field constraints.
    ///
    /// # Errors
    /// - Returns the first offending option.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.trigger_rule == TriggerRule::MentionMarkerOnly && self.markers.is_empty() {
            return Err(ConfigError::Invalid {
                key: "markers",
                message: "marker-only trigger rule needs at least one marker".to_string(),
            });
        }
        if let Some(marker) = self
            .markers
            .iter()
            .find(|marker| marker.is_alphanumeric() || **marker == '_' || marker.is_whitespace())
        {
            return Err(ConfigError::Invalid {
                key: "markers",
                message: format!("`{marker}` cannot be used as a marker"),
            });
        }
        if self.min_inline_token_length == 0 || self.min_inline_token_length > self.max_token_length
        {
            return Err(ConfigError::Invalid {
                key: "minInlineTokenLength",
                message: format!(
                    "must be between 1 and maxTokenLength ({})",
                    self.max_token_length
                ),
            });
        }
        if self.sender_quota_window_seconds == 0 {
            return Err(ConfigError::Invalid {
                key: "senderQuotaWindowSeconds",
                message: "window must be at least one second".to_string(),
            });
        }
        if !self.highlight_format.contains("{name}") {
            return Err(ConfigError::Invalid {
                key: "highlightFormat",
                message: "format must contain `{name}`".to_string(),
            });
        }
        if self.worker_threads == 0 || self.worker_queue_capacity == 0 {
            return Err(ConfigError::Invalid {
                key: "workerThreads",
                message: "worker pool needs at least one thread and one queue slot".to_string(),
            });
        }
        if self.storage.pool_size == 0 {
            return Err(ConfigError::Invalid {
                key: "storage.poolSize",
                message: "pool needs at least one connection".to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io(io::Error),
    Parse(serde_json::Error),
    Invalid { key: &'static str, message: String },
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "failed to access settings file: {err}"),
            Self::Parse(err) => write!(f, "failed to parse settings file: {err}"),
            Self::Invalid { key, message } => write!(f, "invalid `{key}`: {message}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Parse(err) => Some(err),
            Self::Invalid { .. } => None,
        }
    }
}

impl From<io::Error> for ConfigError {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(value: serde_json::Error) -> Self {
        Self::Parse(value)
    }
}

/// Loads and validates settings from `path`.
///
/// A missing file is not an error and yields defaults.
pub fn load_config(path: impl AsRef<Path>) -> Result<MentionConfig, ConfigError> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(MentionConfig::default());
    }
    let content = fs::read_to_string(path)?;
    let config: MentionConfig = serde_json::from_str(&content)?;
    config.validate()?;
    Ok(config)
}

/// Writes settings as pretty JSON, creating parent directories.
pub fn save_config(path: impl AsRef<Path>, config: &MentionConfig) -> Result<(), ConfigError> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let content = serde_json::to_string_pretty(config)?;
    fs::write(path, content)?;
    Ok(())
}
