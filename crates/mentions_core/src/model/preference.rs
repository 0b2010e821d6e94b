//! Per-identity notification preference model.
//!
//! # Responsibility
//! - Define the durable settings row keyed by identity.
//! - Provide the default row used when nothing was persisted yet.
//!
//! # Invariants
//! - At most one preference exists per `identity_id`.
//! - `ignore_list` never contains duplicates (set semantics).

use crate::model::identity::IdentityId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Delivery channel a target wants mention notifications on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NotificationChannel {
    /// Audible cue.
    Sound,
    /// Title / action-bar overlay.
    Title,
    /// Echo line in the target's chat.
    ChatEcho,
    /// Receive nothing, but keep mentions enabled.
    None,
}

impl NotificationChannel {
    /// Storage spelling used in the `preferences.channel` column.
    pub fn as_db_str(self) -> &'static str {
        match self {
            Self::Sound => "sound",
            Self::Title => "title",
            Self::ChatEcho => "chat_echo",
            Self::None => "none",
        }
    }

    pub fn from_db_str(value: &str) -> Option<Self> {
        match value {
            "sound" => Some(Self::Sound),
            "title" => Some(Self::Title),
            "chat_echo" => Some(Self::ChatEcho),
            "none" => Some(Self::None),
            _ => None,
        }
    }

    pub fn all() -> &'static [NotificationChannel] {
        &[Self::Sound, Self::Title, Self::ChatEcho, Self::None]
    }
}

impl Default for NotificationChannel {
    fn default() -> Self {
        Self::Sound
    }
}

/// Durable notification settings of one identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preference {
    pub identity_id: IdentityId,
    pub notifications_enabled: bool,
    /// Senders whose mentions this identity does not want to hear about.
    pub ignore_list: BTreeSet<IdentityId>,
    pub channel: NotificationChannel,
    /// Per-identity sound override; `None` uses the configured default.
    pub sound_key: Option<String>,
}

impl Preference {
    /// Default row: enabled, nobody ignored, given channel.
    pub fn defaults(identity_id: IdentityId, channel: NotificationChannel) -> Self {
        Self {
            identity_id,
            notifications_enabled: true,
            ignore_list: BTreeSet::new(),
            channel,
            sound_key: None,
        }
    }

    pub fn ignores(&self, sender: IdentityId) -> bool {
        self.ignore_list.contains(&sender)
    }
}
