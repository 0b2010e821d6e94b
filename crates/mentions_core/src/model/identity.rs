//! Identity snapshot model.
//!
//! # Responsibility
//! - Describe one present participant as observed by the engine.
//!
//! # Invariants
//! - `id` is stable for the participant's lifetime and never reused.
//! - The engine never mutates identities; the host session layer owns them.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable identifier of a session participant.
pub type IdentityId = Uuid;

/// Read-only snapshot of a present participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: IdentityId,
    /// Current display name, as typed by others when mentioning.
    pub display_name: String,
    /// Combat flag supplied by the host's combat-state tracker.
    pub in_combat: bool,
}

impl Identity {
    pub fn new(id: IdentityId, display_name: impl Into<String>) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            in_combat: false,
        }
    }

    /// Convenience constructor with a freshly generated id.
    pub fn generate(display_name: impl Into<String>) -> Self {
        Self::new(Uuid::new_v4(), display_name)
    }
}
