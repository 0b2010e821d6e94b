//! Identity roster view.
//!
//! # Responsibility
//! - Define the read-only contract the engine uses to see who is present.
//! - Provide an in-memory roster hosts can feed from their session layer.
//!
//! # Invariants
//! - The engine only reads snapshots; presence changes come from the host.

use crate::model::identity::{Identity, IdentityId};
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// Host-side registry of currently connected participants.
pub trait IdentityRoster: Send + Sync {
    /// Snapshot of every present identity.
    fn list_present(&self) -> Vec<Identity>;

    /// Current combat state as reported by the host's combat tracker.
    fn is_in_combat(&self, id: IdentityId) -> bool;

    fn is_present(&self, id: IdentityId) -> bool {
        self.list_present().iter().any(|identity| identity.id == id)
    }

    fn get(&self, id: IdentityId) -> Option<Identity> {
        self.list_present()
            .into_iter()
            .find(|identity| identity.id == id)
    }
}

/// Thread-safe roster kept in sync by the host's join/leave/combat events.
#[derive(Debug, Default)]
pub struct SessionRoster {
    present: RwLock<BTreeMap<IdentityId, Identity>>,
}

impl SessionRoster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_identities(identities: impl IntoIterator<Item = Identity>) -> Self {
        let roster = Self::new();
        for identity in identities {
            roster.join(identity);
        }
        roster
    }

    /// Adds or replaces a present identity.
    pub fn join(&self, identity: Identity) {
        self.present.write().insert(identity.id, identity);
    }

    pub fn leave(&self, id: IdentityId) -> Option<Identity> {
        self.present.write().remove(&id)
    }

    /// Returns `false` when `id` is not present.
    pub fn rename(&self, id: IdentityId, display_name: impl Into<String>) -> bool {
        match self.present.write().get_mut(&id) {
            Some(identity) => {
                identity.display_name = display_name.into();
                true
            }
            None => false,
        }
    }

    /// Returns `false` when `id` is not present.
    pub fn set_in_combat(&self, id: IdentityId, in_combat: bool) -> bool {
        match self.present.write().get_mut(&id) {
            Some(identity) => {
                identity.in_combat = in_combat;
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.present.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.present.read().is_empty()
    }
}

impl IdentityRoster for SessionRoster {
    fn list_present(&self) -> Vec<Identity> {
        self.present.read().values().cloned().collect()
    }

    fn is_in_combat(&self, id: IdentityId) -> bool {
        self.present
            .read()
            .get(&id)
            .is_some_and(|identity| identity.in_combat)
    }

    fn is_present(&self, id: IdentityId) -> bool {
        self.present.read().contains_key(&id)
    }

    fn get(&self, id: IdentityId) -> Option<Identity> {
        self.present.read().get(&id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::{IdentityRoster, SessionRoster};
    use crate::model::identity::Identity;

    #[test]
    fn join_leave_and_combat_flags() {
        let roster = SessionRoster::new();
        let steve = Identity::generate("Steve");
        let id = steve.id;

        roster.join(steve);
        assert!(roster.is_present(id));
        assert!(!roster.is_in_combat(id));

        assert!(roster.set_in_combat(id, true));
        assert!(roster.is_in_combat(id));
        assert!(roster.list_present()[0].in_combat);

        assert!(roster.rename(id, "Stevie"));
        assert_eq!(roster.get(id).unwrap().display_name, "Stevie");

        assert!(roster.leave(id).is_some());
        assert!(roster.is_empty());
        assert!(!roster.is_in_combat(id));
        assert!(!roster.set_in_combat(id, true));
    }
}
