//! Preference-gated suppression of resolved mentions.
//!
//! # Invariants
//! - Checks short-circuit in a fixed order: disabled, ignored, in combat.
//! - The gate only reads; it never mutates preferences or the roster.

use crate::model::identity::IdentityId;
use crate::model::preference::Preference;
use crate::roster::IdentityRoster;
use std::fmt::{Display, Formatter};

/// Why a mention was not delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuppressionReason {
    NotificationsDisabled,
    SenderIgnored,
    TargetInCombat,
}

impl SuppressionReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotificationsDisabled => "notifications_disabled",
            Self::SenderIgnored => "sender_ignored",
            Self::TargetInCombat => "target_in_combat",
        }
    }
}

impl Display for SuppressionReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SuppressionGate;

impl SuppressionGate {
    pub fn new() -> Self {
        Self
    }

    /// Returns the first reason that suppresses the mention, if any.
    pub fn evaluate(
        &self,
        sender: IdentityId,
        target: IdentityId,
        preference: &Preference,
        roster: &dyn IdentityRoster,
    ) -> Option<SuppressionReason> {
        if !preference.notifications_enabled {
            return Some(SuppressionReason::NotificationsDisabled);
        }
        if preference.ignores(sender) {
            return Some(SuppressionReason::SenderIgnored);
        }
        if roster.is_in_combat(target) {
            return Some(SuppressionReason::TargetInCombat);
        }
        None
    }

    pub fn should_suppress(
        &self,
        sender: IdentityId,
        target: IdentityId,
        preference: &Preference,
        roster: &dyn IdentityRoster,
    ) -> bool {
        self.evaluate(sender, target, preference, roster).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::{SuppressionGate, SuppressionReason};
    use crate::model::identity::Identity;
    use crate::model::preference::{NotificationChannel, Preference};
    use crate::roster::SessionRoster;

    #[test]
    fn reasons_follow_fixed_order() {
        let sender = Identity::generate("Alex");
        let target = Identity::generate("Sam");
        let roster = SessionRoster::from_identities([sender.clone(), target.clone()]);
        roster.set_in_combat(target.id, true);

        let gate = SuppressionGate::new();
        let mut pref = Preference::defaults(target.id, NotificationChannel::Sound);
        pref.notifications_enabled = false;
        pref.ignore_list.insert(sender.id);

        assert_eq!(
            gate.evaluate(sender.id, target.id, &pref, &roster),
            Some(SuppressionReason::NotificationsDisabled)
        );
        pref.notifications_enabled = true;
        assert_eq!(
            gate.evaluate(sender.id, target.id, &pref, &roster),
            Some(SuppressionReason::SenderIgnored)
        );
        pref.ignore_list.clear();
        assert_eq!(
            gate.evaluate(sender.id, target.id, &pref, &roster),
            Some(SuppressionReason::TargetInCombat)
        );
        roster.set_in_combat(target.id, false);
        assert!(!gate.should_suppress(sender.id, target.id, &pref, &roster));
    }
}
