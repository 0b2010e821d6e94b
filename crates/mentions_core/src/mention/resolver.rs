//! Candidate-to-identity resolution.
//!
//! # Responsibility
//! - Map one scanned token onto one present identity, or explain why not.
//!
//! # Invariants
//! - Priority is exact, then case-insensitive, then unique prefix.
//! - An exact case-sensitive hit never falls through to prefix logic.
//! - More than one prefix hit is `Ambiguous` and notifies nobody.
//! - The sender is reported as `SelfMention` unless self-mentions are enabled.

use crate::config::MentionConfig;
use crate::model::identity::{Identity, IdentityId};
use crate::model::mention::{MentionCandidate, Resolution, ResolvedMention};

#[derive(Debug, Clone)]
pub struct IdentityResolver {
    self_mentions_allowed: bool,
    inline_prefix_matching: bool,
}

impl IdentityResolver {
    pub fn new(config: &MentionConfig) -> Self {
        Self {
            self_mentions_allowed: config.self_mentions_allowed,
            inline_prefix_matching: config.inline_prefix_matching,
        }
    }

    /// Resolves `candidate` written by `sender` against a roster snapshot.
    pub fn resolve(
        &self,
        sender: IdentityId,
        candidate: &MentionCandidate<'_>,
        roster: &[Identity],
    ) -> ResolvedMention {
        let mut resolution = self.classify(candidate, roster);
        let names_sender = resolution
            .identity()
            .is_some_and(|identity| identity.id == sender);
        if names_sender && !self.self_mentions_allowed {
            resolution = Resolution::SelfMention;
        }

        ResolvedMention {
            token: candidate.raw.to_string(),
            span: candidate.span.clone(),
            full_span: candidate.full_span.clone(),
            resolution,
        }
    }

    fn classify(&self, candidate: &MentionCandidate<'_>, roster: &[Identity]) -> Resolution {
        if let Some(identity) = roster
            .iter()
            .find(|identity| identity.display_name == candidate.raw)
        {
            return Resolution::Exact(identity.clone());
        }

        let folded: Vec<&Identity> = roster
            .iter()
            .filter(|identity| identity.display_name.to_lowercase() == candidate.normalized)
            .collect();
        match folded.as_slice() {
            [single] => return Resolution::CaseInsensitive((*single).clone()),
            [] => {}
            many => return Resolution::Ambiguous(many.iter().map(|identity| identity.id).collect()),
        }

        if !candidate.trigger.is_marker() && !self.inline_prefix_matching {
            return Resolution::Unresolved;
        }

        let prefixed: Vec<&Identity> = roster
            .iter()
            .filter(|identity| {
                identity
                    .display_name
                    .to_lowercase()
                    .starts_with(candidate.normalized.as_str())
            })
            .collect();
        match prefixed.as_slice() {
            [] => Resolution::Unresolved,
            [single] => Resolution::PrefixUnique((*single).clone()),
            many => Resolution::Ambiguous(many.iter().map(|identity| identity.id).collect()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::IdentityResolver;
    use crate::config::{MentionConfig, TriggerRule};
    use crate::mention::scanner::MentionScanner;
    use crate::model::identity::Identity;
    use crate::model::mention::{MatchKind, Resolution};
    use uuid::Uuid;

    fn roster() -> Vec<Identity> {
        vec![
            Identity::generate("Ann"),
            Identity::generate("Anna"),
            Identity::generate("Steve"),
        ]
    }

    fn resolve_text(config: &MentionConfig, roster: &[Identity], text: &str) -> Resolution {
        resolve_as(config, Uuid::new_v4(), roster, text)
    }

    fn resolve_as(
        config: &MentionConfig,
        sender: Uuid,
        roster: &[Identity],
        text: &str,
    ) -> Resolution {
        let scanner = MentionScanner::new(config);
        let resolver = IdentityResolver::new(config);
        let candidate = scanner.scan(text).next().expect("text must contain a candidate");
        resolver.resolve(sender, &candidate, roster).resolution
    }

    #[test]
    fn ann_and_anna_disambiguation() {
        let config = MentionConfig::default();
        let roster = roster();

        assert!(matches!(
            resolve_text(&config, &roster, "@an"),
            Resolution::Ambiguous(ids) if ids.len() == 2
        ));
        assert!(matches!(
            resolve_text(&config, &roster, "@Ann"),
            Resolution::Exact(identity) if identity.display_name == "Ann"
        ));
        assert_eq!(resolve_text(&config, &roster, "@Anne"), Resolution::Unresolved);
    }

    #[test]
    fn exact_match_wins_over_prefix_for_any_roster() {
        let config = MentionConfig::default();
        let rosters = [
            vec![Identity::generate("Ann")],
            vec![Identity::generate("Ann"), Identity::generate("Anna")],
            vec![
                Identity::generate("Annabel"),
                Identity::generate("Ann"),
                Identity::generate("Anna"),
            ],
        ];
        for roster in rosters {
            let resolution = resolve_text(&config, &roster, "@Ann");
            assert_eq!(resolution.match_kind(), Some(MatchKind::Exact));
        }
    }

    #[test]
    fn case_insensitive_and_unique_prefix() {
        let config = MentionConfig::default();
        let roster = roster();

        let folded = resolve_text(&config, &roster, "@steve");
        assert_eq!(folded.match_kind(), Some(MatchKind::CaseInsensitive));

        let prefix = resolve_text(&config, &roster, "@ste");
        assert_eq!(prefix.match_kind(), Some(MatchKind::PrefixUnique));
        assert_eq!(prefix.identity().unwrap().display_name, "Steve");
    }

    #[test]
    fn names_differing_only_by_case_are_ambiguous() {
        let config = MentionConfig::default();
        let roster = vec![Identity::generate("alex"), Identity::generate("ALEX")];
        assert!(matches!(
            resolve_text(&config, &roster, "@Alex"),
            Resolution::Ambiguous(_)
        ));
    }

    #[test]
    fn self_mention_is_dropped_by_default_and_allowed_by_config() {
        let roster = roster();
        let steve = roster[2].id;

        let resolution = resolve_as(&MentionConfig::default(), steve, &roster, "@Steve");
        assert_eq!(resolution, Resolution::SelfMention);

        let permissive = MentionConfig {
            self_mentions_allowed: true,
            ..MentionConfig::default()
        };
        let resolution = resolve_as(&permissive, steve, &roster, "@Steve");
        assert_eq!(resolution.match_kind(), Some(MatchKind::Exact));
    }

    #[test]
    fn inline_words_do_not_prefix_match_unless_enabled() {
        let inline = MentionConfig {
            trigger_rule: TriggerRule::InlineNameMatch,
            ..MentionConfig::default()
        };
        let roster = roster();
        assert_eq!(resolve_text(&inline, &roster, "stev"), Resolution::Unresolved);

        let with_prefix = MentionConfig {
            inline_prefix_matching: true,
            ..inline
        };
        let resolution = resolve_text(&with_prefix, &roster, "stev");
        assert_eq!(resolution.match_kind(), Some(MatchKind::PrefixUnique));
    }
}
