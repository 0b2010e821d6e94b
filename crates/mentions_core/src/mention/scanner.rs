//! Text segmentation into mention candidates.
//!
//! # Responsibility
//! - Split chat text into word tokens and keep the ones that may be names.
//! - Apply the configured trigger rule (marker-only or inline).
//!
//! # Invariants
//! - Pure: no roster access and no state shared between `scan` calls.
//! - A marker only counts at the start of the text or after a non-word
//!   character, so `mail@host` is not a mention of `host`.

use crate::config::{MentionConfig, TriggerRule};
use crate::model::mention::{MentionCandidate, MentionTrigger};
use regex::Regex;

const NAME_CHARS: &str = r"[\p{L}\p{N}_]";

/// Compiled scanner for one configuration.
#[derive(Debug, Clone)]
pub struct MentionScanner {
    token_regex: Regex,
    rule: TriggerRule,
    min_inline_len: usize,
    max_len: usize,
}

impl MentionScanner {
    pub fn new(config: &MentionConfig) -> Self {
        let pattern = if config.markers.is_empty() {
            format!("(?P<name>{NAME_CHARS}+)")
        } else {
            let class: String = config
                .markers
                .iter()
                .map(|marker| regex::escape(&marker.to_string()))
                .collect();
            format!("(?P<marker>[{class}])?(?P<name>{NAME_CHARS}+)")
        };
        // Markers are validated to be non-word characters and escaped above.
        let token_regex = Regex::new(&pattern).expect("mention token regex must compile");

        Self {
            token_regex,
            rule: config.trigger_rule,
            min_inline_len: config.min_inline_token_length,
            max_len: config.max_token_length,
        }
    }

    /// Lazily yields candidates in order of appearance.
    pub fn scan<'a>(&'a self, text: &'a str) -> impl Iterator<Item = MentionCandidate<'a>> + 'a {
        self.token_regex
            .captures_iter(text)
            .filter_map(move |caps| {
                let name = caps.name("name")?;
                let marker = caps
                    .name("marker")
                    .filter(|marker| starts_at_boundary(text, marker.start()));
                let trigger = match marker {
                    Some(marker) => MentionTrigger::Marker(marker.as_str().chars().next()?),
                    None => MentionTrigger::Inline,
                };
                self.accept(name.as_str(), trigger)?;

                let full_start = marker.map_or(name.start(), |marker| marker.start());
                Some(MentionCandidate {
                    raw: name.as_str(),
                    span: name.range(),
                    full_span: full_start..name.end(),
                    normalized: name.as_str().to_lowercase(),
                    trigger,
                })
            })
    }

    fn accept(&self, token: &str, trigger: MentionTrigger) -> Option<()> {
        let len = token.chars().count();
        if len > self.max_len {
            return None;
        }
        match (self.rule, trigger) {
            (_, MentionTrigger::Marker(_)) => Some(()),
            (TriggerRule::MentionMarkerOnly, MentionTrigger::Inline) => None,
            (TriggerRule::InlineNameMatch, MentionTrigger::Inline) => {
                let name_like = len >= self.min_inline_len
                    && token.chars().any(|c| c.is_alphabetic() || c == '_');
                name_like.then_some(())
            }
        }
    }
}

fn starts_at_boundary(text: &str, index: usize) -> bool {
    text[..index]
        .chars()
        .next_back()
        .map_or(true, |prev| !(prev.is_alphanumeric() || prev == '_'))
}

#[cfg(test)]
mod tests {
    use super::MentionScanner;
    use crate::config::{MentionConfig, TriggerRule};
    use crate::model::mention::MentionTrigger;

    fn marker_scanner() -> MentionScanner {
        MentionScanner::new(&MentionConfig::default())
    }

    fn inline_scanner() -> MentionScanner {
        MentionScanner::new(&MentionConfig {
            trigger_rule: TriggerRule::InlineNameMatch,
            ..MentionConfig::default()
        })
    }

    #[test]
    fn text_without_name_tokens_yields_nothing() {
        for text in ["", "   ", "?!... ,,", "12 34 !!", "@ @@ !"] {
            assert_eq!(marker_scanner().scan(text).count(), 0, "text: {text:?}");
            assert_eq!(inline_scanner().scan(text).count(), 0, "text: {text:?}");
        }
    }

    #[test]
    fn marker_mode_keeps_only_marked_tokens() {
        let scanner = marker_scanner();
        let text = "hey @Steve and !alex, not bob";
        let candidates: Vec<_> = scanner.scan(text).collect();

        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].raw, "Steve");
        assert_eq!(candidates[0].normalized, "steve");
        assert_eq!(candidates[0].trigger, MentionTrigger::Marker('@'));
        assert_eq!(&text[candidates[0].span.clone()], "Steve");
        assert_eq!(&text[candidates[0].full_span.clone()], "@Steve");
        assert_eq!(candidates[1].raw, "alex");
        assert_eq!(candidates[1].trigger, MentionTrigger::Marker('!'));
    }

    #[test]
    fn marker_inside_word_is_not_a_mention() {
        let scanner = marker_scanner();
        assert_eq!(scanner.scan("mail me at steve@example").count(), 0);
    }

    #[test]
    fn inline_mode_yields_name_shaped_words() {
        let scanner = inline_scanner();
        let raws: Vec<_> = scanner
            .scan("gg Steve, see @Ann at 1200 ok")
            .map(|candidate| (candidate.raw, candidate.trigger))
            .collect();

        assert_eq!(
            raws,
            vec![
                ("Steve", MentionTrigger::Inline),
                ("see", MentionTrigger::Inline),
                ("Ann", MentionTrigger::Marker('@')),
            ]
        );
    }

    #[test]
    fn overlong_tokens_are_skipped() {
        let scanner = marker_scanner();
        let long = format!("@{}", "a".repeat(40));
        assert_eq!(scanner.scan(&long).count(), 0);
    }

    #[test]
    fn scan_is_restartable() {
        let scanner = marker_scanner();
        let text = "@one @two";
        let first: Vec<_> = scanner.scan(text).map(|c| c.raw).collect();
        let second: Vec<_> = scanner.scan(text).map(|c| c.raw).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn unicode_names_are_tokenized() {
        let scanner = marker_scanner();
        let text = "hallo @Jürgen!";
        let candidate = scanner.scan(text).next().expect("candidate");
        assert_eq!(candidate.raw, "Jürgen");
        assert_eq!(candidate.normalized, "jürgen");
        assert_eq!(&text[candidate.span], "Jürgen");
    }
}
