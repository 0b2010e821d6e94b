//! Mention candidate and resolution records.
//!
//! # Responsibility
//! - Carry scanner output to the resolver without copying the message.
//! - Express resolution as an exhaustive tagged outcome.
//!
//! # Invariants
//! - `MentionCandidate::span` indexes the name part of the source message,
//!   and `raw == &text[span]`.
//! - A prefix lookup with more than one hit is `Ambiguous`, never
//!   `PrefixUnique`.

use crate::model::identity::{Identity, IdentityId};
use std::ops::Range;

/// How a candidate was recognized in the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MentionTrigger {
    /// Preceded by a marker character such as `@`.
    Marker(char),
    /// Plain word that looks like a name.
    Inline,
}

impl MentionTrigger {
    pub fn is_marker(self) -> bool {
        matches!(self, Self::Marker(_))
    }
}

/// Token that may reference a participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MentionCandidate<'t> {
    /// Name slice exactly as written, without the marker.
    pub raw: &'t str,
    /// Byte range of `raw` in the scanned text.
    pub span: Range<usize>,
    /// Byte range including the marker character, if any.
    pub full_span: Range<usize>,
    /// Lower-cased form used for comparisons.
    pub normalized: String,
    pub trigger: MentionTrigger,
}

/// Match quality of a successful resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    Exact,
    CaseInsensitive,
    PrefixUnique,
}

/// Outcome of resolving one candidate against the roster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Exact(Identity),
    CaseInsensitive(Identity),
    PrefixUnique(Identity),
    /// Several identities fit; nobody is notified.
    Ambiguous(Vec<IdentityId>),
    Unresolved,
    /// Resolved to the sender while self-mentions are disabled.
    SelfMention,
}

impl Resolution {
    pub fn identity(&self) -> Option<&Identity> {
        match self {
            Self::Exact(identity) | Self::CaseInsensitive(identity) | Self::PrefixUnique(identity) => {
                Some(identity)
            }
            Self::Ambiguous(_) | Self::Unresolved | Self::SelfMention => None,
        }
    }

    pub fn match_kind(&self) -> Option<MatchKind> {
        match self {
            Self::Exact(_) => Some(MatchKind::Exact),
            Self::CaseInsensitive(_) => Some(MatchKind::CaseInsensitive),
            Self::PrefixUnique(_) => Some(MatchKind::PrefixUnique),
            Self::Ambiguous(_) | Self::Unresolved | Self::SelfMention => None,
        }
    }

    /// Short label used in log lines.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Exact(_) => "exact",
            Self::CaseInsensitive(_) => "case_insensitive",
            Self::PrefixUnique(_) => "prefix_unique",
            Self::Ambiguous(_) => "ambiguous",
            Self::Unresolved => "unresolved",
            Self::SelfMention => "self",
        }
    }
}

/// Candidate paired with its resolution; lives for one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedMention {
    pub token: String,
    pub span: Range<usize>,
    pub full_span: Range<usize>,
    pub resolution: Resolution,
}

impl ResolvedMention {
    pub fn target(&self) -> Option<&Identity> {
        self.resolution.identity()
    }
}
