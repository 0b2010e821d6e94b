//! Rewrites resolved mentions in the outgoing chat line.

use crate::model::mention::ResolvedMention;

/// Replaces every resolved mention (marker included) with `format`, where
/// `{name}` expands to the target's current display name.
///
/// Unresolved, ambiguous and self mentions are left as written. `mentions`
/// must come from one scan of `text`, so spans are ordered and disjoint.
pub fn render_highlights(text: &str, mentions: &[ResolvedMention], format: &str) -> String {
    let mut rendered = String::with_capacity(text.len());
    let mut cursor = 0;

    for mention in mentions {
        let Some(target) = mention.target() else {
            continue;
        };
        if mention.full_span.start < cursor {
            continue;
        }
        rendered.push_str(&text[cursor..mention.full_span.start]);
        rendered.push_str(&format.replace("{name}", &target.display_name));
        cursor = mention.full_span.end;
    }

    rendered.push_str(&text[cursor..]);
    rendered
}
