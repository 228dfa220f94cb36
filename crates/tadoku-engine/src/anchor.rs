//! Anchored substring verification.
//!
//! Model output claims "this text occurs here, between this before-context
//! and this after-context". We only trust claims we can reproduce against
//! the source text; a claim whose anchors do not corroborate it is rejected
//! outright even when the bare substring exists somewhere else.

/// Find the verified occurrence of `target` in `text`, as a char index.
///
/// Priority: `before+target+after`, then `before+target`, then
/// `target+after`. If any anchor was supplied and none of those matched,
/// the claim is rejected (no bare-substring fallback). With no anchors at
/// all, this is a plain substring search.
pub fn find_anchored_index(
    text: &str,
    target: &str,
    before: &str,
    after: &str,
) -> Option<usize> {
    if target.is_empty() {
        return None;
    }
    if !before.is_empty() && !after.is_empty() {
        let needle = format!("{before}{target}{after}");
        if let Some(i) = text.find(&needle) {
            return Some(char_index(text, i + before.len()));
        }
    }
    if !before.is_empty() {
        let needle = format!("{before}{target}");
        if let Some(i) = text.find(&needle) {
            return Some(char_index(text, i + before.len()));
        }
    }
    if !after.is_empty() {
        let needle = format!("{target}{after}");
        if let Some(i) = text.find(&needle) {
            return Some(char_index(text, i));
        }
    }
    if !before.is_empty() || !after.is_empty() {
        return None;
    }
    text.find(target).map(|i| char_index(text, i))
}

/// True when the claim verifies: `target` is a plain substring and the
/// anchored search accepts it.
pub fn verify(text: &str, target: &str, before: &str, after: &str) -> bool {
    !target.is_empty()
        && text.contains(target)
        && find_anchored_index(text, target, before, after).is_some()
}

fn char_index(text: &str, byte: usize) -> usize {
    text[..byte].chars().count()
}
