//! Non-destructive highlight spans over the page tree.
//!
//! Wrapping splits text leaves around each occurrence and inserts a span
//! carrying its metadata as data attributes; clearing unwraps every span in
//! place and re-merges adjacent text leaves, restoring the original
//! text-node structure. Chunk and unit text strings are never touched.

use crate::anchor;
use crate::page::{ElementData, PageTree};
use ego_tree::NodeId;
use tadoku_core::{GrammarRecord, VocabRecord};

/// Marker attribute carried by every highlight span.
pub const HIGHLIGHT_ATTR: &str = "data-tadoku-hl";
/// Containers carrying this attribute (panels, tooltips) are never
/// highlighted into.
pub const UI_ATTR: &str = "data-tadoku-ui";

const SKIP_TAGS: &[&str] = &["rt", "rp", "script", "style", "noscript", "textarea"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HighlightKind {
    Word,
    Pattern,
}

impl HighlightKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            HighlightKind::Word => "word",
            HighlightKind::Pattern => "pattern",
        }
    }
}

#[derive(Debug, Clone)]
pub struct HighlightOptions {
    pub kind: HighlightKind,
    /// data-* payload on the span, as (suffix, value) pairs; empty values
    /// are not emitted.
    pub dataset: Vec<(&'static str, String)>,
    pub max_matches: usize,
}

impl HighlightOptions {
    pub fn word(rec: &VocabRecord, max_matches: usize) -> Self {
        Self {
            kind: HighlightKind::Word,
            dataset: vec![
                ("surface", rec.surface.clone()),
                ("base", rec.base.clone()),
                ("reading", rec.reading.clone()),
                ("hint", rec.hint.clone()),
                ("note-zh", rec.note_zh.clone()),
            ],
            max_matches,
        }
    }

    pub fn pattern(rec: &GrammarRecord, max_matches: usize) -> Self {
        Self {
            kind: HighlightKind::Pattern,
            dataset: vec![
                ("pattern-id", rec.id.clone()),
                ("pattern-name", rec.name.clone()),
                ("explanation", rec.explanation_zh.clone()),
            ],
            max_matches,
        }
    }
}

/// Wrap up to `max_matches` occurrences of `literal` under `root`.
/// Returns the number of spans created.
pub fn highlight_literal(
    page: &mut PageTree,
    root: NodeId,
    literal: &str,
    opts: &HighlightOptions,
) -> usize {
    if literal.is_empty() || opts.max_matches == 0 {
        return 0;
    }
    let mut wrapped = 0usize;
    for leaf in eligible_leaves(page, root) {
        if wrapped >= opts.max_matches {
            break;
        }
        let Some(text) = page.text(leaf).map(|t| t.to_string()) else {
            continue;
        };
        let positions = occurrences(&text, literal, opts.max_matches - wrapped);
        if positions.is_empty() {
            continue;
        }
        wrapped += positions.len();
        wrap_in_leaf(page, leaf, &text, literal, &positions, opts);
    }
    wrapped
}

/// Context-verified variant: an occurrence is wrapped only when the text
/// around it satisfies the anchored matcher for `before`/`after`. With
/// both anchors empty this accepts every occurrence, like
/// [`highlight_literal`].
pub fn highlight_by_context(
    page: &mut PageTree,
    root: NodeId,
    literal: &str,
    before: &str,
    after: &str,
    opts: &HighlightOptions,
) -> usize {
    if literal.is_empty() || opts.max_matches == 0 {
        return 0;
    }
    let leaves = eligible_leaves(page, root);
    let mut stream = String::new();
    let mut spans: Vec<(NodeId, usize, usize)> = Vec::new(); // leaf, start, end bytes in stream
    for &leaf in &leaves {
        if let Some(t) = page.text(leaf) {
            let start = stream.len();
            stream.push_str(t);
            spans.push((leaf, start, stream.len()));
        }
    }

    // Accepted occurrences per leaf, leaf-local byte positions.
    let mut accepted: Vec<(NodeId, Vec<usize>)> = Vec::new();
    let mut budget = opts.max_matches;
    let mut from = 0usize;
    while budget > 0 {
        let Some(rel) = stream[from..].find(literal) else {
            break;
        };
        let at = from + rel;
        from = at + literal.len();
        if !context_accepts(&stream, at, literal, before, after) {
            continue;
        }
        // Only occurrences contained in a single leaf can be wrapped.
        let Some(&(leaf, start, _)) = spans
            .iter()
            .find(|&&(_, s, e)| at >= s && at + literal.len() <= e)
        else {
            continue;
        };
        budget -= 1;
        match accepted.last_mut() {
            Some((l, ps)) if *l == leaf => ps.push(at - start),
            _ => accepted.push((leaf, vec![at - start])),
        }
    }

    let mut wrapped = 0usize;
    for (leaf, positions) in accepted {
        let Some(text) = page.text(leaf).map(|t| t.to_string()) else {
            continue;
        };
        wrapped += positions.len();
        wrap_in_leaf(page, leaf, &text, literal, &positions, opts);
    }
    wrapped
}

/// Unwrap every highlight span under `root`; returns how many were removed.
/// Safe to call with zero highlights present.
pub fn clear_highlights(page: &mut PageTree, root: NodeId) -> usize {
    let spans: Vec<NodeId> = page
        .descendants_of(root)
        .into_iter()
        .filter(|&id| page.attr(id, HIGHLIGHT_ATTR).is_some())
        .collect();
    let mut removed = 0usize;
    for span in spans {
        let parent = page.parent_of(span);
        page.unwrap_node(span);
        if let Some(parent) = parent {
            page.normalize_children(parent);
        }
        removed += 1;
    }
    removed
}

/// Text leaves under `root` that may be highlighted into: non-whitespace,
/// not inside ruby annotation, script-like tags, UI containers, or an
/// existing highlight span.
fn eligible_leaves(page: &PageTree, root: NodeId) -> Vec<NodeId> {
    page.descendants_of(root)
        .into_iter()
        .filter(|&id| match page.text(id) {
            Some(t) => !t.trim().is_empty() && eligible_parent_chain(page, id),
            None => false,
        })
        .collect()
}

fn eligible_parent_chain(page: &PageTree, leaf: NodeId) -> bool {
    for anc in page.ancestors_of(leaf) {
        if let Some(el) = page.element(anc) {
            if SKIP_TAGS.contains(&el.tag.as_str()) {
                return false;
            }
            if el.attr(HIGHLIGHT_ATTR).is_some() || el.attr(UI_ATTR).is_some() {
                return false;
            }
        }
    }
    true
}

/// Non-overlapping occurrence byte offsets, capped at `max`.
fn occurrences(text: &str, literal: &str, max: usize) -> Vec<usize> {
    let mut out = Vec::new();
    let mut from = 0usize;
    while out.len() < max {
        match text[from..].find(literal) {
            Some(rel) => {
                let at = from + rel;
                out.push(at);
                from = at + literal.len();
            }
            None => break,
        }
    }
    out
}

/// The occurrence at byte `at` is accepted when the anchored matcher,
/// run over a window of exactly-sized surrounding context, lands on it.
fn context_accepts(stream: &str, at: usize, literal: &str, before: &str, after: &str) -> bool {
    if before.is_empty() && after.is_empty() {
        return true;
    }
    let pre: String = {
        let want = before.chars().count();
        let head = &stream[..at];
        let skip = head.chars().count().saturating_sub(want);
        head.chars().skip(skip).collect()
    };
    let post: String = stream[at + literal.len()..]
        .chars()
        .take(after.chars().count())
        .collect();
    let window = format!("{pre}{literal}{post}");
    anchor::find_anchored_index(&window, literal, before, after) == Some(pre.chars().count())
}

fn wrap_in_leaf(
    page: &mut PageTree,
    leaf: NodeId,
    text: &str,
    literal: &str,
    positions: &[usize],
    opts: &HighlightOptions,
) {
    let mut pieces: Vec<NodeId> = Vec::new();
    let mut cursor = 0usize;
    for &at in positions {
        if at > cursor {
            let seg = page.new_text(&text[cursor..at]);
            pieces.push(seg);
        }
        pieces.push(make_span(page, literal, opts));
        cursor = at + literal.len();
    }
    if cursor < text.len() {
        let seg = page.new_text(&text[cursor..]);
        pieces.push(seg);
    }
    page.replace_leaf(leaf, &pieces);
}

fn make_span(page: &mut PageTree, literal: &str, opts: &HighlightOptions) -> NodeId {
    let mut el = ElementData::new("span")
        .with_attr(HIGHLIGHT_ATTR, "1")
        .with_attr(
            "class",
            &format!("tadoku-hl tadoku-hl-{}", opts.kind.as_str()),
        )
        .with_attr("data-kind", opts.kind.as_str());
    for (suffix, value) in &opts.dataset {
        if !value.is_empty() {
            el.set_attr(&format!("data-{suffix}"), value);
        }
    }
    let span = page.new_element(el);
    let txt = page.new_text(literal);
    page.append_child(span, txt);
    span
}
