//! Normalization of model output into verified analysis records.
//!
//! Model responses are untrusted: every vocabulary, grammar, and sentence
//! item must point at text that actually occurs in the chunk (and at the
//! anchored position, when anchors are supplied) or it is dropped. Parse
//! failures degrade to empty records, never errors.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use tadoku_core::{ChunkAnalysis, GrammarRecord, SentenceRecord, Token, VocabRecord};

use crate::anchor;
use crate::scoring;
use crate::segment::Chunk;

const MAX_VOCAB_ITEMS: usize = 120;
const MAX_GRAMMAR_ITEMS: usize = 120;
const MAX_SENTENCE_ITEMS: usize = 80;

static FENCED_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)```(?:json)?\s*(.*?)\s*```").unwrap());

/// 32-bit FNV-style hash over UTF-16 code units, as lowercase hex.
/// Stable across runs, so ids derived from it survive re-analysis.
pub fn hash_text(value: &str) -> String {
    let mut hash: u32 = 2166136261;
    for unit in value.encode_utf16() {
        hash ^= u32::from(unit);
        hash = hash
            .wrapping_add(hash << 1)
            .wrapping_add(hash << 4)
            .wrapping_add(hash << 7)
            .wrapping_add(hash << 8)
            .wrapping_add(hash << 24);
    }
    format!("{hash:x}")
}

/// Deterministic id for a model-supplied grammar item. Identical items
/// produce the same id regardless of batch ordering.
pub fn llm_grammar_id(
    title: &str,
    explanation: &str,
    match_text: &str,
    anchor_before: &str,
    anchor_after: &str,
) -> String {
    let seed = [title, explanation, match_text, anchor_before, anchor_after].join("::");
    format!("llm-{}", hash_text(&seed))
}

fn clean_str(value: Option<&Value>) -> String {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or("")
        .to_string()
}

/// First alias key holding a non-empty string, trimmed.
fn clean_first(item: &Value, keys: &[&str]) -> String {
    for key in keys {
        if let Some(raw) = item.get(*key).and_then(Value::as_str) {
            if !raw.is_empty() {
                return raw.trim().to_string();
            }
        }
    }
    String::new()
}

fn clean_list(value: &Value, max_items: usize) -> Vec<String> {
    let Value::Array(items) = value else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .take(max_items)
        .map(str::to_string)
        .collect()
}

fn clean_list_first(item: &Value, keys: &[&str], max_items: usize) -> Vec<String> {
    for key in keys {
        match item.get(*key) {
            None | Some(Value::Null) => continue,
            Some(value) => return clean_list(value, max_items),
        }
    }
    Vec::new()
}

fn extract_json_text(response: &str) -> &str {
    let raw = response.trim();
    if raw.is_empty() {
        return raw;
    }
    if let Some(caps) = FENCED_BLOCK.captures(raw) {
        if let Some(inner) = caps.get(1) {
            let inner = inner.as_str().trim();
            if !inner.is_empty() {
                return inner;
            }
        }
    }
    raw
}

fn parse_json_payload(response: &str) -> Option<Value> {
    let candidate = extract_json_text(response);
    if candidate.is_empty() {
        return None;
    }
    serde_json::from_str(candidate).ok()
}

fn normalize_vocab_items(payload: Option<&Value>, chunk_text: &str) -> Vec<VocabRecord> {
    let Some(Value::Array(items)) = payload else {
        return Vec::new();
    };

    let mut words = Vec::new();
    for item in items {
        if !item.is_object() {
            continue;
        }
        let surface = clean_str(item.get("surface_in_text"));
        if surface.is_empty() {
            continue;
        }
        let anchor_before = clean_str(item.get("anchor_before"));
        let anchor_after = clean_str(item.get("anchor_after"));
        if !chunk_text.contains(&surface) {
            continue;
        }
        if anchor::find_anchored_index(chunk_text, &surface, &anchor_before, &anchor_after)
            .is_none()
        {
            continue;
        }

        let lemma = clean_str(item.get("lemma"));
        let base = if lemma.is_empty() {
            surface.clone()
        } else {
            lemma
        };
        let hint = match item.get("zh_gloss") {
            Some(value) => clean_list(value, usize::MAX).join(" / "),
            None => String::new(),
        };

        words.push(VocabRecord {
            surface,
            base,
            reading: clean_str(item.get("reading_hira")),
            hint,
            note_zh: clean_str(item.get("note_zh")),
            anchor_before,
            anchor_after,
            match_count: 0,
        });
        if words.len() == MAX_VOCAB_ITEMS {
            break;
        }
    }
    words
}

fn normalize_grammar_items(payload: Option<&Value>, chunk_text: &str) -> Vec<GrammarRecord> {
    let Some(Value::Array(items)) = payload else {
        return Vec::new();
    };

    let mut patterns = Vec::new();
    for (index, item) in items.iter().enumerate() {
        if !item.is_object() {
            continue;
        }
        let match_text = clean_str(item.get("matched_text"));
        if match_text.is_empty() {
            continue;
        }
        let anchor_before = clean_str(item.get("anchor_before"));
        let anchor_after = clean_str(item.get("anchor_after"));
        if !chunk_text.contains(&match_text) {
            continue;
        }
        if anchor::find_anchored_index(chunk_text, &match_text, &anchor_before, &anchor_after)
            .is_none()
        {
            continue;
        }

        let title_zh = clean_str(item.get("title_zh"));
        let explain_zh = clean_str(item.get("explain_zh"));
        let id = llm_grammar_id(&title_zh, &explain_zh, &match_text, &anchor_before, &anchor_after);
        patterns.push(GrammarRecord {
            id,
            name: if title_zh.is_empty() {
                format!("Pattern {}", index + 1)
            } else {
                title_zh
            },
            explanation_zh: if explain_zh.is_empty() {
                "LLM grammar item".to_string()
            } else {
                explain_zh
            },
            match_text,
            anchor_before,
            anchor_after,
        });
        if patterns.len() == MAX_GRAMMAR_ITEMS {
            break;
        }
    }
    patterns
}

fn normalize_sentence_items(payload: Option<&Value>, chunk_text: &str) -> Vec<SentenceRecord> {
    let Some(Value::Array(items)) = payload else {
        return Vec::new();
    };

    let mut rows = Vec::new();
    for item in items {
        if !item.is_object() {
            continue;
        }
        let sentence = clean_first(item, &["sentence_in_text", "sentence_ja", "sentence", "jp_text"]);
        if sentence.is_empty() {
            continue;
        }
        let anchor_before = clean_str(item.get("anchor_before"));
        let anchor_after = clean_str(item.get("anchor_after"));
        if !chunk_text.contains(&sentence) {
            continue;
        }
        if anchor::find_anchored_index(chunk_text, &sentence, &anchor_before, &anchor_after)
            .is_none()
        {
            continue;
        }

        rows.push(SentenceRecord {
            sentence,
            translation_zh: clean_first(item, &["translation_zh", "zh_translation", "translation"]),
            structure: clean_first(item, &["structure_zh", "structure_note_zh", "structure"]),
            grammar_hints: clean_list_first(item, &["grammar_points", "grammar_hints", "grammar"], 10),
            vocab_hints: clean_list_first(item, &["vocab_focus", "vocab_hints", "vocab"], 12),
        });
        if rows.len() == MAX_SENTENCE_ITEMS {
            break;
        }
    }
    rows
}

fn normalize_chunk_result(item: &Value, chunk_text: &str) -> ChunkAnalysis {
    ChunkAnalysis {
        words: normalize_vocab_items(item.get("vocab"), chunk_text),
        patterns: normalize_grammar_items(item.get("grammar"), chunk_text),
        sentences: normalize_sentence_items(item.get("sentence_analysis"), chunk_text),
        translation_zh: clean_first(item, &["translation_zh", "chunk_translation_zh"]),
    }
}

/// Normalizes a response that answers for exactly one chunk.
pub fn normalize_chunk_payload(response_text: &str, chunk_text: &str) -> ChunkAnalysis {
    match parse_json_payload(response_text) {
        Some(payload) if payload.is_object() => normalize_chunk_result(&payload, chunk_text),
        _ => ChunkAnalysis::default(),
    }
}

/// Normalizes a batched response. Every requested chunk gets exactly one
/// record; chunks the model skipped (or answered malformed) get an empty
/// one.
pub fn normalize_batch_payload(
    response_text: &str,
    batch_chunks: &[Chunk],
) -> HashMap<String, ChunkAnalysis> {
    let mut output = HashMap::new();

    let Some(payload) = parse_json_payload(response_text).filter(Value::is_object) else {
        for chunk in batch_chunks {
            output.insert(chunk.id.clone(), ChunkAnalysis::default());
        }
        return output;
    };

    if let Some(results) = payload.get("results").and_then(Value::as_array) {
        let text_by_id: HashMap<&str, &str> = batch_chunks
            .iter()
            .map(|c| (c.id.as_str(), c.text.as_str()))
            .collect();
        for item in results {
            if !item.is_object() {
                continue;
            }
            let chunk_id = clean_str(item.get("chunk_id"));
            let Some(text) = text_by_id.get(chunk_id.as_str()) else {
                continue;
            };
            output.insert(chunk_id, normalize_chunk_result(item, text));
        }
        for chunk in batch_chunks {
            output.entry(chunk.id.clone()).or_default();
        }
        return output;
    }

    if batch_chunks.len() == 1 {
        let chunk = &batch_chunks[0];
        output.insert(
            chunk.id.clone(),
            normalize_chunk_payload(response_text, &chunk.text),
        );
        return output;
    }

    for chunk in batch_chunks {
        output.insert(chunk.id.clone(), ChunkAnalysis::default());
    }
    output
}

/// Tokenizer output shaped for inspection, one entry per token.
#[derive(Debug, Clone, Serialize)]
pub struct RawTokenEntry {
    pub index: usize,
    pub surface: String,
    pub base: String,
    pub reading: String,
    pub pos: String,
}

/// Shapes raw tokens for display, dropping entries with no surface.
pub fn raw_token_entries(tokens: &[Token]) -> Vec<RawTokenEntry> {
    tokens
        .iter()
        .enumerate()
        .filter_map(|(index, token)| {
            let surface = token.surface.trim().to_string();
            if surface.is_empty() {
                return None;
            }
            let base = token.base.trim();
            let base = if base.is_empty() || base == "*" {
                surface.clone()
            } else {
                base.to_string()
            };
            let reading = if token.reading == "*" {
                String::new()
            } else {
                token.reading.trim().to_string()
            };
            Some(RawTokenEntry {
                index,
                surface,
                base,
                reading,
                pos: token.part_of_speech.trim().to_string(),
            })
        })
        .collect()
}

/// Turns raw token entries into highlightable word records, deduplicated
/// by surface. Punctuation-only surfaces are skipped.
pub fn raw_highlight_words(raw_tokens: &[RawTokenEntry]) -> Vec<VocabRecord> {
    let mut seen = std::collections::HashSet::new();
    let mut words = Vec::new();
    for token in raw_tokens {
        if token.surface.is_empty() || scoring::is_punct_or_symbol(&token.surface) {
            continue;
        }
        if !seen.insert(token.surface.as_str()) {
            continue;
        }
        words.push(VocabRecord {
            surface: token.surface.clone(),
            base: token.base.clone(),
            reading: token.reading.clone(),
            hint: if token.pos.is_empty() {
                String::new()
            } else {
                format!("POS: {}", token.pos)
            },
            ..VocabRecord::default()
        });
    }
    words
}
