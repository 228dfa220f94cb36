//! Prompt assembly for batched model analysis, plus cache keying.

use serde::Serialize;
use sha2::{Digest, Sha256};
use tadoku_core::{Error, Result, SessionSettings, CHARS_PER_MINUTE};
use url::{Position, Url};

use crate::analysis::hash_text;
use crate::segment::Chunk;

pub const PROMPT_PLACEHOLDER: &str = "<%CONTENT%>";
pub const LEARNER_PROFILE_PLACEHOLDER: &str = "<%LEARNER_PROFILE%>";
pub const DEFAULT_LEARNER_PROFILE: &str = "a Chinese-speaking beginner of N5 level";

/// A batch request keeps pulling chunks until it covers roughly ten
/// minutes of reading.
pub const BATCH_TARGET_CHARS: usize = 10 * CHARS_PER_MINUTE as usize;

pub const DEFAULT_TEMPLATE: &str = r#"SYSTEM:
You are a Japanese reading tutor for Chinese-speaking learners.
Learner profile: <%LEARNER_PROFILE%>
Given MULTIPLE Japanese chunks, output key vocabulary and grammar patterns with concise Chinese explanations.
IMPORTANT:
- Output MUST be valid JSON only (no extra text).
- You MUST return one result object for every input chunk_id.
- All fields that reference original text MUST be exact substrings copied from the matching chunk text (character-for-character).
  This includes: surface_in_text, matched_text, anchor_before, anchor_after.
- Select items that are most important for understanding. Avoid proper nouns/time numbers unless essential.
- Do not mix text across chunks.


JSON schema:
{
  "template_version": "batch_v1",
  "results": [
    {
      "chunk_id": "<same as input chunk_id>",
      "vocab": [
        {
          "surface_in_text": "<exact substring>",
          "reading_hira": "<hiragana reading>",
          "lemma": "<dictionary form (kanji if standard)>",
          "zh_gloss": ["<short Chinese meaning 1>", "<meaning 2 optional>"],
          "note_zh": "<1 sentence contextual note>",
          "anchor_before": "<6-12 chars before surface in the chunk, exact>",
          "anchor_after": "<6-12 chars after surface in the chunk, exact>"
        }
      ],
      "grammar": [
        {
          "title_zh": "<short name>",
          "explain_zh": "<1-2 sentence explanation in Chinese>",
          "example_ja": "<one simple Japanese example sentence>",
          "matched_text": "<exact substring from chunk, ideally 12-30 chars>",
          "anchor_before": "<6-12 chars before matched_text, exact>",
          "anchor_after": "<6-12 chars after matched_text, exact>"
        }
      ]
    }
  ]
}

USER:
batch = <%CONTENT%>"#;

/// Custom template when one is set and non-blank, else the default.
pub fn effective_template(custom: Option<&str>) -> &str {
    custom
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .unwrap_or(DEFAULT_TEMPLATE)
}

pub fn effective_learner_profile(profile: &str) -> &str {
    let trimmed = profile.trim();
    if trimmed.is_empty() {
        DEFAULT_LEARNER_PROFILE
    } else {
        trimmed
    }
}

/// Fills the template. The content placeholder is mandatory; the learner
/// profile is substituted in place when the template carries its
/// placeholder, and prefixed as a header line otherwise.
pub fn build_prompt(template: &str, content_payload: &str, learner_profile: &str) -> Result<String> {
    if !template.contains(PROMPT_PLACEHOLDER) {
        return Err(Error::Config(format!(
            "prompt template must include {PROMPT_PLACEHOLDER}"
        )));
    }
    let profile = effective_learner_profile(learner_profile);
    let mut prompt = template.replace(PROMPT_PLACEHOLDER, content_payload);
    if prompt.contains(LEARNER_PROFILE_PLACEHOLDER) {
        prompt = prompt.replace(LEARNER_PROFILE_PLACEHOLDER, profile);
    } else {
        prompt = format!("Learner profile: {profile}\n\n{prompt}");
    }
    Ok(prompt)
}

#[derive(Serialize)]
struct BatchChunkRow<'a> {
    chunk_id: &'a str,
    text: &'a str,
}

/// JSON array of `{chunk_id, text}` rows, pretty-printed so the model
/// sees one field per line.
pub fn batch_payload(chunks: &[&Chunk]) -> Result<String> {
    let rows: Vec<BatchChunkRow> = chunks
        .iter()
        .map(|chunk| BatchChunkRow {
            chunk_id: &chunk.id,
            text: &chunk.text,
        })
        .collect();
    serde_json::to_string_pretty(&rows).map_err(|e| Error::Model(e.to_string()))
}

/// Chunks to send for one request: the target plus following chunks
/// until the batch covers `BATCH_TARGET_CHARS`.
pub fn select_batch(chunks: &[Chunk], target_index: usize) -> &[Chunk] {
    if target_index >= chunks.len() {
        return &[];
    }
    let mut end = target_index;
    let mut budget = 0usize;
    while end < chunks.len() {
        budget += chunks[end].char_count;
        end += 1;
        if budget >= BATCH_TARGET_CHARS {
            break;
        }
    }
    &chunks[target_index..end]
}

/// Short stable fingerprint of a template, for cache keys.
pub fn template_fingerprint(template: &str) -> String {
    let digest = Sha256::digest(template.as_bytes());
    hex::encode(digest)[..12].to_string()
}

/// Stable identity of a page: scheme, host, and path, with query and
/// fragment stripped. Unparseable input is used as-is.
pub fn page_key(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(parsed) => parsed[..Position::AfterPath].to_string(),
        Err(_) => raw.trim().to_string(),
    }
}

/// Cache key for one chunk's model analysis. Any input that could change
/// the response participates: chunk identity and text, provider, model,
/// tier, learner profile, and the template.
pub fn analysis_cache_key(page_key: &str, chunk: &Chunk, settings: &SessionSettings) -> String {
    let text_hash = hash_text(&chunk.text);
    let template = effective_template(settings.prompt_template.as_deref());
    let fingerprint = template_fingerprint(template);
    [
        "llm",
        page_key,
        chunk.id.as_str(),
        text_hash.as_str(),
        settings.provider.as_str(),
        settings.model.as_str(),
        settings.tier.as_str(),
        effective_learner_profile(&settings.learner_profile),
        fingerprint.as_str(),
    ]
    .join("::")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(id: &str, text: &str) -> Chunk {
        Chunk {
            id: id.to_string(),
            start_unit: 0,
            end_unit: 0,
            nodes: Vec::new(),
            text: text.to_string(),
            char_count: text.chars().count(),
        }
    }

    fn sized_chunk(id: &str, chars: usize) -> Chunk {
        let text = "あ".repeat(chars);
        chunk(id, &text)
    }

    #[test]
    fn blank_custom_template_falls_back_to_default() {
        assert_eq!(effective_template(None), DEFAULT_TEMPLATE);
        assert_eq!(effective_template(Some("   ")), DEFAULT_TEMPLATE);
        assert_eq!(effective_template(Some("x <%CONTENT%>")), "x <%CONTENT%>");
    }

    #[test]
    fn prompt_fills_content_and_profile() {
        let prompt = build_prompt(
            "Profile: <%LEARNER_PROFILE%>\nbatch = <%CONTENT%>",
            "[payload]",
            "an N3 learner",
        )
        .unwrap();
        assert_eq!(prompt, "Profile: an N3 learner\nbatch = [payload]");
    }

    #[test]
    fn profile_header_is_prepended_when_placeholder_missing() {
        let prompt = build_prompt("batch = <%CONTENT%>", "[p]", "").unwrap();
        assert!(prompt.starts_with(&format!("Learner profile: {DEFAULT_LEARNER_PROFILE}\n\n")));
        assert!(prompt.ends_with("batch = [p]"));
    }

    #[test]
    fn template_without_content_placeholder_is_rejected() {
        let err = build_prompt("no placeholder here", "[p]", "").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn batch_payload_round_trips() {
        let a = chunk("0-1", "雨が降る。");
        let b = chunk("2-2", "風が吹く。");
        let payload = batch_payload(&[&a, &b]).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(parsed[0]["chunk_id"], "0-1");
        assert_eq!(parsed[1]["text"], "風が吹く。");
    }

    #[test]
    fn batch_extends_until_target_chars() {
        let chunks = vec![
            sized_chunk("0-0", 1000),
            sized_chunk("1-1", 500),
            sized_chunk("2-2", 400),
            sized_chunk("3-3", 100),
        ];
        let batch = select_batch(&chunks, 0);
        let ids: Vec<&str> = batch.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, ["0-0", "1-1", "2-2"]);

        let tail = select_batch(&chunks, 3);
        assert_eq!(tail.len(), 1);
        assert!(select_batch(&chunks, 9).is_empty());
    }

    #[test]
    fn cache_key_tracks_every_input() {
        let settings = SessionSettings {
            provider: "openai".to_string(),
            model: "gpt-5-mini".to_string(),
            tier: "flex".to_string(),
            ..SessionSettings::default()
        };
        let a = chunk("0-1", "雨が降る。");
        let key = analysis_cache_key("https://example.com/novel", &a, &settings);
        assert!(key.starts_with("llm::https://example.com/novel::0-1::"));
        assert!(key.contains("::openai::gpt-5-mini::flex::"));

        let b = chunk("0-1", "風が吹く。");
        assert_ne!(key, analysis_cache_key("https://example.com/novel", &b, &settings));

        let mut other = settings.clone();
        other.prompt_template = Some("custom <%CONTENT%>".to_string());
        assert_ne!(key, analysis_cache_key("https://example.com/novel", &a, &other));
    }

    #[test]
    fn page_key_strips_query_and_fragment() {
        assert_eq!(
            page_key("https://example.com/cards/001.html?q=1#top"),
            "https://example.com/cards/001.html"
        );
        assert_eq!(page_key("not a url "), "not a url");
    }
}
