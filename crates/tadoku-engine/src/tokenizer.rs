//! Tokenizer boundary plumbing.
//!
//! The engine never depends on a particular morphological analyzer: any
//! `Tokenizer` impl can be plugged in, and every failure path degrades to
//! a regex fallback that slices out runs of kanji/kana.

use once_cell::sync::Lazy;
use regex::Regex;
use tadoku_core::{Result, Token, TokenSource, TokenizedText, Tokenizer};
use tracing::{debug, warn};

static FALLBACK_WORD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[一-龯々〆ヶぁ-んァ-ンー]{2,}").unwrap());

/// Sentinel part-of-speech tag carried by fallback tokens.
pub const FALLBACK_POS: &str = "fallback";

/// Extracts runs of two or more ideographic/kana characters as opaque
/// tokens with surface = base and no reading.
pub fn fallback_tokenize(text: &str) -> Vec<Token> {
    FALLBACK_WORD
        .find_iter(text)
        .map(|m| Token {
            surface: m.as_str().to_string(),
            base: m.as_str().to_string(),
            reading: String::new(),
            part_of_speech: FALLBACK_POS.to_string(),
        })
        .collect()
}

/// A `Tokenizer` that only ever applies the regex fallback. Stands in
/// when no morphological analyzer is wired up.
pub struct FallbackTokenizer;

#[async_trait::async_trait]
impl Tokenizer for FallbackTokenizer {
    fn name(&self) -> &'static str {
        "fallback"
    }

    async fn tokenize(&self, text: &str) -> Result<TokenizedText> {
        Ok(TokenizedText {
            tokens: fallback_tokenize(text),
            source: TokenSource::Fallback,
        })
    }
}

/// Tokenizes with `primary` when available, degrading to the regex
/// fallback when it is absent or fails. Never errors.
pub async fn tokenize_or_fallback(primary: Option<&dyn Tokenizer>, text: &str) -> TokenizedText {
    let Some(primary) = primary else {
        debug!("no primary tokenizer, using regex fallback");
        return TokenizedText {
            tokens: fallback_tokenize(text),
            source: TokenSource::Fallback,
        };
    };
    match primary.tokenize(text).await {
        Ok(tokenized) => tokenized,
        Err(err) => {
            warn!(tokenizer = primary.name(), error = %err, "tokenize failed, using regex fallback");
            TokenizedText {
                tokens: fallback_tokenize(text),
                source: TokenSource::Fallback,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tadoku_core::Error;

    struct BrokenTokenizer;

    #[async_trait::async_trait]
    impl Tokenizer for BrokenTokenizer {
        fn name(&self) -> &'static str {
            "broken"
        }

        async fn tokenize(&self, _text: &str) -> Result<TokenizedText> {
            Err(Error::Ingest("dictionary missing".to_string()))
        }
    }

    struct CannedTokenizer;

    #[async_trait::async_trait]
    impl Tokenizer for CannedTokenizer {
        fn name(&self) -> &'static str {
            "canned"
        }

        async fn tokenize(&self, _text: &str) -> Result<TokenizedText> {
            Ok(TokenizedText {
                tokens: vec![Token {
                    surface: "猫".to_string(),
                    base: "猫".to_string(),
                    reading: "ネコ".to_string(),
                    part_of_speech: "名詞".to_string(),
                }],
                source: TokenSource::Primary,
            })
        }
    }

    #[test]
    fn fallback_extracts_kana_and_kanji_runs() {
        let tokens = fallback_tokenize("今日は晴れ。airplane 空港へ行く。");
        let surfaces: Vec<&str> = tokens.iter().map(|t| t.surface.as_str()).collect();
        assert_eq!(surfaces, ["今日は晴れ", "空港へ行く"]);
        assert!(tokens.iter().all(|t| t.base == t.surface));
        assert!(tokens.iter().all(|t| t.part_of_speech == FALLBACK_POS));
    }

    #[test]
    fn fallback_drops_single_character_runs() {
        assert!(fallback_tokenize("あ。犬。x").is_empty());
    }

    #[tokio::test]
    async fn missing_primary_uses_fallback() {
        let tokenized = tokenize_or_fallback(None, "桜が咲く").await;
        assert_eq!(tokenized.source, TokenSource::Fallback);
        assert_eq!(tokenized.tokens.len(), 1);
    }

    #[tokio::test]
    async fn failing_primary_uses_fallback() {
        let tokenized = tokenize_or_fallback(Some(&BrokenTokenizer), "桜が咲く").await;
        assert_eq!(tokenized.source, TokenSource::Fallback);
        assert_eq!(tokenized.tokens[0].surface, "桜が咲く");
    }

    #[tokio::test]
    async fn working_primary_passes_through() {
        let tokenized = tokenize_or_fallback(Some(&CannedTokenizer), "猫").await;
        assert_eq!(tokenized.source, TokenSource::Primary);
        assert_eq!(tokenized.tokens[0].reading, "ネコ");
    }
}
