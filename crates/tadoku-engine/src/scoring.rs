//! Vocabulary ranking over tokenized text.
//!
//! Filters out structural tokens, scores the survivors by novelty and
//! shape, keeps the best representative per base form, and returns the
//! top N as highlight candidates.

use std::collections::{HashMap, HashSet};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use tadoku_core::Token;

static JP_PUNCT_OR_SYMBOL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[\s。、！？・「」『』（）【】〈〉《》〔〕…―〜♪，．]+$").unwrap()
});
static NUMERIC_ONLY: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9０-９]+$").unwrap());
static KANJI: Lazy<Regex> = Lazy::new(|| Regex::new(r"[一-龯々]").unwrap());

/// Function words that are a waste of a highlight. Mostly particles,
/// light verbs, formal nouns, and discourse glue.
pub const STOPWORDS: &[&str] = &[
    "する", "なる", "ある", "いる", "やる", "できる", "くる", "来る", "行く",
    "いう", "言う", "思う", "おもう", "見える", "おる", "ござる", "いたす",
    "こと", "もの", "ところ", "ため", "よう", "ほう", "はず", "わけ",
    "つもり", "とき", "とおり", "まま", "うち", "あいだ",
    "これ", "それ", "あれ", "どれ", "この", "その", "あの", "どの",
    "ここ", "そこ", "あそこ", "どこ", "こちら", "そちら", "あちら", "どちら",
    "こう", "そう", "ああ", "どう", "こんな", "そんな", "あんな", "どんな",
    "わたし", "あなた", "かれ", "かのじょ", "じぶん", "みんな", "みなさん",
    "です", "ます", "だ", "である", "ない", "れる", "られる", "せる", "させる",
    "そして", "しかし", "でも", "だから", "だが", "また", "まだ", "もう",
    "とても", "すごく", "ちょっと", "たくさん", "いろいろ", "いつも",
    "やはり", "やっぱり", "きっと", "ぜひ", "もちろん", "たぶん",
    "なに", "なん", "だれ", "いつ", "なぜ",
    "から", "まで", "など", "だけ", "ほど", "ぐらい", "くらい", "ながら",
];

static STOPWORD_SET: Lazy<HashSet<&'static str>> =
    Lazy::new(|| STOPWORDS.iter().copied().collect());

pub fn is_stopword(word: &str) -> bool {
    STOPWORD_SET.contains(word)
}

/// True when `text` is nothing but whitespace and Japanese punctuation.
pub(crate) fn is_punct_or_symbol(text: &str) -> bool {
    JP_PUNCT_OR_SYMBOL.is_match(text)
}

/// A token that survived filtering, with its rank inputs attached.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredWord {
    pub surface: String,
    pub base: String,
    pub reading: String,
    pub pos: String,
    pub frequency: u32,
    pub score: i32,
}

fn normalize_surface(token: &Token) -> &str {
    token.surface.trim()
}

fn normalize_base(token: &Token) -> &str {
    let base = token.base.trim();
    if base.is_empty() || base == "*" {
        normalize_surface(token)
    } else {
        base
    }
}

fn normalize_reading(token: &Token) -> &str {
    if token.reading == "*" {
        ""
    } else {
        token.reading.trim()
    }
}

fn should_ignore(token: &Token) -> bool {
    let surface = normalize_surface(token);
    let base = normalize_base(token);
    let pos = token.part_of_speech.as_str();

    if surface.is_empty() || base.is_empty() {
        return true;
    }
    if NUMERIC_ONLY.is_match(surface) || NUMERIC_ONLY.is_match(base) {
        return true;
    }
    if JP_PUNCT_OR_SYMBOL.is_match(surface) {
        return true;
    }
    if pos == "記号" {
        return true;
    }
    if surface.chars().count() == 1 && (pos == "助詞" || pos == "助動詞") {
        return true;
    }
    false
}

fn score_token(token: &Token, frequency: u32, known_bases: &HashSet<String>) -> ScoredWord {
    let surface = normalize_surface(token);
    let base = normalize_base(token);

    let mut score = 0i32;
    if !known_bases.contains(base) {
        score += 3;
    }
    if KANJI.is_match(surface) && surface.chars().count() >= 2 {
        score += 2;
    }
    if frequency >= 2 {
        score += 1;
    }
    if is_stopword(base) || is_stopword(surface) {
        score -= 3;
    }

    ScoredWord {
        surface: surface.to_string(),
        base: base.to_string(),
        reading: normalize_reading(token).to_string(),
        pos: token.part_of_speech.clone(),
        frequency,
        score,
    }
}

/// Ranks tokens for highlighting and returns at most `max_words`.
///
/// Known words are scored like any other token (they lose the novelty
/// bonus but stay visible when strong on other axes).
pub fn score_vocabulary_tokens(
    tokens: &[Token],
    known_bases: &HashSet<String>,
    max_words: usize,
) -> Vec<ScoredWord> {
    let mut freq_by_base: HashMap<&str, u32> = HashMap::new();
    let mut filtered = Vec::new();
    for token in tokens {
        if should_ignore(token) {
            continue;
        }
        *freq_by_base.entry(normalize_base(token)).or_insert(0) += 1;
        filtered.push(token);
    }

    let mut best_by_base: HashMap<&str, ScoredWord> = HashMap::new();
    for token in filtered {
        let base = normalize_base(token);
        let frequency = freq_by_base.get(base).copied().unwrap_or(1);
        let scored = score_token(token, frequency, known_bases);
        if scored.score <= 0 {
            continue;
        }
        match best_by_base.get(base) {
            Some(prev) if scored.score <= prev.score && scored.frequency <= prev.frequency => {}
            _ => {
                best_by_base.insert(base, scored);
            }
        }
    }

    let mut ranked: Vec<ScoredWord> = best_by_base.into_values().collect();
    ranked.sort_by(|a, b| {
        b.score
            .cmp(&a.score)
            .then(b.frequency.cmp(&a.frequency))
            .then(b.surface.chars().count().cmp(&a.surface.chars().count()))
    });
    ranked.truncate(max_words);
    ranked
}
