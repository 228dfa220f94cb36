use serde::{Deserialize, Serialize};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("not configured: {0}")]
    Config(String),
    #[error("model call failed: {0}")]
    Model(String),
    #[error("store error: {0}")]
    Store(String),
    #[error("ingest failed: {0}")]
    Ingest(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Reading speed used to convert a minutes budget into a char budget.
pub const CHARS_PER_MINUTE: u32 = 180;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Token {
    pub surface: String,
    pub base: String,
    pub reading: String,
    pub part_of_speech: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TokenSource {
    Primary,
    Fallback,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenizedText {
    pub tokens: Vec<Token>,
    pub source: TokenSource,
}

/// One vocabulary item surfaced for a chunk. `surface` is always a verified
/// exact substring of the chunk text it was derived from.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct VocabRecord {
    pub surface: String,
    pub base: String,
    #[serde(default)]
    pub reading: String,
    #[serde(default)]
    pub hint: String,
    #[serde(default)]
    pub note_zh: String,
    #[serde(default)]
    pub anchor_before: String,
    #[serde(default)]
    pub anchor_after: String,
    /// Occurrences actually wrapped by the renderer; filled after rendering.
    #[serde(default)]
    pub match_count: u32,
}

/// One grammar item surfaced for a chunk. `id` is deterministic over
/// name/explanation/match/anchors, so re-ordered batches agree on it.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GrammarRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub explanation_zh: String,
    #[serde(default)]
    pub match_text: String,
    #[serde(default)]
    pub anchor_before: String,
    #[serde(default)]
    pub anchor_after: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SentenceRecord {
    pub sentence: String,
    #[serde(default)]
    pub translation_zh: String,
    #[serde(default)]
    pub structure: String,
    #[serde(default)]
    pub grammar_hints: Vec<String>,
    #[serde(default)]
    pub vocab_hints: Vec<String>,
}

/// Everything the renderer needs for one chunk, from either analysis path.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChunkAnalysis {
    pub words: Vec<VocabRecord>,
    pub patterns: Vec<GrammarRecord>,
    #[serde(default)]
    pub sentences: Vec<SentenceRecord>,
    #[serde(default)]
    pub translation_zh: String,
}

impl ChunkAnalysis {
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
            && self.patterns.is_empty()
            && self.sentences.is_empty()
            && self.translation_zh.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnownWordEntry {
    pub base: String,
    #[serde(default)]
    pub surface: String,
    #[serde(default)]
    pub reading: String,
    #[serde(default)]
    pub hint: String,
    /// Unix epoch seconds of the last upsert.
    pub updated_at: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnownGrammarEntry {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub explanation_zh: String,
    pub updated_at: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ReadingMode {
    /// Few, deeply-explained items per chunk.
    Intensive,
    /// More items, lighter touch.
    Extensive,
}

#[derive(Debug, Clone, Copy)]
pub struct ModeLimits {
    pub max_words: usize,
    pub max_patterns: usize,
}

impl ReadingMode {
    pub fn limits(&self) -> ModeLimits {
        match self {
            ReadingMode::Intensive => ModeLimits {
                max_words: 8,
                max_patterns: 3,
            },
            ReadingMode::Extensive => ModeLimits {
                max_words: 15,
                max_patterns: 6,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSettings {
    /// Reading-time budget per chunk, in minutes.
    pub chunk_minutes: u32,
    pub mode: ReadingMode,
    /// Free-form learner description interpolated into prompts.
    #[serde(default)]
    pub learner_profile: String,
    /// Overrides the built-in prompt template when set.
    #[serde(default)]
    pub prompt_template: Option<String>,
    /// Provider/model/tier labels; part of the analysis cache key.
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub tier: String,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            chunk_minutes: 10,
            mode: ReadingMode::Intensive,
            learner_profile: String::new(),
            prompt_template: None,
            provider: String::new(),
            model: String::new(),
            tier: String::new(),
        }
    }
}

impl SessionSettings {
    /// Char budget for chunk packing ("chunk window").
    pub fn target_chars(&self) -> usize {
        (self.chunk_minutes.max(1) * CHARS_PER_MINUTE) as usize
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ModelOptions {
    pub model: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRequest {
    pub prompt: String,
    #[serde(default)]
    pub options: ModelOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelResponse {
    pub text: String,
    pub usage_tokens: Option<u64>,
}

/// Morphological analyzer boundary. Implementations may fail (dictionary
/// load, remote service); callers degrade to the regex fallback tokenizer
/// rather than surfacing the error.
#[async_trait::async_trait]
pub trait Tokenizer: Send + Sync {
    fn name(&self) -> &'static str;
    async fn tokenize(&self, text: &str) -> Result<TokenizedText>;
}

/// LLM completion boundary. Errors are a single descriptive failure; a
/// backend never returns partial JSON.
#[async_trait::async_trait]
pub trait ModelBackend: Send + Sync {
    fn name(&self) -> &'static str;
    async fn complete(&self, req: &ModelRequest) -> Result<ModelResponse>;
}

/// Known-items persistence. Lists are most-recently-updated-first; upsert
/// and remove return the new list, deduplicated by key (`base` for words,
/// `id` for grammar).
pub trait KnownStore: Send + Sync {
    fn words(&self) -> Result<Vec<KnownWordEntry>>;
    fn upsert_word(&self, entry: KnownWordEntry) -> Result<Vec<KnownWordEntry>>;
    fn remove_word(&self, base: &str) -> Result<Vec<KnownWordEntry>>;
    fn grammar(&self) -> Result<Vec<KnownGrammarEntry>>;
    fn upsert_grammar(&self, entry: KnownGrammarEntry) -> Result<Vec<KnownGrammarEntry>>;
    fn remove_grammar(&self, id: &str) -> Result<Vec<KnownGrammarEntry>>;
}

/// What the persisted analysis cache keeps per chunk. Sentence analyses and
/// translations live only in the session memo.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CachedChunkAnalysis {
    pub words: Vec<VocabRecord>,
    pub patterns: Vec<GrammarRecord>,
    /// Unix epoch seconds of the write; the eviction order.
    pub updated_at: u64,
}

/// Model-analysis persistence keyed by the full cache key. Implementations
/// bound their size by evicting the oldest `updated_at` entries.
pub trait AnalysisCache: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<CachedChunkAnalysis>>;
    /// One write per batch; all entries land or the batch fails.
    fn put_all(&self, entries: &[(String, CachedChunkAnalysis)]) -> Result<()>;
}
