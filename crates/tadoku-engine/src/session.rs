//! Reading-session orchestration.
//!
//! A `ReaderSession` owns one segmented page: the tree, its units and
//! chunks, the current position, and the per-chunk analysis caches.
//! Collaborators (tokenizer, model backend, known-item store, persisted
//! analysis cache) are injected; everything downstream is computed on
//! demand and memoized. Async analysis is guarded by a render generation
//! so that results arriving after a newer render are discarded.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use ego_tree::NodeId;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::analysis::{self, RawTokenEntry};
use crate::grammar;
use crate::highlight::{self, HighlightOptions};
use crate::hints;
use crate::page::PageTree;
use crate::prompt;
use crate::scoring;
use crate::segment::{self, Chunk, Unit};
use crate::tokenizer::tokenize_or_fallback;
use tadoku_core::{
    AnalysisCache, CachedChunkAnalysis, ChunkAnalysis, Error, GrammarRecord, KnownGrammarEntry,
    KnownStore, KnownWordEntry, ModelBackend, ModelOptions, ModelRequest, Result, SentenceRecord,
    SessionSettings, TokenSource, Tokenizer, VocabRecord,
};

/// Raw-token rows kept per report.
const MAX_RAW_TOKENS: usize = 400;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisMode {
    /// Tokenize locally and rank with the built-in scorer.
    Local,
    /// Ask the model backend, verified through the normalizer.
    Model,
}

/// One chunk's analysis plus presentation extras, from either path.
/// `source` names where the records came from: the tokenizer, `fallback`,
/// `llm-{provider}`, or `llm-{provider}-pending` when nothing is cached yet.
#[derive(Debug, Clone, Serialize)]
pub struct ChunkReport {
    pub source: String,
    pub words: Vec<VocabRecord>,
    pub patterns: Vec<GrammarRecord>,
    pub sentences: Vec<SentenceRecord>,
    pub translation_zh: String,
    pub raw_tokens: Vec<RawTokenEntry>,
}

impl ChunkReport {
    fn empty(source: String) -> Self {
        Self {
            source,
            words: Vec::new(),
            patterns: Vec::new(),
            sentences: Vec::new(),
            translation_zh: String::new(),
            raw_tokens: Vec::new(),
        }
    }
}

#[derive(Clone)]
struct CachedTokens {
    tokens: Vec<tadoku_core::Token>,
    source: String,
}

type SharedOutcome = std::result::Result<ChunkAnalysis, Arc<Error>>;

fn clone_error(err: &Error) -> Error {
    match err {
        Error::Config(m) => Error::Config(m.clone()),
        Error::Model(m) => Error::Model(m.clone()),
        Error::Store(m) => Error::Store(m.clone()),
        Error::Ingest(m) => Error::Ingest(m.clone()),
    }
}

fn now_epoch_s() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_secs()
}

pub struct ReaderSession {
    page: PageTree,
    units: Vec<Unit>,
    chunks: Vec<Chunk>,
    current_index: usize,
    settings: SessionSettings,
    page_key: String,
    analysis_mode: AnalysisMode,
    raw_tokens_mode: bool,
    tokenizer: Option<Arc<dyn Tokenizer>>,
    model: Option<Arc<dyn ModelBackend>>,
    store: Option<Arc<dyn KnownStore>>,
    analysis_cache: Option<Arc<dyn AnalysisCache>>,
    known_bases: HashSet<String>,
    known_grammar_ids: HashSet<String>,
    token_cache: Mutex<HashMap<String, CachedTokens>>,
    memo: Mutex<HashMap<String, ChunkAnalysis>>,
    inflight: Mutex<HashMap<String, Arc<OnceCell<SharedOutcome>>>>,
    render_generation: AtomicU64,
}

impl ReaderSession {
    /// Parse, segment, and pack a page. Degenerate inputs produce a session
    /// with zero chunks rather than an error.
    pub fn new(html: &str, page_url: &str, settings: SessionSettings) -> Self {
        let mut page = PageTree::parse(html);
        let units = segment::segment_page(&mut page);
        let chunks = segment::pack_chunks(&units, settings.target_chars());
        debug!(
            units = units.len(),
            chunks = chunks.len(),
            target_chars = settings.target_chars(),
            "session opened"
        );
        Self {
            page,
            units,
            chunks,
            current_index: 0,
            page_key: prompt::page_key(page_url),
            settings,
            analysis_mode: AnalysisMode::Local,
            raw_tokens_mode: false,
            tokenizer: None,
            model: None,
            store: None,
            analysis_cache: None,
            known_bases: HashSet::new(),
            known_grammar_ids: HashSet::new(),
            token_cache: Mutex::new(HashMap::new()),
            memo: Mutex::new(HashMap::new()),
            inflight: Mutex::new(HashMap::new()),
            render_generation: AtomicU64::new(0),
        }
    }

    pub fn with_tokenizer(mut self, tokenizer: Arc<dyn Tokenizer>) -> Self {
        self.tokenizer = Some(tokenizer);
        self
    }

    pub fn with_model(mut self, model: Arc<dyn ModelBackend>) -> Self {
        self.model = Some(model);
        self
    }

    /// Attach the known-item store and seed the known sets from it.
    pub fn with_known_store(mut self, store: Arc<dyn KnownStore>) -> Result<Self> {
        self.known_bases = store.words()?.into_iter().map(|w| w.base).collect();
        self.known_grammar_ids = store.grammar()?.into_iter().map(|g| g.id).collect();
        self.store = Some(store);
        Ok(self)
    }

    pub fn with_analysis_cache(mut self, cache: Arc<dyn AnalysisCache>) -> Self {
        self.analysis_cache = Some(cache);
        self
    }

    pub fn units(&self) -> &[Unit] {
        &self.units
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn page(&self) -> &PageTree {
        &self.page
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    pub fn current_chunk(&self) -> Option<&Chunk> {
        self.chunks.get(self.current_index)
    }

    pub fn analysis_mode(&self) -> AnalysisMode {
        self.analysis_mode
    }

    pub fn set_analysis_mode(&mut self, mode: AnalysisMode) {
        self.analysis_mode = mode;
    }

    pub fn raw_tokens_mode(&self) -> bool {
        self.raw_tokens_mode
    }

    pub fn set_raw_tokens_mode(&mut self, on: bool) {
        self.raw_tokens_mode = on;
    }

    /// Replace the settings. A changed chunk window repacks and re-anchors
    /// the view to the unit the reader was on.
    pub fn set_settings(&mut self, settings: SessionSettings) {
        let repack = settings.chunk_minutes != self.settings.chunk_minutes;
        let anchor_unit = self.current_chunk().map(|c| c.start_unit).unwrap_or(0);
        self.settings = settings;
        if repack {
            self.repack(anchor_unit);
        }
    }

    pub fn set_chunk_minutes(&mut self, minutes: u32) {
        let mut settings = self.settings.clone();
        settings.chunk_minutes = minutes;
        self.set_settings(settings);
    }

    fn repack(&mut self, anchor_unit: usize) {
        self.chunks = segment::pack_chunks(&self.units, self.settings.target_chars());
        if self.chunks.is_empty() {
            self.current_index = 0;
            return;
        }
        self.current_index = segment::chunk_index_for_unit(&self.chunks, anchor_unit)
            .unwrap_or_else(|| self.current_index.min(self.chunks.len() - 1));
        debug!(
            chunks = self.chunks.len(),
            index = self.current_index,
            "repacked"
        );
    }

    /// Clamped relative move; returns the new index.
    pub fn step_chunk(&mut self, step: isize) -> usize {
        if self.chunks.is_empty() {
            return 0;
        }
        let last = self.chunks.len() as isize - 1;
        let next = (self.current_index as isize + step).clamp(0, last);
        self.current_index = next as usize;
        self.current_index
    }

    pub fn go_to_chunk(&mut self, index: usize) -> usize {
        if !self.chunks.is_empty() {
            self.current_index = index.min(self.chunks.len() - 1);
        }
        self.current_index
    }

    pub fn mark_word_known(&mut self, entry: KnownWordEntry) -> Result<()> {
        match &self.store {
            Some(store) => {
                let list = store.upsert_word(entry)?;
                self.known_bases = list.into_iter().map(|w| w.base).collect();
            }
            None => {
                self.known_bases.insert(entry.base);
            }
        }
        Ok(())
    }

    pub fn unmark_word_known(&mut self, base: &str) -> Result<()> {
        match &self.store {
            Some(store) => {
                let list = store.remove_word(base)?;
                self.known_bases = list.into_iter().map(|w| w.base).collect();
            }
            None => {
                self.known_bases.remove(base);
            }
        }
        Ok(())
    }

    pub fn mark_grammar_known(&mut self, entry: KnownGrammarEntry) -> Result<()> {
        match &self.store {
            Some(store) => {
                let list = store.upsert_grammar(entry)?;
                self.known_grammar_ids = list.into_iter().map(|g| g.id).collect();
            }
            None => {
                self.known_grammar_ids.insert(entry.id);
            }
        }
        Ok(())
    }

    pub fn unmark_grammar_known(&mut self, id: &str) -> Result<()> {
        match &self.store {
            Some(store) => {
                let list = store.remove_grammar(id)?;
                self.known_grammar_ids = list.into_iter().map(|g| g.id).collect();
            }
            None => {
                self.known_grammar_ids.remove(id);
            }
        }
        Ok(())
    }

    // ---- analysis ----

    /// Analysis for one chunk under the active mode. In model mode this is
    /// a cache/memo lookup only; a cold miss reports `-pending` and empty
    /// records. Use [`request_model_analysis`](Self::request_model_analysis)
    /// to actually call the backend.
    pub async fn analyze_chunk(&self, chunk: &Chunk) -> Result<ChunkReport> {
        if !self.raw_tokens_mode && self.analysis_mode == AnalysisMode::Model {
            return Ok(self.peek_model(chunk));
        }
        Ok(self.local_report(chunk).await)
    }

    async fn local_report(&self, chunk: &Chunk) -> ChunkReport {
        let limits = self.settings.mode.limits();
        let cached = self.tokens_for(chunk).await;
        let mut raw_tokens = analysis::raw_token_entries(&cached.tokens);

        if self.raw_tokens_mode {
            let words = analysis::raw_highlight_words(&raw_tokens);
            raw_tokens.truncate(MAX_RAW_TOKENS);
            return ChunkReport {
                source: cached.source,
                words,
                patterns: Vec::new(),
                sentences: Vec::new(),
                translation_zh: String::new(),
                raw_tokens,
            };
        }
        raw_tokens.truncate(MAX_RAW_TOKENS);

        let words: Vec<VocabRecord> =
            scoring::score_vocabulary_tokens(&cached.tokens, &self.known_bases, limits.max_words)
                .into_iter()
                .map(|w| VocabRecord {
                    hint: hints::hint_for(&w.base).to_string(),
                    surface: w.surface,
                    base: w.base,
                    reading: w.reading,
                    ..VocabRecord::default()
                })
                .collect();

        let top_k = limits.max_patterns + self.known_grammar_ids.len();
        let mut patterns: Vec<GrammarRecord> = grammar::detect_grammar_patterns(&chunk.text, top_k)
            .into_iter()
            .filter(|hit| !self.known_grammar_ids.contains(hit.id))
            .map(|hit| GrammarRecord {
                id: hit.id.to_string(),
                name: hit.name.to_string(),
                explanation_zh: hit.explanation_zh.to_string(),
                match_text: hit.match_text,
                anchor_before: String::new(),
                anchor_after: String::new(),
            })
            .collect();
        patterns.truncate(limits.max_patterns);

        ChunkReport {
            source: cached.source,
            words,
            patterns,
            sentences: Vec::new(),
            translation_zh: String::new(),
            raw_tokens,
        }
    }

    async fn tokens_for(&self, chunk: &Chunk) -> CachedTokens {
        if let Ok(cache) = self.token_cache.lock() {
            if let Some(hit) = cache.get(&chunk.id) {
                return hit.clone();
            }
        }
        let tokenized = tokenize_or_fallback(self.tokenizer.as_deref(), &chunk.text).await;
        let source = match tokenized.source {
            TokenSource::Primary => self
                .tokenizer
                .as_ref()
                .map(|t| t.name())
                .unwrap_or("fallback")
                .to_string(),
            TokenSource::Fallback => "fallback".to_string(),
        };
        let entry = CachedTokens {
            tokens: tokenized.tokens,
            source,
        };
        if let Ok(mut cache) = self.token_cache.lock() {
            cache.insert(chunk.id.clone(), entry.clone());
        }
        entry
    }

    fn model_source(&self) -> String {
        format!("llm-{}", self.settings.provider)
    }

    fn model_report_from(&self, analysis: ChunkAnalysis) -> ChunkReport {
        ChunkReport {
            source: self.model_source(),
            words: analysis.words,
            patterns: analysis.patterns,
            sentences: analysis.sentences,
            translation_zh: analysis.translation_zh,
            raw_tokens: Vec::new(),
        }
    }

    fn peek_model(&self, chunk: &Chunk) -> ChunkReport {
        let key = prompt::analysis_cache_key(&self.page_key, chunk, &self.settings);
        match self.cached_model_analysis(&key) {
            Some(hit) => {
                debug!(
                    chunk = %chunk.id,
                    words = hit.words.len(),
                    patterns = hit.patterns.len(),
                    "analysis cache hit"
                );
                self.model_report_from(hit)
            }
            None => {
                debug!(chunk = %chunk.id, "analysis cache miss");
                ChunkReport::empty(format!("{}-pending", self.model_source()))
            }
        }
    }

    /// Runtime memo first, then the persisted cache. A persisted hit is
    /// promoted into the memo.
    fn cached_model_analysis(&self, key: &str) -> Option<ChunkAnalysis> {
        if let Ok(memo) = self.memo.lock() {
            if let Some(hit) = memo.get(key) {
                return Some(hit.clone());
            }
        }
        let cache = self.analysis_cache.as_ref()?;
        match cache.get(key) {
            Ok(Some(entry)) => {
                let analysis = ChunkAnalysis {
                    words: entry.words,
                    patterns: entry.patterns,
                    sentences: Vec::new(),
                    translation_zh: String::new(),
                };
                if let Ok(mut memo) = self.memo.lock() {
                    memo.insert(key.to_string(), analysis.clone());
                }
                Some(analysis)
            }
            Ok(None) => None,
            Err(err) => {
                warn!(error = %err, "analysis cache read failed");
                None
            }
        }
    }

    /// Fetch model analysis for `chunk`, batching forward chunks into the
    /// same request. Concurrent calls for the same cache key share one
    /// backend request; every requested chunk's records are cached, so
    /// following chunks come back for free.
    pub async fn request_model_analysis(&self, chunk: &Chunk) -> Result<ChunkReport> {
        let key = prompt::analysis_cache_key(&self.page_key, chunk, &self.settings);
        if let Some(hit) = self.cached_model_analysis(&key) {
            debug!(
                chunk = %chunk.id,
                words = hit.words.len(),
                patterns = hit.patterns.len(),
                "analysis cache hit"
            );
            return Ok(self.model_report_from(hit));
        }

        let cell = match self.inflight.lock() {
            Ok(mut map) => map
                .entry(key.clone())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone(),
            Err(_) => Arc::new(OnceCell::new()),
        };
        let outcome = cell
            .get_or_init(|| async {
                self.run_batch_request(chunk, &key).await.map_err(Arc::new)
            })
            .await
            .clone();
        if let Ok(mut map) = self.inflight.lock() {
            map.remove(&key);
        }

        match outcome {
            Ok(analysis) => Ok(self.model_report_from(analysis)),
            Err(err) => Err(clone_error(&err)),
        }
    }

    async fn run_batch_request(&self, target: &Chunk, target_key: &str) -> Result<ChunkAnalysis> {
        let Some(model) = self.model.as_ref() else {
            return Err(Error::Config("no model backend configured".to_string()));
        };

        let batch: Vec<Chunk> = match self.chunks.iter().position(|c| c.id == target.id) {
            Some(index) => prompt::select_batch(&self.chunks, index).to_vec(),
            None => vec![target.clone()],
        };
        let pending: Vec<Chunk> = batch
            .iter()
            .filter(|c| {
                let k = prompt::analysis_cache_key(&self.page_key, c, &self.settings);
                self.cached_model_analysis(&k).is_none()
            })
            .cloned()
            .collect();
        let requested = if pending.is_empty() {
            vec![target.clone()]
        } else {
            pending
        };

        let rows: Vec<&Chunk> = requested.iter().collect();
        let payload = prompt::batch_payload(&rows)?;
        let template = prompt::effective_template(self.settings.prompt_template.as_deref());
        let profile = prompt::effective_learner_profile(&self.settings.learner_profile);
        let built = prompt::build_prompt(template, &payload, profile)?;
        debug!(
            chunks = requested.len(),
            prompt_chars = built.chars().count(),
            provider = %self.settings.provider,
            "model batch request"
        );

        let response = model
            .complete(&ModelRequest {
                prompt: built,
                options: ModelOptions {
                    model: self.settings.model.clone(),
                    temperature: None,
                    max_tokens: None,
                },
            })
            .await?;
        if let Some(tokens) = response.usage_tokens {
            debug!(tokens = tokens, "model usage");
        }

        let mut by_id = analysis::normalize_batch_payload(&response.text, &requested);
        let now = now_epoch_s();
        let mut persisted: Vec<(String, CachedChunkAnalysis)> = Vec::new();
        for c in &requested {
            let entry = by_id.remove(&c.id).unwrap_or_default();
            let k = prompt::analysis_cache_key(&self.page_key, c, &self.settings);
            persisted.push((
                k.clone(),
                CachedChunkAnalysis {
                    words: entry.words.clone(),
                    patterns: entry.patterns.clone(),
                    updated_at: now,
                },
            ));
            if let Ok(mut memo) = self.memo.lock() {
                memo.insert(k, entry);
            }
        }
        if let Some(cache) = self.analysis_cache.as_ref() {
            if let Err(err) = cache.put_all(&persisted) {
                warn!(error = %err, "analysis cache write failed");
            }
        }

        Ok(self.cached_model_analysis(target_key).unwrap_or_default())
    }

    // ---- rendering ----

    /// Bump the render generation; the returned token identifies this
    /// render until a newer one starts.
    pub fn begin_render(&self) -> u64 {
        self.render_generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn is_current_render(&self, generation: u64) -> bool {
        self.render_generation.load(Ordering::SeqCst) == generation
    }

    /// Analyze the current chunk and apply its highlights. Returns `None`
    /// when the session has no chunks, or when a newer render started while
    /// the analysis was awaited (the stale result is discarded unapplied).
    pub async fn render_current(&mut self) -> Result<Option<ChunkReport>> {
        if self.chunks.is_empty() {
            return Ok(None);
        }
        let chunk = self.chunks[self.current_index].clone();
        let generation = self.begin_render();
        let mut report = self.analyze_chunk(&chunk).await?;
        if !self.is_current_render(generation) {
            debug!(chunk = %chunk.id, generation = generation, "stale render discarded");
            return Ok(None);
        }
        self.apply_highlights(self.current_index, &mut report);
        Ok(Some(report))
    }

    /// Clear old spans over the chunk, then wrap this report's records.
    /// Word records get `match_count` filled in; raw-token mode highlights
    /// each surface once and records nothing.
    pub fn apply_highlights(&mut self, chunk_index: usize, report: &mut ChunkReport) {
        let Some(chunk) = self.chunks.get(chunk_index) else {
            return;
        };
        let nodes = chunk.nodes.clone();
        for &node in &nodes {
            highlight::clear_highlights(&mut self.page, node);
        }

        if self.raw_tokens_mode {
            for word in &report.words {
                let opts = HighlightOptions::word(word, 1);
                Self::highlight_literal_across(&mut self.page, &nodes, &word.surface, &opts);
            }
            return;
        }

        if self.analysis_mode == AnalysisMode::Model {
            for word in &mut report.words {
                let mut matches = {
                    let opts = HighlightOptions::word(word, 1);
                    Self::highlight_by_context_across(
                        &mut self.page,
                        &nodes,
                        &word.surface,
                        &word.anchor_before,
                        &word.anchor_after,
                        &opts,
                    )
                };
                if matches == 0 && !word.base.is_empty() && word.base != word.surface {
                    let opts = HighlightOptions::word(word, 1);
                    matches = Self::highlight_literal_across(
                        &mut self.page,
                        &nodes,
                        &word.base,
                        &opts,
                    );
                }
                word.match_count = matches as u32;
            }
            for pattern in &report.patterns {
                if pattern.match_text.is_empty() {
                    continue;
                }
                let opts = HighlightOptions::pattern(pattern, 1);
                Self::highlight_by_context_across(
                    &mut self.page,
                    &nodes,
                    &pattern.match_text,
                    &pattern.anchor_before,
                    &pattern.anchor_after,
                    &opts,
                );
            }
            return;
        }

        for word in &mut report.words {
            let mut matches = {
                let opts = HighlightOptions::word(word, 2);
                Self::highlight_literal_across(&mut self.page, &nodes, &word.surface, &opts)
            };
            if matches == 0 && word.base != word.surface {
                let opts = HighlightOptions::word(word, 2);
                matches =
                    Self::highlight_literal_across(&mut self.page, &nodes, &word.base, &opts);
            }
            word.match_count = matches as u32;
        }
        for pattern in &report.patterns {
            if pattern.match_text.is_empty() {
                continue;
            }
            let opts = HighlightOptions::pattern(pattern, 1);
            Self::highlight_literal_across(&mut self.page, &nodes, &pattern.match_text, &opts);
        }
    }

    /// The `max_matches` budget spans every node of the chunk.
    fn highlight_literal_across(
        page: &mut PageTree,
        nodes: &[NodeId],
        literal: &str,
        opts: &HighlightOptions,
    ) -> usize {
        let mut remaining = opts.max_matches;
        let mut total = 0usize;
        for &node in nodes {
            if remaining == 0 {
                break;
            }
            let mut scoped = opts.clone();
            scoped.max_matches = remaining;
            let n = highlight::highlight_literal(page, node, literal, &scoped);
            total += n;
            remaining = remaining.saturating_sub(n);
        }
        total
    }

    fn highlight_by_context_across(
        page: &mut PageTree,
        nodes: &[NodeId],
        literal: &str,
        before: &str,
        after: &str,
        opts: &HighlightOptions,
    ) -> usize {
        let mut remaining = opts.max_matches;
        let mut total = 0usize;
        for &node in nodes {
            if remaining == 0 {
                break;
            }
            let mut scoped = opts.clone();
            scoped.max_matches = remaining;
            let n = highlight::highlight_by_context(page, node, literal, before, after, &scoped);
            total += n;
            remaining = remaining.saturating_sub(n);
        }
        total
    }
}
