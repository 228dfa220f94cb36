//! JSON-file persistence: the known-item store and the analysis cache.
//!
//! Both are single JSON files written atomically (tmp file then rename).
//! The known store is user data, so unreadable JSON is a `Store` error
//! rather than a silent reset; the analysis cache is disposable and
//! reloads as empty instead.

use std::cmp::Reverse;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tadoku_core::{
    AnalysisCache, CachedChunkAnalysis, Error, KnownGrammarEntry, KnownStore, KnownWordEntry,
    Result,
};
use tracing::debug;

/// Entries kept in the persisted analysis cache, newest first.
const ANALYSIS_CACHE_CAP: usize = 500;

fn now_epoch_s() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_secs()
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".tmp");
    PathBuf::from(name)
}

fn write_json_file<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| Error::Store(e.to_string()))?;
    }
    let out = serde_json::to_vec_pretty(value).map_err(|e| Error::Store(e.to_string()))?;
    let tmp = tmp_path(path);
    fs::write(&tmp, out).map_err(|e| Error::Store(e.to_string()))?;
    fs::rename(&tmp, path).map_err(|e| Error::Store(e.to_string()))
}

/// Drops entries with a blank key and later duplicates of an earlier key.
fn dedupe_by_key<T>(entries: Vec<T>, key: impl Fn(&T) -> &str) -> Vec<T> {
    let mut seen = HashSet::new();
    entries
        .into_iter()
        .filter(|entry| {
            let k = key(entry).trim().to_string();
            !k.is_empty() && seen.insert(k)
        })
        .collect()
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct KnownFile {
    #[serde(default)]
    words: Vec<KnownWordEntry>,
    #[serde(default)]
    grammar: Vec<KnownGrammarEntry>,
}

/// Known words and grammar points in one JSON file, most-recently-updated
/// first.
pub struct JsonKnownStore {
    path: PathBuf,
    state: Mutex<KnownFile>,
}

impl JsonKnownStore {
    /// Opens the store at `path`. A missing file starts empty.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let state = match fs::read(&path) {
            Ok(bytes) => {
                let file: KnownFile = serde_json::from_slice(&bytes)
                    .map_err(|e| Error::Store(format!("{}: {e}", path.display())))?;
                KnownFile {
                    words: dedupe_by_key(file.words, |w| w.base.as_str()),
                    grammar: dedupe_by_key(file.grammar, |g| g.id.as_str()),
                }
            }
            Err(_) => KnownFile::default(),
        };
        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    fn mutate<R>(&self, apply: impl FnOnce(&mut KnownFile) -> R) -> Result<R> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| Error::Store("known store lock poisoned".to_string()))?;
        let out = apply(&mut state);
        write_json_file(&self.path, &*state)?;
        Ok(out)
    }
}

impl KnownStore for JsonKnownStore {
    fn words(&self) -> Result<Vec<KnownWordEntry>> {
        let state = self
            .state
            .lock()
            .map_err(|_| Error::Store("known store lock poisoned".to_string()))?;
        Ok(state.words.clone())
    }

    fn upsert_word(&self, entry: KnownWordEntry) -> Result<Vec<KnownWordEntry>> {
        if entry.base.trim().is_empty() {
            return self.words();
        }
        self.mutate(|file| {
            file.words.retain(|w| w.base != entry.base);
            let mut entry = entry;
            entry.updated_at = now_epoch_s();
            file.words.insert(0, entry);
            file.words.clone()
        })
    }

    fn remove_word(&self, base: &str) -> Result<Vec<KnownWordEntry>> {
        self.mutate(|file| {
            file.words.retain(|w| w.base != base);
            file.words.clone()
        })
    }

    fn grammar(&self) -> Result<Vec<KnownGrammarEntry>> {
        let state = self
            .state
            .lock()
            .map_err(|_| Error::Store("known store lock poisoned".to_string()))?;
        Ok(state.grammar.clone())
    }

    fn upsert_grammar(&self, entry: KnownGrammarEntry) -> Result<Vec<KnownGrammarEntry>> {
        if entry.id.trim().is_empty() {
            return self.grammar();
        }
        self.mutate(|file| {
            file.grammar.retain(|g| g.id != entry.id);
            let mut entry = entry;
            entry.updated_at = now_epoch_s();
            file.grammar.insert(0, entry);
            file.grammar.clone()
        })
    }

    fn remove_grammar(&self, id: &str) -> Result<Vec<KnownGrammarEntry>> {
        self.mutate(|file| {
            file.grammar.retain(|g| g.id != id);
            file.grammar.clone()
        })
    }
}

/// Model analyses keyed by the full cache key, trimmed to the newest
/// [`ANALYSIS_CACHE_CAP`] entries on every write.
pub struct JsonAnalysisCache {
    path: PathBuf,
    state: Mutex<HashMap<String, CachedChunkAnalysis>>,
}

impl JsonAnalysisCache {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let state = load_cache(&path).unwrap_or_default();
        Self {
            path,
            state: Mutex::new(state),
        }
    }
}

fn load_cache(path: &Path) -> Option<HashMap<String, CachedChunkAnalysis>> {
    let bytes = fs::read(path).ok()?;
    let mut map: HashMap<String, CachedChunkAnalysis> = serde_json::from_slice(&bytes).ok()?;
    trim_cache(&mut map);
    Some(map)
}

fn trim_cache(map: &mut HashMap<String, CachedChunkAnalysis>) {
    if map.len() <= ANALYSIS_CACHE_CAP {
        return;
    }
    let mut entries: Vec<(String, CachedChunkAnalysis)> = map.drain().collect();
    entries.sort_by_key(|(_, v)| Reverse(v.updated_at));
    entries.truncate(ANALYSIS_CACHE_CAP);
    map.extend(entries);
}

impl AnalysisCache for JsonAnalysisCache {
    fn get(&self, key: &str) -> Result<Option<CachedChunkAnalysis>> {
        let state = self
            .state
            .lock()
            .map_err(|_| Error::Store("analysis cache lock poisoned".to_string()))?;
        Ok(state.get(key).cloned())
    }

    fn put_all(&self, entries: &[(String, CachedChunkAnalysis)]) -> Result<()> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| Error::Store("analysis cache lock poisoned".to_string()))?;
        for (key, value) in entries {
            state.insert(key.clone(), value.clone());
        }
        trim_cache(&mut state);
        write_json_file(&self.path, &*state)?;
        debug!(
            written = entries.len(),
            total = state.len(),
            "analysis cache saved"
        );
        Ok(())
    }
}
