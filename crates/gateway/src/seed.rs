//! Corpus seeding
//!
//! Loads the JSONL chunk corpus and builds (or loads) the BM25 keyword
//! index on a background task. The task's state machine is observable via
//! `GET /seed-status`; until seeding completes the keyword side of hybrid
//! retrieval reports INDEX_UNAVAILABLE and retrieval degrades to the dense
//! side.

use serde::Serialize;
use sha2::{Digest, Sha256};
use smartrag_common::config::KeywordIndexConfig;
use smartrag_common::errors::{AppError, Result};
use smartrag_retrieval::{Bm25Index, CorpusChunk, KeywordSearcher, RetrievedChunk};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

/// Seeding phase, reported by /seed-status
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SeedPhase {
    Idle,
    Counting,
    InProgress,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct SeedSnapshot {
    pub state: SeedPhase,
    pub seeded: usize,
    pub total: usize,
    pub message: String,
}

/// Observable seeding state
pub struct SeedState {
    inner: Mutex<SeedSnapshot>,
}

impl SeedState {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(SeedSnapshot {
                state: SeedPhase::Idle,
                seeded: 0,
                total: 0,
                message: "seeding not started".to_string(),
            }),
        }
    }

    pub fn snapshot(&self) -> SeedSnapshot {
        self.inner.lock().expect("seed state lock").clone()
    }

    fn set(&self, state: SeedPhase, seeded: usize, total: usize, message: impl Into<String>) {
        let mut inner = self.inner.lock().expect("seed state lock");
        inner.state = state;
        inner.seeded = seeded;
        inner.total = total;
        inner.message = message.into();
    }
}

impl Default for SeedState {
    fn default() -> Self {
        Self::new()
    }
}

/// Keyword searcher that becomes available once seeding completes
#[derive(Default)]
pub struct SharedKeywordIndex {
    index: RwLock<Option<Arc<Bm25Index>>>,
}

impl SharedKeywordIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn install(&self, index: Arc<Bm25Index>) {
        *self.index.write().expect("keyword index lock") = Some(index);
    }

    pub fn is_ready(&self) -> bool {
        self.index.read().expect("keyword index lock").is_some()
    }
}

#[async_trait::async_trait]
impl KeywordSearcher for SharedKeywordIndex {
    async fn search(&self, query: &str, k: usize) -> Result<Vec<RetrievedChunk>> {
        let index = self
            .index
            .read()
            .expect("keyword index lock")
            .clone()
            .ok_or_else(|| AppError::IndexUnavailable {
                message: "keyword index not seeded yet".to_string(),
            })?;
        Ok(index.search_sync(query, k))
    }
}

/// Parse the JSONL corpus file, skipping malformed lines with a warning
fn parse_corpus(raw: &str) -> Vec<CorpusChunk> {
    let mut chunks = Vec::new();
    for (line_no, line) in raw.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<CorpusChunk>(line) {
            Ok(chunk) => chunks.push(chunk),
            Err(e) => {
                tracing::warn!(line = line_no + 1, error = %e, "Skipping malformed corpus line");
            }
        }
    }
    chunks
}

fn artifact_path(config: &KeywordIndexConfig) -> PathBuf {
    Path::new(&config.cache_dir).join("bm25_index.json")
}

/// Run seeding to completion, updating the observable state as it goes
pub async fn run_seed(
    config: KeywordIndexConfig,
    shared: Arc<SharedKeywordIndex>,
    state: Arc<SeedState>,
) {
    state.set(SeedPhase::Counting, 0, 0, "reading corpus file");

    let raw = match tokio::fs::read_to_string(&config.corpus_file).await {
        Ok(raw) => raw,
        Err(e) => {
            let message = format!("failed to read corpus file {}: {}", config.corpus_file, e);
            tracing::warn!(error = %e, path = %config.corpus_file, "Corpus file unavailable");
            state.set(SeedPhase::Failed, 0, 0, message);
            return;
        }
    };

    let fingerprint = hex::encode(Sha256::digest(raw.as_bytes()));
    let path = artifact_path(&config);

    // Parsing and index construction are CPU-bound; keep them off the
    // request threads
    let build = tokio::task::spawn_blocking({
        let state = state.clone();
        move || {
            let chunks = parse_corpus(&raw);
            let total = chunks.len();
            state.set(SeedPhase::InProgress, 0, total, "building keyword index");
            Bm25Index::load_or_build(&path, &chunks, &fingerprint).map(|index| (index, total))
        }
    })
    .await;

    match build {
        Ok(Ok((index, total))) => {
            let seeded = index.len();
            shared.install(Arc::new(index));
            state.set(
                SeedPhase::Completed,
                seeded,
                total,
                "keyword index ready",
            );
            tracing::info!(seeded, total, "Corpus seeding completed");
        }
        Ok(Err(e)) => {
            tracing::error!(error = %e, "Keyword index build failed");
            state.set(SeedPhase::Failed, 0, 0, format!("index build failed: {}", e));
        }
        Err(e) => {
            tracing::error!(error = %e, "Seeding task panicked");
            state.set(SeedPhase::Failed, 0, 0, "seeding task panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_corpus(dir: &Path) -> PathBuf {
        let path = dir.join("chunks.jsonl");
        let mut file = std::fs::File::create(&path).unwrap();
        for i in 0..3 {
            writeln!(
                file,
                r#"{{"id": "00000000-0000-0000-0000-00000000000{}", "source_path": "doc{}.txt", "ordinal": {}, "content": "jane austen wrote novels number {}", "scope": "system"}}"#,
                i + 1, i, i, i
            )
            .unwrap();
        }
        // One malformed line, which seeding must tolerate
        writeln!(file, "not json").unwrap();
        path
    }

    #[tokio::test]
    async fn test_seed_completes_and_installs_index() {
        let dir = tempfile::tempdir().unwrap();
        let corpus_file = write_corpus(dir.path());

        let config = KeywordIndexConfig {
            corpus_file: corpus_file.to_string_lossy().into_owned(),
            cache_dir: dir.path().join("cache").to_string_lossy().into_owned(),
        };
        let shared = Arc::new(SharedKeywordIndex::new());
        let state = Arc::new(SeedState::new());

        assert!(!shared.is_ready());
        run_seed(config, shared.clone(), state.clone()).await;

        let snapshot = state.snapshot();
        assert_eq!(snapshot.state, SeedPhase::Completed);
        assert_eq!(snapshot.seeded, 3);
        assert!(shared.is_ready());

        let hits = shared.search("jane austen", 2).await.unwrap();
        assert!(!hits.is_empty());
    }

    #[tokio::test]
    async fn test_seed_missing_corpus_fails_gracefully() {
        let dir = tempfile::tempdir().unwrap();
        let config = KeywordIndexConfig {
            corpus_file: dir.path().join("missing.jsonl").to_string_lossy().into_owned(),
            cache_dir: dir.path().to_string_lossy().into_owned(),
        };
        let shared = Arc::new(SharedKeywordIndex::new());
        let state = Arc::new(SeedState::new());

        run_seed(config, shared.clone(), state.clone()).await;

        assert_eq!(state.snapshot().state, SeedPhase::Failed);
        assert!(!shared.is_ready());
        // Searches report the index as unavailable
        let err = shared.search("query", 3).await.unwrap_err();
        assert_eq!(err.kind(), smartrag_common::ErrorKind::IndexUnavailable);
    }

    #[tokio::test]
    async fn test_unseeded_state_is_idle() {
        let state = SeedState::new();
        assert_eq!(state.snapshot().state, SeedPhase::Idle);
    }
}
