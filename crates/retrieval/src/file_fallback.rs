//! File-level fallback retrieval
//!
//! When the primary retrieval's top-1 score is weak, the source file of the
//! top-ranked chunk is re-read, windowed, and re-embedded with the fallback
//! model, then searched within. The fallback's vectors never reach the main
//! index; any failure returns the primary result unchanged.

use crate::{FallbackInfo, RetrievalResult, RetrievedChunk, Scope};
use smartrag_common::config::FileFallbackConfig;
use smartrag_common::embeddings::{cosine_similarity, Embedder};
use smartrag_common::errors::{AppError, Result};
use smartrag_common::metrics;
use smartrag_common::rerank::RerankClient;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

/// File-level fallback rescuer
pub struct FileLevelFallback {
    /// Fallback-model embedder; vectors stay local to this path
    embedder: Arc<dyn Embedder>,
    rerank: Option<Arc<RerankClient>>,
    config: FileFallbackConfig,
}

/// Token windows with overlap, returned as (window index, text)
fn window_tokens(text: &str, size: usize, overlap: usize) -> Vec<(usize, String)> {
    let tokens: Vec<&str> = text.split_whitespace().collect();
    if tokens.is_empty() {
        return Vec::new();
    }

    let stride = size.saturating_sub(overlap).max(1);
    let mut windows = Vec::new();
    let mut start = 0;
    let mut index = 0;

    while start < tokens.len() {
        let end = (start + size).min(tokens.len());
        windows.push((index, tokens[start..end].join(" ")));
        index += 1;
        if end == tokens.len() {
            break;
        }
        start += stride;
    }

    windows
}

impl FileLevelFallback {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        rerank: Option<Arc<RerankClient>>,
        config: FileFallbackConfig,
    ) -> Self {
        Self {
            embedder,
            rerank,
            config,
        }
    }

    /// Whether the primary result is weak enough to trigger the fallback
    pub fn should_trigger(&self, primary: &RetrievalResult) -> bool {
        self.config.enabled
            && !primary.is_empty()
            && primary.top1_score() < self.config.score_threshold
    }

    /// Rescue a weak primary result by searching within its top-1 source file
    ///
    /// Returns the primary result unchanged unless the trigger condition
    /// holds and the rescue succeeds end to end.
    pub async fn rescue(&self, question: &str, primary: RetrievalResult, k: usize) -> RetrievalResult {
        if !self.should_trigger(&primary) {
            return primary;
        }

        let top1 = &primary.chunks[0];
        let source_path = top1.source_path.clone();
        let scope = top1.scope;
        let start = Instant::now();

        match self.search_within_file(question, &source_path, scope, k).await {
            Ok(chunks) if !chunks.is_empty() => {
                let latency_ms = start.elapsed().as_millis() as u64;
                metrics::record_file_fallback();
                tracing::info!(
                    source_path = %source_path,
                    windows = chunks.len(),
                    latency_ms,
                    "File-level fallback replaced weak primary result"
                );
                RetrievalResult {
                    chunks,
                    fallback: Some(FallbackInfo { latency_ms }),
                }
            }
            Ok(_) => {
                tracing::warn!(source_path = %source_path, "File-level fallback found no windows");
                primary
            }
            Err(e) => {
                tracing::warn!(
                    source_path = %source_path,
                    error = %e,
                    "File-level fallback failed, keeping primary result"
                );
                primary
            }
        }
    }

    async fn search_within_file(
        &self,
        question: &str,
        source_path: &str,
        scope: Scope,
        k: usize,
    ) -> Result<Vec<RetrievedChunk>> {
        let path: PathBuf = [self.config.corpus_root.as_str(), source_path].iter().collect();
        let text = tokio::fs::read_to_string(&path).await.map_err(|e| AppError::Internal {
            message: format!("failed to read {}: {}", path.display(), e),
        })?;

        // Windowing a large file is the one CPU-heavy step on this path
        let size = self.config.chunk_size;
        let overlap = self.config.chunk_overlap;
        let windows = tokio::task::spawn_blocking(move || window_tokens(&text, size, overlap))
            .await
            .map_err(|e| AppError::Internal {
                message: format!("window task failed: {}", e),
            })?;

        if windows.is_empty() {
            return Ok(Vec::new());
        }

        let texts: Vec<String> = windows.iter().map(|(_, w)| w.clone()).collect();
        let query_vector = self.embedder.embed(question).await?;
        let window_vectors = self.embedder.embed_batch(&texts).await?;

        let mut scored: Vec<(f32, usize)> = window_vectors
            .iter()
            .enumerate()
            .map(|(i, v)| (cosine_similarity(&query_vector, v), i))
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
        scored.truncate(k.max(1) * 2);

        let mut chunks: Vec<RetrievedChunk> = scored
            .into_iter()
            .map(|(score, i)| RetrievedChunk {
                chunk_id: Uuid::new_v4(),
                source_path: source_path.to_string(),
                ordinal: windows[i].0 as i32,
                content: windows[i].1.clone(),
                score,
                scope,
            })
            .collect();

        if let Some(rerank) = &self.rerank {
            let passages: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
            let scores = rerank.rerank(question, &passages).await;
            let mut rescored: Vec<(f32, RetrievedChunk)> =
                scores.into_iter().zip(chunks).collect();
            rescored.sort_by(|a, b| a.0.total_cmp(&b.0).reverse());
            chunks = rescored
                .into_iter()
                .map(|(score, mut chunk)| {
                    chunk.score = score.clamp(0.0, 1.0);
                    chunk
                })
                .collect();
        }

        chunks.truncate(k);
        Ok(chunks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::chunk;
    use smartrag_common::embeddings::HashEmbedder;
    use std::io::Write;

    fn config(root: &str) -> FileFallbackConfig {
        FileFallbackConfig {
            enabled: true,
            score_threshold: 0.65,
            chunk_size: 8,
            chunk_overlap: 2,
            corpus_root: root.to_string(),
        }
    }

    fn fallback(root: &str) -> FileLevelFallback {
        FileLevelFallback::new(Arc::new(HashEmbedder::new("fallback", 64)), None, config(root))
    }

    #[test]
    fn test_window_tokens_overlap() {
        let text = "one two three four five six seven eight nine ten";
        let windows = window_tokens(text, 4, 1);

        assert_eq!(windows[0].1, "one two three four");
        assert_eq!(windows[1].1, "four five six seven");
        assert!(windows.last().unwrap().1.ends_with("ten"));
    }

    #[test]
    fn test_window_tokens_short_text() {
        let windows = window_tokens("just three words", 500, 50);
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].1, "just three words");
        assert!(window_tokens("", 500, 50).is_empty());
    }

    #[test]
    fn test_trigger_requires_weak_top1() {
        let fb = fallback("/nonexistent");

        let weak = RetrievalResult::new(vec![chunk(1, "a.txt", 0.4)]);
        assert!(fb.should_trigger(&weak));

        let strong = RetrievalResult::new(vec![chunk(1, "a.txt", 0.8)]);
        assert!(!fb.should_trigger(&strong));

        assert!(!fb.should_trigger(&RetrievalResult::default()));
    }

    #[tokio::test]
    async fn test_failure_returns_primary_unchanged() {
        let fb = fallback("/nonexistent-root");
        let primary = RetrievalResult::new(vec![chunk(1, "missing.txt", 0.2)]);

        let rescued = fb.rescue("question", primary.clone(), 4).await;
        assert!(rescued.fallback.is_none());
        assert_eq!(rescued.chunks.len(), primary.chunks.len());
        assert_eq!(rescued.chunks[0].chunk_id, primary.chunks[0].chunk_id);
    }

    #[tokio::test]
    async fn test_rescue_windows_come_from_top1_source() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("doc.txt");
        let mut file = std::fs::File::create(&file_path).unwrap();
        writeln!(
            file,
            "sir roberts fortune is a novel about inheritance \
             the roles and relationships within the estate drive the plot \
             minor characters orbit the fortune itself"
        )
        .unwrap();

        let fb = fallback(dir.path().to_str().unwrap());
        let primary = RetrievalResult::new(vec![chunk(1, "doc.txt", 0.3)]);

        let rescued = fb.rescue("roles and relationships in the novel", primary, 3).await;

        let info = rescued.fallback.expect("fallback should have triggered");
        assert!(rescued.chunks.len() <= 3);
        assert!(!rescued.chunks.is_empty());
        for window in &rescued.chunks {
            assert_eq!(window.source_path, "doc.txt");
        }
        for pair in rescued.chunks.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
        // latency_ms is best-effort; just confirm the field is present
        let _ = info.latency_ms;
    }
}
