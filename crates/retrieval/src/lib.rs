//! Multi-modal retrieval system
//!
//! Provides the retrieval building blocks of the ask pipeline:
//! - Vector search against an external ANN index (semantic similarity)
//! - BM25 keyword search over a persistent on-disk index (lexical matching)
//! - Hybrid fusion of both (weighted min-max or RRF)
//! - File-level fallback re-embedding for weak top-1 matches

mod bm25;
mod file_fallback;
mod fusion;
mod hybrid;
mod vector;

pub use bm25::Bm25Index;
pub use file_fallback::FileLevelFallback;
pub use fusion::{fuse, FusionMode};
pub use hybrid::HybridRetriever;
pub use vector::VectorIndexClient;

use serde::{Deserialize, Serialize};
use smartrag_common::errors::Result;
use uuid::Uuid;

/// Search scope filter over the corpus
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// System-ingested corpus only
    System,
    /// User-uploaded documents only
    User,
    /// Both corpora
    #[default]
    All,
}

impl Scope {
    /// Payload tag value for index-side filtering, None matches everything
    pub fn filter_value(&self) -> Option<&'static str> {
        match self {
            Scope::System => Some("system"),
            Scope::User => Some("user"),
            Scope::All => None,
        }
    }
}

/// A chunk as stored in the corpus (JSONL line shape)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorpusChunk {
    /// Chunk ID
    pub id: Uuid,

    /// Source document path
    pub source_path: String,

    /// Ordinal within the source document
    pub ordinal: i32,

    /// Chunk text
    pub content: String,

    /// Corpus scope tag
    #[serde(default)]
    pub scope: Scope,
}

/// Retrieved chunk with relevance score
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedChunk {
    /// Chunk ID
    pub chunk_id: Uuid,

    /// Source document path
    pub source_path: String,

    /// Ordinal within the source document
    pub ordinal: i32,

    /// Chunk content
    pub content: String,

    /// Relevance score (0.0 - 1.0 after fusion/normalization)
    pub score: f32,

    /// Corpus scope tag
    #[serde(default)]
    pub scope: Scope,
}

/// File-level fallback execution report
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FallbackInfo {
    /// Wall time spent in the fallback path
    pub latency_ms: u64,
}

/// Ordered retrieval output
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetrievalResult {
    /// Chunks ordered by non-increasing score
    pub chunks: Vec<RetrievedChunk>,

    /// Present when the file-level fallback replaced the primary result
    pub fallback: Option<FallbackInfo>,
}

impl RetrievalResult {
    pub fn new(chunks: Vec<RetrievedChunk>) -> Self {
        Self {
            chunks,
            fallback: None,
        }
    }

    /// Top-1 score, 0.0 when empty
    pub fn top1_score(&self) -> f32 {
        self.chunks.first().map(|c| c.score).unwrap_or(0.0)
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Check the result invariants: scores non-increasing, ids distinct,
    /// length within the requested k
    pub fn check_invariants(&self, k: usize) -> std::result::Result<(), String> {
        if self.chunks.len() > k {
            return Err(format!("{} chunks exceed requested k={}", self.chunks.len(), k));
        }
        let mut seen = std::collections::HashSet::new();
        for pair in self.chunks.windows(2) {
            if pair[0].score < pair[1].score {
                return Err(format!(
                    "scores increase: {} < {}",
                    pair[0].score, pair[1].score
                ));
            }
        }
        for chunk in &self.chunks {
            if !seen.insert(chunk.chunk_id) {
                return Err(format!("duplicate chunk id {}", chunk.chunk_id));
            }
        }
        Ok(())
    }
}

/// Dense (vector) search seam
#[async_trait::async_trait]
pub trait VectorSearcher: Send + Sync {
    /// Search by embedding, returning up to k scope-filtered hits with
    /// cosine scores in non-increasing order
    async fn search(&self, vector: &[f32], k: usize, scope: Scope) -> Result<Vec<RetrievedChunk>>;
}

/// Keyword (BM25) search seam, over the identical chunk-id universe
#[async_trait::async_trait]
pub trait KeywordSearcher: Send + Sync {
    /// Search by query text, returning up to k BM25-scored hits
    async fn search(&self, query: &str, k: usize) -> Result<Vec<RetrievedChunk>>;
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub fn chunk(id: u128, source: &str, score: f32) -> RetrievedChunk {
        RetrievedChunk {
            chunk_id: Uuid::from_u128(id),
            source_path: source.to_string(),
            ordinal: 0,
            content: format!("content of chunk {}", id),
            score,
            scope: Scope::System,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::chunk;
    use super::*;

    #[test]
    fn test_invariant_check_passes_for_sorted_distinct() {
        let result = RetrievalResult::new(vec![
            chunk(1, "a.txt", 0.9),
            chunk(2, "b.txt", 0.5),
            chunk(3, "c.txt", 0.5),
        ]);
        assert!(result.check_invariants(5).is_ok());
    }

    #[test]
    fn test_invariant_check_rejects_duplicates_and_disorder() {
        let dup = RetrievalResult::new(vec![chunk(1, "a", 0.9), chunk(1, "a", 0.8)]);
        assert!(dup.check_invariants(5).is_err());

        let unsorted = RetrievalResult::new(vec![chunk(1, "a", 0.5), chunk(2, "b", 0.9)]);
        assert!(unsorted.check_invariants(5).is_err());

        let too_many = RetrievalResult::new(vec![chunk(1, "a", 0.9), chunk(2, "b", 0.8)]);
        assert!(too_many.check_invariants(1).is_err());
    }

    #[test]
    fn test_scope_filter_values() {
        assert_eq!(Scope::System.filter_value(), Some("system"));
        assert_eq!(Scope::User.filter_value(), Some("user"));
        assert_eq!(Scope::All.filter_value(), None);
    }
}
