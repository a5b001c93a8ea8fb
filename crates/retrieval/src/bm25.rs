//! BM25 keyword index
//!
//! In-process Okapi BM25 over the same chunk-id universe as the vector
//! index. The index is serialized to a JSON artifact under the cache
//! directory keyed by a corpus fingerprint, so startup is instant when the
//! corpus has not changed.

use crate::{CorpusChunk, KeywordSearcher, RetrievedChunk, Scope};
use serde::{Deserialize, Serialize};
use smartrag_common::errors::{AppError, Result};
use std::collections::HashMap;
use std::path::Path;
use uuid::Uuid;

const K1: f32 = 1.2;
const B: f32 = 0.75;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DocEntry {
    chunk_id: Uuid,
    source_path: String,
    ordinal: i32,
    content: String,
    scope: Scope,
    length: u32,
}

/// Persistent BM25 index
#[derive(Debug, Serialize, Deserialize)]
pub struct Bm25Index {
    docs: Vec<DocEntry>,
    /// term -> (doc index, term frequency) postings
    postings: HashMap<String, Vec<(u32, u32)>>,
    avg_doc_len: f32,
    /// Fingerprint of the corpus the index was built from
    pub fingerprint: String,
}

/// Lowercased alphanumeric tokens, short tokens dropped
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 1)
        .map(|t| t.to_lowercase())
        .collect()
}

impl Bm25Index {
    /// Build an index from corpus chunks
    pub fn build(chunks: &[CorpusChunk], fingerprint: &str) -> Self {
        let mut docs = Vec::with_capacity(chunks.len());
        let mut postings: HashMap<String, Vec<(u32, u32)>> = HashMap::new();
        let mut total_len: u64 = 0;

        for (doc_idx, chunk) in chunks.iter().enumerate() {
            let tokens = tokenize(&chunk.content);
            total_len += tokens.len() as u64;

            let mut term_freqs: HashMap<String, u32> = HashMap::new();
            for token in &tokens {
                *term_freqs.entry(token.clone()).or_insert(0) += 1;
            }
            for (term, freq) in term_freqs {
                postings.entry(term).or_default().push((doc_idx as u32, freq));
            }

            docs.push(DocEntry {
                chunk_id: chunk.id,
                source_path: chunk.source_path.clone(),
                ordinal: chunk.ordinal,
                content: chunk.content.clone(),
                scope: chunk.scope,
                length: tokens.len() as u32,
            });
        }

        let avg_doc_len = if docs.is_empty() {
            0.0
        } else {
            total_len as f32 / docs.len() as f32
        };

        Self {
            docs,
            postings,
            avg_doc_len,
            fingerprint: fingerprint.to_string(),
        }
    }

    /// Number of indexed chunks
    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    /// BM25 search, scores normalized into [0, 1)
    pub fn search_sync(&self, query: &str, k: usize) -> Vec<RetrievedChunk> {
        let terms = tokenize(query);
        if terms.is_empty() || self.docs.is_empty() {
            return Vec::new();
        }

        let doc_count = self.docs.len() as f32;
        let mut scores: HashMap<u32, f32> = HashMap::new();

        for term in &terms {
            let Some(posting) = self.postings.get(term) else {
                continue;
            };
            let df = posting.len() as f32;
            let idf = ((doc_count - df + 0.5) / (df + 0.5) + 1.0).ln();

            for &(doc_idx, tf) in posting {
                let doc_len = self.docs[doc_idx as usize].length as f32;
                let tf = tf as f32;
                let denom = tf + K1 * (1.0 - B + B * doc_len / self.avg_doc_len.max(1.0));
                *scores.entry(doc_idx).or_insert(0.0) += idf * tf * (K1 + 1.0) / denom;
            }
        }

        let mut ranked: Vec<(u32, f32)> = scores.into_iter().collect();
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        ranked.truncate(k);

        ranked
            .into_iter()
            .map(|(doc_idx, score)| {
                let doc = &self.docs[doc_idx as usize];
                RetrievedChunk {
                    chunk_id: doc.chunk_id,
                    source_path: doc.source_path.clone(),
                    ordinal: doc.ordinal,
                    content: doc.content.clone(),
                    // Raw BM25 is unbounded; squash like ts_rank normalization
                    score: score / (score + 1.0),
                    scope: doc.scope,
                }
            })
            .collect()
    }

    /// Serialize the index to disk
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_vec(self)?;
        std::fs::write(path, json)?;
        tracing::info!(path = %path.display(), docs = self.docs.len(), "BM25 index saved");
        Ok(())
    }

    /// Load a serialized index
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let index: Self = serde_json::from_slice(&bytes)?;
        tracing::info!(path = %path.display(), docs = index.docs.len(), "BM25 index loaded");
        Ok(index)
    }

    /// Load the artifact when its fingerprint matches, otherwise rebuild
    /// and persist
    pub fn load_or_build(path: &Path, chunks: &[CorpusChunk], fingerprint: &str) -> Result<Self> {
        if path.exists() {
            match Self::load(path) {
                Ok(index) if index.fingerprint == fingerprint => return Ok(index),
                Ok(_) => {
                    tracing::info!("Corpus fingerprint changed, rebuilding BM25 index");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to load BM25 artifact, rebuilding");
                }
            }
        }
        let index = Self::build(chunks, fingerprint);
        index.save(path)?;
        Ok(index)
    }
}

#[async_trait::async_trait]
impl KeywordSearcher for Bm25Index {
    async fn search(&self, query: &str, k: usize) -> Result<Vec<RetrievedChunk>> {
        if self.docs.is_empty() {
            return Err(AppError::IndexUnavailable {
                message: "keyword index is empty".to_string(),
            });
        }
        Ok(self.search_sync(query, k))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn corpus() -> Vec<CorpusChunk> {
        let texts = [
            ("books/austen.txt", "Pride and Prejudice was written by Jane Austen in 1813"),
            ("books/austen.txt", "Jane Austen also wrote Emma and Persuasion"),
            ("books/tolstoy.txt", "War and Peace is a novel by Leo Tolstoy"),
            ("physics/thermo.txt", "Entropy measures disorder in thermodynamic systems"),
        ];
        texts
            .iter()
            .enumerate()
            .map(|(i, (path, content))| CorpusChunk {
                id: Uuid::from_u128(i as u128 + 1),
                source_path: path.to_string(),
                ordinal: i as i32,
                content: content.to_string(),
                scope: Scope::System,
            })
            .collect()
    }

    #[test]
    fn test_relevant_doc_ranks_first() {
        let index = Bm25Index::build(&corpus(), "fp1");
        let results = index.search_sync("who wrote pride and prejudice", 4);

        assert!(!results.is_empty());
        assert_eq!(results[0].chunk_id, Uuid::from_u128(1));
        for pair in results.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[test]
    fn test_scores_are_normalized() {
        let index = Bm25Index::build(&corpus(), "fp1");
        for hit in index.search_sync("jane austen", 4) {
            assert!(hit.score > 0.0 && hit.score < 1.0);
        }
    }

    #[test]
    fn test_no_match_returns_empty() {
        let index = Bm25Index::build(&corpus(), "fp1");
        assert!(index.search_sync("zzzz qqqq", 4).is_empty());
        assert!(index.search_sync("", 4).is_empty());
    }

    #[test]
    fn test_roundtrip_and_fingerprint_rebuild() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bm25.json");
        let chunks = corpus();

        let index = Bm25Index::load_or_build(&path, &chunks, "fp1").unwrap();
        assert_eq!(index.len(), 4);
        assert!(path.exists());

        // Matching fingerprint loads the artifact
        let reloaded = Bm25Index::load_or_build(&path, &chunks, "fp1").unwrap();
        assert_eq!(reloaded.fingerprint, "fp1");

        // Changed fingerprint rebuilds
        let rebuilt = Bm25Index::load_or_build(&path, &chunks[..2].to_vec(), "fp2").unwrap();
        assert_eq!(rebuilt.fingerprint, "fp2");
        assert_eq!(rebuilt.len(), 2);
    }

    #[test]
    fn test_tokenize_drops_punctuation_and_short_tokens() {
        let tokens = tokenize("Sir Robert's fortune, a novel!");
        assert!(tokens.contains(&"sir".to_string()));
        assert!(tokens.contains(&"robert".to_string()));
        assert!(tokens.contains(&"novel".to_string()));
        assert!(!tokens.contains(&"a".to_string()));
    }
}
