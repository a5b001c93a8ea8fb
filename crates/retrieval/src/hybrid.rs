//! Hybrid retrieval combining vector and BM25 search
//!
//! Runs both searches concurrently, fuses the candidates, optionally
//! reranks the fused top 2k with the cross-encoder, and truncates to k.
//! One side failing degrades to the surviving side with a warning; both
//! sides failing is INDEX_UNAVAILABLE.

use crate::{
    fuse, FusionMode, KeywordSearcher, RetrievalResult, RetrievedChunk, Scope, VectorSearcher,
};
use smartrag_common::config::HybridConfig;
use smartrag_common::embeddings::Embedder;
use smartrag_common::errors::{AppError, Result};
use smartrag_common::metrics;
use smartrag_common::rerank::RerankClient;
use std::sync::Arc;
use std::time::Instant;

/// Hybrid retriever combining vector and BM25
pub struct HybridRetriever {
    embedder: Arc<dyn Embedder>,
    vector: Arc<dyn VectorSearcher>,
    keyword: Arc<dyn KeywordSearcher>,
    rerank: Option<Arc<RerankClient>>,
    config: HybridConfig,
}

impl HybridRetriever {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        vector: Arc<dyn VectorSearcher>,
        keyword: Arc<dyn KeywordSearcher>,
        rerank: Option<Arc<RerankClient>>,
        config: HybridConfig,
    ) -> Self {
        Self {
            embedder,
            vector,
            keyword,
            rerank,
            config,
        }
    }

    fn fusion_mode(&self) -> FusionMode {
        FusionMode::from_config(&self.config.fusion_mode, self.config.alpha, self.config.rrf_c)
    }

    /// Hybrid retrieval for a question
    pub async fn retrieve(&self, question: &str, k: usize, scope: Scope) -> Result<RetrievalResult> {
        let start = Instant::now();

        let query_vector = self.embedder.embed(question).await?;

        // Fetch more candidates from each side for better fusion
        let k_dense = (k * self.config.candidate_multiplier).max(k);
        let k_keyword = self.config.bm25_top_k.max(k);

        let (dense, keyword) = tokio::join!(
            self.vector.search(&query_vector, k_dense, scope),
            self.keyword.search(question, k_keyword)
        );

        let (dense, keyword) = match (dense, keyword) {
            (Ok(d), Ok(b)) => (d, b),
            (Ok(d), Err(e)) => {
                tracing::warn!(error = %e, "Keyword search failed, using dense side only");
                (d, Vec::new())
            }
            (Err(e), Ok(b)) => {
                tracing::warn!(error = %e, "Vector search failed, using keyword side only");
                (Vec::new(), b)
            }
            (Err(dense_err), Err(keyword_err)) => {
                return Err(AppError::IndexUnavailable {
                    message: format!(
                        "both retrieval sides failed: dense: {}; keyword: {}",
                        dense_err, keyword_err
                    ),
                });
            }
        };

        let mut fused = fuse(dense, keyword, self.fusion_mode(), k * 2);

        if self.config.rerank_enabled {
            if let Some(rerank) = &self.rerank {
                fused = rescore(rerank, question, fused).await;
            }
        }

        fused.truncate(k);
        metrics::record_retrieval("hybrid", start.elapsed().as_secs_f64());

        let result = RetrievalResult::new(fused);
        debug_assert!(result.check_invariants(k).is_ok());
        Ok(result)
    }

    /// Dense-only retrieval, used to seed the entity graph builder
    pub async fn dense(&self, query: &str, k: usize, scope: Scope) -> Result<RetrievalResult> {
        let start = Instant::now();
        let query_vector = self.embedder.embed(query).await?;
        let chunks = self.vector.search(&query_vector, k, scope).await?;
        metrics::record_retrieval("dense", start.elapsed().as_secs_f64());
        Ok(RetrievalResult::new(chunks))
    }
}

/// Rerank fused candidates, preserving score monotonicity
async fn rescore(
    rerank: &RerankClient,
    question: &str,
    chunks: Vec<RetrievedChunk>,
) -> Vec<RetrievedChunk> {
    if chunks.len() < 2 {
        return chunks;
    }

    let passages: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
    let scores = rerank.rerank(question, &passages).await;

    let mut scored: Vec<(f32, RetrievedChunk)> = scores.into_iter().zip(chunks).collect();
    scored.sort_by(|a, b| a.0.total_cmp(&b.0).reverse());

    // Map rerank scores into [0, 1] so downstream thresholds stay meaningful
    let max = scored.first().map(|(s, _)| *s).unwrap_or(0.0);
    let min = scored.last().map(|(s, _)| *s).unwrap_or(0.0);
    let range = (max - min).max(f32::EPSILON);

    scored
        .into_iter()
        .map(|(score, mut chunk)| {
            chunk.score = ((score - min) / range).clamp(0.0, 1.0);
            chunk
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::chunk;
    use smartrag_common::embeddings::HashEmbedder;

    struct StaticVector(Vec<RetrievedChunk>);

    #[async_trait::async_trait]
    impl VectorSearcher for StaticVector {
        async fn search(&self, _: &[f32], k: usize, _: Scope) -> Result<Vec<RetrievedChunk>> {
            Ok(self.0.iter().take(k).cloned().collect())
        }
    }

    struct StaticKeyword(Vec<RetrievedChunk>);

    #[async_trait::async_trait]
    impl KeywordSearcher for StaticKeyword {
        async fn search(&self, _: &str, k: usize) -> Result<Vec<RetrievedChunk>> {
            Ok(self.0.iter().take(k).cloned().collect())
        }
    }

    struct FailingVector;

    #[async_trait::async_trait]
    impl VectorSearcher for FailingVector {
        async fn search(&self, _: &[f32], _: usize, _: Scope) -> Result<Vec<RetrievedChunk>> {
            Err(AppError::IndexUnavailable {
                message: "down".into(),
            })
        }
    }

    struct FailingKeyword;

    #[async_trait::async_trait]
    impl KeywordSearcher for FailingKeyword {
        async fn search(&self, _: &str, _: usize) -> Result<Vec<RetrievedChunk>> {
            Err(AppError::IndexUnavailable {
                message: "down".into(),
            })
        }
    }

    fn config() -> HybridConfig {
        HybridConfig {
            alpha: 0.7,
            fusion_mode: "weighted".into(),
            rrf_c: 60.0,
            bm25_top_k: 10,
            candidate_multiplier: 2,
            rerank_enabled: false,
        }
    }

    fn retriever(
        vector: Arc<dyn VectorSearcher>,
        keyword: Arc<dyn KeywordSearcher>,
    ) -> HybridRetriever {
        HybridRetriever::new(
            Arc::new(HashEmbedder::new("test", 64)),
            vector,
            keyword,
            None,
            config(),
        )
    }

    #[tokio::test]
    async fn test_fused_output_comes_from_input_union() {
        let dense = vec![chunk(1, "a", 0.9), chunk(2, "b", 0.7)];
        let keyword = vec![chunk(2, "b", 0.8), chunk(3, "c", 0.6)];

        let retriever = retriever(
            Arc::new(StaticVector(dense.clone())),
            Arc::new(StaticKeyword(keyword.clone())),
        );

        let result = retriever.retrieve("any question", 4, Scope::All).await.unwrap();
        assert!(result.check_invariants(4).is_ok());

        let union: std::collections::HashSet<_> = dense
            .iter()
            .chain(keyword.iter())
            .map(|c| c.chunk_id)
            .collect();
        for hit in &result.chunks {
            assert!(union.contains(&hit.chunk_id));
        }
    }

    #[tokio::test]
    async fn test_one_side_down_degrades() {
        let keyword = vec![chunk(3, "c", 0.6)];
        let retriever = retriever(Arc::new(FailingVector), Arc::new(StaticKeyword(keyword)));

        let result = retriever.retrieve("question", 4, Scope::All).await.unwrap();
        assert_eq!(result.chunks.len(), 1);
        assert_eq!(result.chunks[0].chunk_id, uuid::Uuid::from_u128(3));
    }

    #[tokio::test]
    async fn test_both_sides_down_is_index_unavailable() {
        let retriever = retriever(Arc::new(FailingVector), Arc::new(FailingKeyword));
        let err = retriever.retrieve("question", 4, Scope::All).await.unwrap_err();
        assert_eq!(err.kind(), smartrag_common::ErrorKind::IndexUnavailable);
    }

    #[tokio::test]
    async fn test_truncates_to_k() {
        let dense: Vec<_> = (1..=10).map(|i| chunk(i, "a", 1.0 - i as f32 * 0.05)).collect();
        let retriever = retriever(Arc::new(StaticVector(dense)), Arc::new(StaticKeyword(vec![])));

        let result = retriever.retrieve("question", 3, Scope::All).await.unwrap();
        assert_eq!(result.chunks.len(), 3);
    }
}
