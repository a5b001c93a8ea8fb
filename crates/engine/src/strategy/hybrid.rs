//! Hybrid strategy
//!
//! The workhorse arm: hybrid retrieval (dense + BM25 fusion), the
//! file-level rescue for weak top-1 matches, then grounded generation.

use super::{evidence_partial, AskContext, Strategy, StrategyKind, StrategyOutcome, StrategyRequest};
use crate::answer::Timings;
use crate::generate::AnswerSynthesizer;
use crate::progress::RetrievalSummary;
use smartrag_common::errors::{AppError, Result};
use smartrag_retrieval::{FileLevelFallback, HybridRetriever, RetrievalResult};
use std::sync::Arc;
use std::time::Instant;

pub struct HybridStrategy {
    retriever: Arc<HybridRetriever>,
    file_fallback: Arc<FileLevelFallback>,
    synthesizer: Arc<AnswerSynthesizer>,
}

impl HybridStrategy {
    pub fn new(
        retriever: Arc<HybridRetriever>,
        file_fallback: Arc<FileLevelFallback>,
        synthesizer: Arc<AnswerSynthesizer>,
    ) -> Self {
        Self {
            retriever,
            file_fallback,
            synthesizer,
        }
    }

    /// Retrieval plus the opt-in file-level rescue, shared with the router's
    /// fallback path
    pub async fn retrieve_with_rescue(
        &self,
        request: &StrategyRequest,
        ctx: &AskContext,
        timings: &mut Timings,
    ) -> Result<RetrievalResult> {
        ctx.check_deadline()?;

        let start = Instant::now();
        let primary = self
            .retriever
            .retrieve(&request.question, request.top_k, request.scope)
            .await?;
        let retrieval_ms = start.elapsed().as_millis() as u64;
        timings.record("retrieval_ms", retrieval_ms);

        ctx.progress.emit_retrieval(RetrievalSummary {
            num_chunks: primary.chunks.len(),
            retrieval_time_ms: retrieval_ms,
            citations: source_paths(&primary),
        });

        ctx.check_deadline()?;

        let result = self
            .file_fallback
            .rescue(&request.question, primary, request.top_k)
            .await;
        if let Some(info) = &result.fallback {
            timings.record("fallback_ms", info.latency_ms);
            ctx.progress.emit_with(
                "Re-searching within the top source file",
                Some(serde_json::json!({ "fallback_latency_ms": info.latency_ms })),
            );
        }

        Ok(result)
    }
}

fn source_paths(result: &RetrievalResult) -> Vec<String> {
    let mut paths: Vec<String> = Vec::new();
    for chunk in &result.chunks {
        if !paths.contains(&chunk.source_path) {
            paths.push(chunk.source_path.clone());
        }
    }
    paths
}

#[async_trait::async_trait]
impl Strategy for HybridStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Hybrid
    }

    async fn run(&self, request: &StrategyRequest, ctx: &AskContext) -> Result<StrategyOutcome> {
        let mut timings = Timings::default();

        ctx.progress.emit("Retrieving candidate passages");
        let result = self.retrieve_with_rescue(request, ctx, &mut timings).await?;

        if result.is_empty() {
            return Err(AppError::NoEvidence);
        }

        // Evidence is salvageable from here on, even if generation hangs
        let mut partial = evidence_partial(&result.chunks, &timings);
        partial.fallback = result.fallback;
        ctx.record_partial(partial);

        ctx.check_deadline()?;
        ctx.progress.emit("Generating grounded answer");

        let start = Instant::now();
        let generated = self
            .synthesizer
            .synthesize(&request.question, &result.chunks, None)
            .await?;
        timings.record("generation_ms", start.elapsed().as_millis() as u64);

        Ok(StrategyOutcome {
            text: generated.text,
            citations: generated.citations,
            confidence: generated.confidence,
            token_usage: generated.usage,
            timings,
            chunks_used: result.chunks.len(),
            fallback: result.fallback,
            iterations: None,
            truncated: false,
        })
    }
}
