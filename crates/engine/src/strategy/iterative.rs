//! Iterative (Self-RAG) strategy
//!
//! Generate, self-assess, refine. After the initial retrieval and
//! generation, the model critiques its own answer and proposes a refined
//! sub-query; the loop re-retrieves and regenerates until confidence
//! clears the threshold, the marginal improvement stalls, the iteration
//! cap is reached, or the deadline closes in. The best answer seen wins.

use super::{evidence_partial, AskContext, Strategy, StrategyKind, StrategyOutcome, StrategyRequest};
use crate::answer::Timings;
use crate::generate::{AnswerSynthesizer, GeneratedAnswer};
use crate::progress::RetrievalSummary;
use serde::Deserialize;
use smartrag_common::config::SelfRagConfig;
use smartrag_common::errors::{AppError, Result};
use smartrag_common::llm::{parse_structured, ChatRequest, LanguageModel, TokenUsage};
use smartrag_retrieval::HybridRetriever;
use std::sync::Arc;
use std::time::Instant;

pub struct IterativeStrategy {
    retriever: Arc<HybridRetriever>,
    synthesizer: Arc<AnswerSynthesizer>,
    llm: Arc<dyn LanguageModel>,
    config: SelfRagConfig,
}

#[derive(Debug, Deserialize)]
struct Critique {
    #[allow(dead_code)]
    critique: String,
    refined_query: String,
}

impl IterativeStrategy {
    pub fn new(
        retriever: Arc<HybridRetriever>,
        synthesizer: Arc<AnswerSynthesizer>,
        llm: Arc<dyn LanguageModel>,
        config: SelfRagConfig,
    ) -> Self {
        Self {
            retriever,
            synthesizer,
            llm,
            config,
        }
    }

    /// Ask the model to critique the current answer and propose a refined
    /// sub-query
    async fn critique(
        &self,
        question: &str,
        answer: &str,
        usage: &mut TokenUsage,
    ) -> Result<Critique> {
        let prompt = format!(
            "You are reviewing a draft answer for completeness and grounding.\n\
             Question: {}\n\nDraft answer:\n{}\n\n\
             Reply with JSON only: {{\"critique\": \"<one sentence>\", \
             \"refined_query\": \"<search query that would fill the gap>\"}}",
            question, answer
        );
        let request = ChatRequest::new("You critique retrieval-augmented answers.", prompt);
        let completion = self.llm.complete(&request).await?;
        usage.add(&completion.usage);
        parse_structured(&completion.text)
    }
}

#[async_trait::async_trait]
impl Strategy for IterativeStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Iterative
    }

    async fn run(&self, request: &StrategyRequest, ctx: &AskContext) -> Result<StrategyOutcome> {
        let mut timings = Timings::default();
        let mut usage = TokenUsage::default();

        ctx.check_deadline()?;
        ctx.progress.emit("Retrieving initial passages");

        let start = Instant::now();
        let initial = self
            .retriever
            .retrieve(&request.question, request.top_k, request.scope)
            .await?;
        let retrieval_ms = start.elapsed().as_millis() as u64;
        timings.record("retrieval_ms", retrieval_ms);

        ctx.progress.emit_retrieval(RetrievalSummary {
            num_chunks: initial.chunks.len(),
            retrieval_time_ms: retrieval_ms,
            citations: initial
                .chunks
                .iter()
                .map(|c| c.source_path.clone())
                .collect(),
        });

        if initial.is_empty() {
            return Err(AppError::NoEvidence);
        }

        ctx.record_partial(evidence_partial(&initial.chunks, &timings));

        ctx.check_deadline()?;
        ctx.progress.emit("Generating initial answer");

        let start = Instant::now();
        let mut best: GeneratedAnswer = self
            .synthesizer
            .synthesize(&request.question, &initial.chunks, None)
            .await?;
        timings.record("generation_ms", start.elapsed().as_millis() as u64);
        usage.add(&best.usage);
        let mut best_chunks = initial.chunks.len();

        let mut iterations = 0u32;
        let mut deadline_hit = false;
        let refine_start = Instant::now();
        ctx.record_partial(snapshot(&best, usage, &timings, best_chunks, iterations));

        while self.config.enabled
            && iterations < self.config.max_iterations
            && best.confidence < self.config.confidence_threshold
        {
            // Deadline: return the best answer so far rather than failing
            if ctx.check_deadline().is_err() {
                tracing::info!(iterations, "Refinement stopped at deadline, keeping best answer");
                deadline_hit = true;
                break;
            }

            ctx.progress.emit_with(
                "Critiquing answer and refining the query",
                Some(serde_json::json!({ "iteration": iterations + 1 })),
            );

            let critique = match self.critique(&request.question, &best.text, &mut usage).await {
                Ok(critique) => critique,
                Err(e) => {
                    tracing::warn!(error = %e, "Critique call failed, keeping best answer");
                    break;
                }
            };

            if critique.refined_query.trim().is_empty() {
                break;
            }

            let refined = self
                .retriever
                .retrieve(&critique.refined_query, request.top_k, request.scope)
                .await
                .unwrap_or_default();
            if refined.is_empty() {
                break;
            }

            ctx.progress.emit_with(
                "Regenerating with refined evidence",
                Some(serde_json::json!({ "iteration": iterations + 1 })),
            );

            let candidate = self
                .synthesizer
                .synthesize(&request.question, &refined.chunks, None)
                .await?;
            usage.add(&candidate.usage);
            iterations += 1;

            let improvement = candidate.confidence - best.confidence;
            if candidate.confidence > best.confidence {
                best = candidate;
                best_chunks = refined.chunks.len();
                ctx.record_partial(snapshot(&best, usage, &timings, best_chunks, iterations));
            }
            if improvement < self.config.min_improvement {
                break;
            }
        }

        if iterations > 0 {
            timings.record("refinement_ms", refine_start.elapsed().as_millis() as u64);
        }

        let mut outcome = snapshot(&best, usage, &timings, best_chunks, iterations);
        outcome.truncated = deadline_hit;
        Ok(outcome)
    }
}

/// Outcome snapshot of the current best answer; also recorded on the
/// request context so a dropped future can still be salvaged
fn snapshot(
    best: &GeneratedAnswer,
    usage: TokenUsage,
    timings: &Timings,
    chunks_used: usize,
    iterations: u32,
) -> StrategyOutcome {
    StrategyOutcome {
        text: best.text.clone(),
        citations: best.citations.clone(),
        confidence: best.confidence,
        token_usage: usage,
        timings: timings.clone(),
        chunks_used,
        fallback: None,
        iterations: Some(iterations),
        truncated: false,
    }
}
