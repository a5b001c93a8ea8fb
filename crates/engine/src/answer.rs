//! Answer model
//!
//! The assembled output of a strategy run: grounded text, per-source
//! citations, confidence, usage accounting, and per-stage timings.

use crate::cache::CacheHitInfo;
use crate::strategy::StrategyKind;
use serde::{Deserialize, Serialize};
use smartrag_common::llm::TokenUsage;
use smartrag_retrieval::{FallbackInfo, RetrievedChunk};
use std::collections::BTreeMap;

/// Maximum snippet length carried in a citation
const SNIPPET_CHARS: usize = 240;

/// A source reference attached to an answer, one per distinct source file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Citation {
    /// Source document path
    pub source_path: String,

    /// Supporting text excerpt
    pub snippet: String,

    /// Relevance score of the cited chunk
    pub score: f32,

    /// Retrieval rank of the cited chunk (1-based)
    pub rank: usize,
}

/// Ordered per-stage timings in milliseconds
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timings(pub BTreeMap<String, u64>);

impl Timings {
    pub fn record(&mut self, stage: &str, millis: u64) {
        self.0.insert(stage.to_string(), millis);
    }

    pub fn get(&self, stage: &str) -> Option<u64> {
        self.0.get(stage).copied()
    }

    pub fn merge(&mut self, other: &Timings) {
        for (stage, ms) in &other.0 {
            self.0.insert(stage.clone(), *ms);
        }
    }
}

/// A generated answer with its evidence and accounting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Answer {
    /// Answer text
    pub text: String,

    /// Citations, deduplicated per source file
    pub citations: Vec<Citation>,

    /// Confidence in [0, 1]
    pub confidence: f32,

    /// Strategy that produced the answer
    pub strategy: StrategyKind,

    /// Token usage across all LLM calls of the run
    pub token_usage: TokenUsage,

    /// Estimated provider cost in USD
    pub token_cost_usd: f64,

    /// Per-stage timings
    pub timings: Timings,

    /// Present when the answer was served from the cache
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_hit: Option<CacheHitInfo>,

    /// True when retrieval produced no evidence and the answer is a refusal
    #[serde(default)]
    pub no_evidence: bool,

    /// True when the deadline cut the run short
    #[serde(default)]
    pub truncated: bool,

    /// Present when the file-level fallback replaced the primary retrieval
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback: Option<FallbackInfo>,

    /// Refinement iterations, for the iterative strategy
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iterations: Option<u32>,
}

/// Build citations from cited chunks, deduplicating by source path
///
/// `cited` pairs each chunk with its retrieval rank; the first (best-ranked)
/// chunk per source file wins.
pub fn build_citations(cited: &[(usize, &RetrievedChunk)]) -> Vec<Citation> {
    let mut seen = std::collections::HashSet::new();
    let mut citations = Vec::new();

    for (rank, chunk) in cited {
        if !seen.insert(chunk.source_path.clone()) {
            continue;
        }
        let snippet: String = chunk.content.chars().take(SNIPPET_CHARS).collect();
        citations.push(Citation {
            source_path: chunk.source_path.clone(),
            snippet,
            score: chunk.score,
            rank: *rank,
        });
    }

    citations
}
