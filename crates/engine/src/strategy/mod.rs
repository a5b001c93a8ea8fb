//! Retrieval strategies
//!
//! The four selectable arms share one contract: `run(request, ctx)` yields
//! a draft answer with evidence, usage, and per-stage timings. The router
//! owns arm selection, fallback, reward computation, and final assembly.

mod graph_jit;
mod hybrid;
mod iterative;
mod table;

pub use graph_jit::GraphStrategy;
pub use hybrid::HybridStrategy;
pub use iterative::IterativeStrategy;
pub use table::TableStrategy;

use crate::answer::{build_citations, Citation, Timings};
use crate::progress::ProgressBus;
use serde::{Deserialize, Serialize};
use smartrag_common::errors::{AppError, Result};
use smartrag_common::llm::TokenUsage;
use smartrag_retrieval::{FallbackInfo, RetrievedChunk, Scope};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Answer text used when the deadline fires after retrieval but before any
/// generation completed
pub(crate) const PARTIAL_EVIDENCE_TEXT: &str = "The request deadline expired before an answer \
could be generated. The cited sources were retrieved as the most relevant evidence.";

/// One selectable retrieval strategy (a bandit arm)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    Hybrid,
    Iterative,
    Graph,
    Table,
}

impl StrategyKind {
    /// All arms, in a stable order
    pub const ALL: [StrategyKind; 4] = [
        StrategyKind::Hybrid,
        StrategyKind::Iterative,
        StrategyKind::Graph,
        StrategyKind::Table,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::Hybrid => "hybrid",
            StrategyKind::Iterative => "iterative",
            StrategyKind::Graph => "graph",
            StrategyKind::Table => "table",
        }
    }

    /// Parse a wire name
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "hybrid" => Some(StrategyKind::Hybrid),
            "iterative" => Some(StrategyKind::Iterative),
            "graph" => Some(StrategyKind::Graph),
            "table" => Some(StrategyKind::Table),
            _ => None,
        }
    }
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The question and its retrieval knobs
#[derive(Debug, Clone)]
pub struct StrategyRequest {
    pub question: String,
    pub top_k: usize,
    pub scope: Scope,
}

/// Per-request execution context shared by the router and strategies
#[derive(Clone)]
pub struct AskContext {
    /// Progress producer for this request
    pub progress: ProgressBus,

    /// Absolute deadline for the request
    pub deadline: Instant,

    /// Configured deadline length, for error reporting
    pub deadline_ms: u64,

    /// Best outcome seen so far; the router salvages this when the deadline
    /// drops a strategy future mid-run
    partial: Arc<Mutex<Option<StrategyOutcome>>>,
}

impl AskContext {
    pub fn new(progress: ProgressBus, deadline: Duration) -> Self {
        Self {
            progress,
            deadline: Instant::now() + deadline,
            deadline_ms: deadline.as_millis() as u64,
            partial: Arc::new(Mutex::new(None)),
        }
    }

    /// Time left before the deadline
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Checked at stage boundaries and before network calls; a closed
    /// progress channel counts as cancellation
    pub fn check_deadline(&self) -> Result<()> {
        if self.remaining().is_zero() || self.progress.is_closed() {
            return Err(AppError::DeadlineExceeded {
                deadline_ms: self.deadline_ms,
            });
        }
        Ok(())
    }

    /// Record the best outcome so far; strategies call this after every
    /// completed retrieval or generation stage
    pub fn record_partial(&self, outcome: StrategyOutcome) {
        *self.partial.lock().expect("partial outcome lock") = Some(outcome);
    }

    /// Take the recorded outcome, leaving the slot empty
    pub fn take_partial(&self) -> Option<StrategyOutcome> {
        self.partial.lock().expect("partial outcome lock").take()
    }
}

/// Evidence-only outcome recorded after retrieval so a deadline that fires
/// during generation can still return citations
pub(crate) fn evidence_partial(chunks: &[RetrievedChunk], timings: &Timings) -> StrategyOutcome {
    let cited: Vec<(usize, &RetrievedChunk)> = chunks.iter().enumerate().map(|(i, c)| (i + 1, c)).collect();
    StrategyOutcome {
        text: PARTIAL_EVIDENCE_TEXT.to_string(),
        citations: build_citations(&cited),
        confidence: 0.2,
        token_usage: TokenUsage::default(),
        timings: timings.clone(),
        chunks_used: chunks.len(),
        fallback: None,
        iterations: None,
        truncated: false,
    }
}

/// Draft answer produced by a strategy run
#[derive(Debug, Clone)]
pub struct StrategyOutcome {
    pub text: String,
    pub citations: Vec<Citation>,
    pub confidence: f32,
    pub token_usage: TokenUsage,
    pub timings: Timings,
    /// Chunks that fed generation; the cache quality gate needs this
    pub chunks_used: usize,
    pub fallback: Option<FallbackInfo>,
    pub iterations: Option<u32>,
    /// True when the deadline cut the run short of its full pipeline
    pub truncated: bool,
}

/// Uniform strategy contract
#[async_trait::async_trait]
pub trait Strategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    /// Execute the strategy for one request
    async fn run(&self, request: &StrategyRequest, ctx: &AskContext) -> Result<StrategyOutcome>;
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_kind_roundtrip() {
        for kind in StrategyKind::ALL {
            assert_eq!(StrategyKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(StrategyKind::parse("nonsense"), None);
    }

    #[test]
    fn test_kind_serde_snake_case() {
        let json = serde_json::to_string(&StrategyKind::Graph).unwrap();
        assert_eq!(json, "\"graph\"");
    }

    #[test]
    fn test_context_deadline() {
        let ctx = AskContext::new(ProgressBus::disabled(), Duration::from_secs(5));
        assert!(ctx.check_deadline().is_ok());

        let expired = AskContext::new(ProgressBus::disabled(), Duration::from_millis(0));
        assert!(expired.check_deadline().is_err());
    }

    #[test]
    fn test_closed_progress_counts_as_cancellation() {
        let (bus, rx) = ProgressBus::channel(4);
        let ctx = AskContext::new(bus, Duration::from_secs(5));
        assert!(ctx.check_deadline().is_ok());
        drop(rx);
        assert!(ctx.check_deadline().is_err());
    }

    #[test]
    fn test_partial_slot_is_shared_across_clones() {
        let ctx = AskContext::new(ProgressBus::disabled(), Duration::from_secs(5));
        assert!(ctx.take_partial().is_none());

        let clone = ctx.clone();
        clone.record_partial(evidence_partial(&test_support::test_chunks(), &Timings::default()));

        let partial = ctx.take_partial().expect("clone writes are visible");
        assert!(!partial.citations.is_empty());
        assert!(!partial.truncated);
        // take drains the slot
        assert!(ctx.take_partial().is_none());
    }

    #[test]
    fn test_evidence_partial_dedupes_citations() {
        let chunks = test_support::test_chunks();
        let partial = evidence_partial(&chunks, &Timings::default());

        // Two of the three test chunks share a source file
        assert_eq!(partial.citations.len(), 2);
        assert_eq!(partial.chunks_used, 3);
        assert!(partial.text.contains("deadline expired"));
        assert!(partial.token_usage.is_zero());
    }
}
