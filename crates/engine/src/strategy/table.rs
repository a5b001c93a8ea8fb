//! Table strategy
//!
//! For comparison/list/aggregation questions: retrieve, then ask the model
//! for a structured table (header row + data rows) with a natural-language
//! summary. The rendered table is a citation-bearing artifact. An empty
//! table is a strategy failure so the router falls back to hybrid.

use super::{evidence_partial, AskContext, Strategy, StrategyKind, StrategyOutcome, StrategyRequest};
use crate::answer::{build_citations, Timings};
use crate::progress::RetrievalSummary;
use serde::Deserialize;
use smartrag_common::errors::{AppError, Result};
use smartrag_common::llm::{parse_structured, ChatRequest, LanguageModel, TokenUsage};
use smartrag_retrieval::HybridRetriever;
use std::sync::Arc;
use std::time::Instant;

pub struct TableStrategy {
    retriever: Arc<HybridRetriever>,
    llm: Arc<dyn LanguageModel>,
}

#[derive(Debug, Deserialize)]
struct ExtractedTable {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
    #[serde(default)]
    summary: String,
}

impl TableStrategy {
    pub fn new(retriever: Arc<HybridRetriever>, llm: Arc<dyn LanguageModel>) -> Self {
        Self { retriever, llm }
    }
}

/// Render the extracted table as markdown
fn render_table(table: &ExtractedTable) -> String {
    let mut out = String::new();

    if !table.summary.is_empty() {
        out.push_str(&table.summary);
        out.push_str("\n\n");
    }

    out.push_str(&format!("| {} |\n", table.headers.join(" | ")));
    out.push_str(&format!(
        "|{}|\n",
        table.headers.iter().map(|_| " --- ").collect::<Vec<_>>().join("|")
    ));
    for row in &table.rows {
        out.push_str(&format!("| {} |\n", row.join(" | ")));
    }

    out
}

#[async_trait::async_trait]
impl Strategy for TableStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Table
    }

    async fn run(&self, request: &StrategyRequest, ctx: &AskContext) -> Result<StrategyOutcome> {
        let mut timings = Timings::default();
        let mut usage = TokenUsage::default();

        ctx.check_deadline()?;
        ctx.progress.emit("Retrieving passages for table extraction");

        let start = Instant::now();
        let retrieval = self
            .retriever
            .retrieve(&request.question, request.top_k, request.scope)
            .await?;
        let retrieval_ms = start.elapsed().as_millis() as u64;
        timings.record("retrieval_ms", retrieval_ms);

        ctx.progress.emit_retrieval(RetrievalSummary {
            num_chunks: retrieval.chunks.len(),
            retrieval_time_ms: retrieval_ms,
            citations: retrieval
                .chunks
                .iter()
                .map(|c| c.source_path.clone())
                .collect(),
        });

        if retrieval.is_empty() {
            return Err(AppError::NoEvidence);
        }

        ctx.record_partial(evidence_partial(&retrieval.chunks, &timings));

        ctx.check_deadline()?;
        ctx.progress.emit("Extracting structured table");

        let mut context = String::new();
        for (i, chunk) in retrieval.chunks.iter().enumerate() {
            context.push_str(&format!("[{}] {}\n{}\n\n", i + 1, chunk.source_path, chunk.content));
        }
        let prompt = format!(
            "Synthesize a comparison table answering the question from the passages.\n\
             Question: {}\n\nPassages:\n{}\n\
             Reply with JSON only: {{\"headers\": [\"<col>\", ...], \"rows\": [[\"<cell>\", ...], ...], \
             \"summary\": \"<one-paragraph answer>\"}}. \
             Use an empty rows array if the passages do not support a table.",
            request.question, context
        );

        let start = Instant::now();
        let completion = self
            .llm
            .complete(&ChatRequest::new("You build tables from retrieved text.", prompt))
            .await?;
        usage.add(&completion.usage);
        timings.record("table_extraction_ms", start.elapsed().as_millis() as u64);

        let table: ExtractedTable = parse_structured(&completion.text)?;
        if table.headers.is_empty() || table.rows.is_empty() {
            // No table in the evidence; the router retries with hybrid
            return Err(AppError::StrategyFailed {
                strategy: StrategyKind::Table.as_str().to_string(),
                message: "model returned no table rows".to_string(),
            });
        }

        let cited: Vec<(usize, &smartrag_retrieval::RetrievedChunk)> = retrieval
            .chunks
            .iter()
            .enumerate()
            .map(|(i, c)| (i + 1, c))
            .collect();
        let citations = build_citations(&cited);

        // Confidence follows the evidence strength feeding the table
        let avg_score = retrieval.chunks.iter().map(|c| c.score).sum::<f32>()
            / retrieval.chunks.len() as f32;
        let confidence = (0.5 + 0.5 * avg_score).clamp(0.0, 1.0);

        Ok(StrategyOutcome {
            text: render_table(&table),
            citations,
            confidence,
            token_usage: usage,
            timings,
            chunks_used: retrieval.chunks.len(),
            fallback: None,
            iterations: None,
            truncated: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::ProgressBus;
    use crate::strategy::test_support::{static_retriever, test_chunks};
    use smartrag_common::llm::MockLlm;
    use smartrag_retrieval::Scope;
    use std::time::Duration;

    fn request() -> StrategyRequest {
        StrategyRequest {
            question: "Compare the two novels".into(),
            top_k: 3,
            scope: Scope::All,
        }
    }

    #[test]
    fn test_render_table_markdown() {
        let table = ExtractedTable {
            headers: vec!["Novel".into(), "Author".into()],
            rows: vec![
                vec!["Emma".into(), "Austen".into()],
                vec!["War and Peace".into(), "Tolstoy".into()],
            ],
            summary: "Two novels by different authors.".into(),
        };
        let rendered = render_table(&table);

        assert!(rendered.starts_with("Two novels"));
        assert!(rendered.contains("| Novel | Author |"));
        assert!(rendered.contains("| Emma | Austen |"));
        assert!(rendered.contains("| --- | --- |"));
    }

    #[tokio::test]
    async fn test_run_produces_table_answer() {
        let strategy = TableStrategy::new(static_retriever(test_chunks()), Arc::new(MockLlm));
        let ctx = AskContext::new(ProgressBus::disabled(), Duration::from_secs(10));

        let outcome = strategy.run(&request(), &ctx).await.unwrap();

        assert!(outcome.text.contains('|'));
        assert!(!outcome.citations.is_empty());
        assert!(outcome.chunks_used > 0);
        assert!(outcome.timings.get("table_extraction_ms").is_some());
        assert!(outcome.confidence > 0.0 && outcome.confidence <= 1.0);
    }

    #[tokio::test]
    async fn test_empty_retrieval_is_no_evidence() {
        let strategy = TableStrategy::new(static_retriever(vec![]), Arc::new(MockLlm));
        let ctx = AskContext::new(ProgressBus::disabled(), Duration::from_secs(10));

        let err = strategy.run(&request(), &ctx).await.unwrap_err();
        assert_eq!(err.kind(), smartrag_common::ErrorKind::NoEvidence);
    }

    struct NoTableLlm;

    #[async_trait::async_trait]
    impl smartrag_common::llm::LanguageModel for NoTableLlm {
        async fn complete(
            &self,
            _: &ChatRequest,
        ) -> smartrag_common::errors::Result<smartrag_common::llm::Completion> {
            Ok(smartrag_common::llm::Completion {
                text: r#"{"headers": [], "rows": [], "summary": ""}"#.to_string(),
                usage: TokenUsage::default(),
            })
        }

        fn model_name(&self) -> &str {
            "no-table"
        }
    }

    #[tokio::test]
    async fn test_no_table_is_strategy_failure() {
        let strategy = TableStrategy::new(static_retriever(test_chunks()), Arc::new(NoTableLlm));
        let ctx = AskContext::new(ProgressBus::disabled(), Duration::from_secs(10));

        let err = strategy.run(&request(), &ctx).await.unwrap_err();
        assert_eq!(err.kind(), smartrag_common::ErrorKind::StrategyFailed);
    }
}
