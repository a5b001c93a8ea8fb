//! Grounded answer generation
//!
//! Builds the numbered-context prompt, calls the LLM, extracts `[n]`
//! citation markers, and scores confidence. Confidence uses the model's
//! self-reported trailing `Confidence:` line when present; otherwise a
//! heuristic blend of citation coverage, context relevance, and answer
//! length.

use crate::answer::{build_citations, Citation};
use regex_lite::Regex;
use smartrag_common::errors::Result;
use smartrag_common::llm::{ChatRequest, LanguageModel, TokenUsage};
use smartrag_retrieval::RetrievedChunk;
use std::sync::Arc;

const SYSTEM_PROMPT: &str = "You are a research assistant. Answer strictly from the provided \
context. If the context does not contain the answer, say so plainly. Cite sources inline with \
their bracketed numbers, e.g. [1]. End your reply with a line 'Confidence: <value between 0 and 1>'.";

/// Result of one generation pass
#[derive(Debug, Clone)]
pub struct GeneratedAnswer {
    pub text: String,
    pub citations: Vec<Citation>,
    pub confidence: f32,
    pub usage: TokenUsage,
}

/// Grounded answer synthesizer
pub struct AnswerSynthesizer {
    llm: Arc<dyn LanguageModel>,
    max_tokens: usize,
}

impl AnswerSynthesizer {
    pub fn new(llm: Arc<dyn LanguageModel>, max_tokens: usize) -> Self {
        Self { llm, max_tokens }
    }

    /// Generate a grounded answer from retrieved chunks
    ///
    /// `extra_context` is prepended un-numbered (the graph strategy passes
    /// its subgraph rendering here); citations always refer to chunks.
    pub async fn synthesize(
        &self,
        question: &str,
        chunks: &[RetrievedChunk],
        extra_context: Option<&str>,
    ) -> Result<GeneratedAnswer> {
        let prompt = build_prompt(question, chunks, extra_context);
        let request = ChatRequest::new(SYSTEM_PROMPT, prompt).with_max_tokens(self.max_tokens);

        let completion = self.llm.complete(&request).await?;
        smartrag_common::metrics::record_llm_tokens(
            completion.usage.prompt_tokens,
            completion.usage.completion_tokens,
        );

        let (text, reported_confidence) = split_confidence_line(&completion.text);
        let citations = extract_citations(&text, chunks);

        let confidence = match reported_confidence {
            Some(value) => value.clamp(0.0, 1.0),
            None => heuristic_confidence(&text, &citations, chunks),
        };

        Ok(GeneratedAnswer {
            text,
            citations,
            confidence,
            usage: completion.usage,
        })
    }
}

/// Build the grounded prompt with numbered context windows
fn build_prompt(question: &str, chunks: &[RetrievedChunk], extra_context: Option<&str>) -> String {
    let mut prompt = String::new();

    if let Some(extra) = extra_context {
        prompt.push_str(extra);
        prompt.push_str("\n\n");
    }

    prompt.push_str(&format!("Question: {}\n\nContext:\n", question));
    for (i, chunk) in chunks.iter().enumerate() {
        prompt.push_str(&format!(
            "\n[{}] {} (relevance: {:.2})\n{}\n",
            i + 1,
            chunk.source_path,
            chunk.score,
            chunk.content
        ));
    }
    prompt.push_str("\nAnswer:");
    prompt
}

/// Split a trailing `Confidence: x` line off the reply, if present
fn split_confidence_line(reply: &str) -> (String, Option<f32>) {
    let pattern = Regex::new(r"(?i)confidence:\s*([01](?:\.\d+)?)\s*$").expect("static regex");

    match pattern.captures(reply.trim_end()) {
        Some(caps) => {
            let value = caps.get(1).and_then(|m| m.as_str().parse::<f32>().ok());
            let text = pattern.replace(reply.trim_end(), "").trim_end().to_string();
            (text, value)
        }
        None => (reply.trim_end().to_string(), None),
    }
}

/// Map `[n]` markers in the reply to citations, deduplicated per source
///
/// A reply with evidence but no markers cites the top-ranked chunk so a
/// grounded answer never leaves empty-handed.
fn extract_citations(text: &str, chunks: &[RetrievedChunk]) -> Vec<Citation> {
    let marker = Regex::new(r"\[(\d+)\]").expect("static regex");

    let mut cited: Vec<(usize, &RetrievedChunk)> = Vec::new();
    for caps in marker.captures_iter(text) {
        if let Some(idx) = caps.get(1).and_then(|m| m.as_str().parse::<usize>().ok()) {
            if idx >= 1 && idx <= chunks.len() && !cited.iter().any(|(rank, _)| *rank == idx) {
                cited.push((idx, &chunks[idx - 1]));
            }
        }
    }
    cited.sort_by_key(|(rank, _)| *rank);

    if cited.is_empty() {
        if let Some(first) = chunks.first() {
            cited.push((1, first));
        }
    }

    build_citations(&cited)
}

/// Heuristic confidence from citation coverage, context relevance, and
/// answer length
fn heuristic_confidence(text: &str, citations: &[Citation], chunks: &[RetrievedChunk]) -> f32 {
    if chunks.is_empty() {
        return 0.1;
    }

    let coverage = citations.len() as f32 / chunks.len().min(4) as f32;
    let avg_relevance = chunks.iter().take(4).map(|c| c.score).sum::<f32>()
        / chunks.len().min(4) as f32;
    let length_factor = (text.len() as f32 / 400.0).min(1.0);

    (coverage.min(1.0) * 0.4 + avg_relevance * 0.4 + length_factor * 0.2).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use smartrag_common::llm::MockLlm;
    use smartrag_retrieval::Scope;
    use uuid::Uuid;

    fn chunk(id: u128, source: &str, score: f32) -> RetrievedChunk {
        RetrievedChunk {
            chunk_id: Uuid::from_u128(id),
            source_path: source.to_string(),
            ordinal: 0,
            content: format!("supporting passage {}", id),
            score,
            scope: Scope::System,
        }
    }

    #[test]
    fn test_split_confidence_line() {
        let (text, conf) = split_confidence_line("The answer is X [1].\nConfidence: 0.85");
        assert_eq!(text, "The answer is X [1].");
        assert_eq!(conf, Some(0.85));

        let (text, conf) = split_confidence_line("No score here.");
        assert_eq!(text, "No score here.");
        assert_eq!(conf, None);
    }

    #[test]
    fn test_extract_citations_from_markers() {
        let chunks = vec![chunk(1, "a.txt", 0.9), chunk(2, "b.txt", 0.7), chunk(3, "c.txt", 0.5)];
        let citations = extract_citations("Answer uses [2] then [1] again [2].", &chunks);

        assert_eq!(citations.len(), 2);
        assert_eq!(citations[0].source_path, "a.txt");
        assert_eq!(citations[1].source_path, "b.txt");
    }

    #[test]
    fn test_out_of_range_markers_ignored() {
        let chunks = vec![chunk(1, "a.txt", 0.9)];
        let citations = extract_citations("See [7] and [0] and [1].", &chunks);
        assert_eq!(citations.len(), 1);
        assert_eq!(citations[0].source_path, "a.txt");
    }

    #[test]
    fn test_unmarked_reply_cites_top_chunk() {
        let chunks = vec![chunk(1, "a.txt", 0.9), chunk(2, "b.txt", 0.7)];
        let citations = extract_citations("A reply without markers.", &chunks);
        assert_eq!(citations.len(), 1);
        assert_eq!(citations[0].source_path, "a.txt");
        assert_eq!(citations[0].rank, 1);
    }

    #[test]
    fn test_no_chunks_no_citations() {
        assert!(extract_citations("whatever", &[]).is_empty());
    }

    #[test]
    fn test_heuristic_confidence_bounds() {
        let chunks = vec![chunk(1, "a.txt", 0.9)];
        let citations = extract_citations("Answer [1].", &chunks);
        let conf = heuristic_confidence("A reasonably sized answer body here.", &citations, &chunks);
        assert!(conf > 0.0 && conf <= 1.0);
        assert_eq!(heuristic_confidence("text", &[], &[]), 0.1);
    }

    #[tokio::test]
    async fn test_synthesize_with_mock_llm() {
        let synthesizer = AnswerSynthesizer::new(Arc::new(MockLlm), 500);
        let chunks = vec![chunk(1, "books/a.txt", 0.8), chunk(2, "books/b.txt", 0.6)];

        let generated = synthesizer
            .synthesize("Who wrote it?", &chunks, None)
            .await
            .unwrap();

        assert!(!generated.text.is_empty());
        assert!(!generated.text.contains("Confidence:"));
        assert!(!generated.citations.is_empty());
        assert!(generated.confidence > 0.0);
        assert!(generated.usage.total_tokens > 0);
    }

    #[tokio::test]
    async fn test_prompt_numbers_contexts() {
        let chunks = vec![chunk(1, "a.txt", 0.8), chunk(2, "b.txt", 0.6)];
        let prompt = build_prompt("Q?", &chunks, Some("Known entity relationships:\n- a knows b"));
        assert!(prompt.contains("[1] a.txt"));
        assert!(prompt.contains("[2] b.txt"));
        assert!(prompt.starts_with("Known entity relationships:"));
    }
}
