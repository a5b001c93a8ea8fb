//! Graph strategy (JIT entity graph)
//!
//! Builds entity-graph context on demand: extract the question's entities,
//! JIT-extract relations for entities the graph has not seen (batched,
//! parallel LLM calls under a wall budget), traverse the neighborhood, and
//! generate from the combined subgraph + vector contexts. Committed nodes
//! and edges survive timeouts; growth is monotonic.

use super::{evidence_partial, AskContext, Strategy, StrategyKind, StrategyOutcome, StrategyRequest};
use crate::answer::Timings;
use crate::generate::AnswerSynthesizer;
use crate::graph::EntityGraph;
use crate::progress::RetrievalSummary;
use futures::stream::{self, StreamExt};
use serde::Deserialize;
use smartrag_common::config::GraphConfig;
use smartrag_common::errors::{AppError, Result};
use smartrag_common::llm::{parse_structured, ChatRequest, LanguageModel, TokenUsage};
use smartrag_retrieval::{HybridRetriever, RetrievedChunk};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

pub struct GraphStrategy {
    retriever: Arc<HybridRetriever>,
    synthesizer: Arc<AnswerSynthesizer>,
    llm: Arc<dyn LanguageModel>,
    graph: Arc<RwLock<EntityGraph>>,
    config: GraphConfig,
}

#[derive(Debug, Deserialize)]
struct ExtractedEntities {
    entities: Vec<ExtractedEntity>,
}

#[derive(Debug, Deserialize)]
struct ExtractedEntity {
    name: String,
    #[serde(rename = "type", default)]
    entity_type: String,
}

#[derive(Debug, Deserialize)]
struct ExtractedRelations {
    relations: Vec<ExtractedRelation>,
}

#[derive(Debug, Deserialize)]
struct ExtractedRelation {
    source: String,
    #[serde(default)]
    source_type: String,
    relation: String,
    target: String,
    #[serde(default)]
    target_type: String,
}

impl GraphStrategy {
    pub fn new(
        retriever: Arc<HybridRetriever>,
        synthesizer: Arc<AnswerSynthesizer>,
        llm: Arc<dyn LanguageModel>,
        graph: Arc<RwLock<EntityGraph>>,
        config: GraphConfig,
    ) -> Self {
        Self {
            retriever,
            synthesizer,
            llm,
            graph,
            config,
        }
    }

    /// LLM-structured entity extraction from the question
    async fn extract_entities(&self, question: &str, usage: &mut TokenUsage) -> Result<Vec<String>> {
        let prompt = format!(
            "Extract the named entities and key concepts from the question.\n\
             Question: {}\n\n\
             Reply with JSON only: {{\"entities\": [{{\"name\": \"<entity>\", \"type\": \"<person|place|work|concept>\"}}]}}",
            question
        );
        let request = ChatRequest::new("You extract entities for graph lookups.", prompt);
        let completion = self.llm.complete(&request).await?;
        usage.add(&completion.usage);

        let parsed: ExtractedEntities = parse_structured(&completion.text)?;
        let names = parsed
            .entities
            .into_iter()
            .filter(|e| !e.name.trim().is_empty())
            .map(|e| {
                let name = e.name.trim().to_lowercase();
                self.graph
                    .write()
                    .expect("entity graph lock")
                    .add_mention(&name, if e.entity_type.is_empty() { "concept" } else { &e.entity_type });
                name
            })
            .collect();
        Ok(names)
    }

    /// Extract relations from one chunk batch and merge them into the graph
    async fn extract_batch(&self, batch: &[RetrievedChunk], usage_cell: &BatchUsage) -> Result<usize> {
        let mut context = String::new();
        for chunk in batch {
            context.push_str(&chunk.content);
            context.push_str("\n---\n");
        }

        let prompt = format!(
            "Extract entity relations from the passages below.\n\n{}\n\
             Reply with JSON only: {{\"relations\": [{{\"source\": \"<entity>\", \"source_type\": \"<type>\", \
             \"relation\": \"<verb phrase>\", \"target\": \"<entity>\", \"target_type\": \"<type>\"}}]}}",
            context
        );
        let request = ChatRequest::new("You extract entity-relation triples.", prompt);
        let completion = self.llm.complete(&request).await?;
        usage_cell.record(&completion.usage);

        let parsed: ExtractedRelations = parse_structured(&completion.text)?;
        let count = parsed.relations.len();

        // Hold the write lock only for the merge, never across an await
        let mut graph = self.graph.write().expect("entity graph lock");
        for relation in parsed.relations {
            if !relation.source_type.is_empty() {
                graph.add_mention(&relation.source, &relation.source_type);
            }
            if !relation.target_type.is_empty() {
                graph.add_mention(&relation.target, &relation.target_type);
            }
            graph.add_edge(&relation.source, &relation.relation, &relation.target);
        }
        Ok(count)
    }

    /// JIT build: retrieve chunks for missing entities and run parallel
    /// batched extraction under the wall budget
    async fn jit_build(
        &self,
        missing: &[String],
        request: &StrategyRequest,
        ctx: &AskContext,
        usage: &mut TokenUsage,
    ) {
        if missing.is_empty() {
            return;
        }

        let mut seed_chunks: Vec<RetrievedChunk> = Vec::new();
        for entity in missing {
            match self
                .retriever
                .dense(entity, self.config.max_chunks, request.scope)
                .await
            {
                Ok(result) => seed_chunks.extend(result.chunks),
                Err(e) => {
                    tracing::warn!(entity = %entity, error = %e, "Entity seed retrieval failed");
                }
            }
        }

        // The same chunk can seed several entities; extract it once
        seed_chunks.sort_by_key(|c| c.chunk_id);
        seed_chunks.dedup_by_key(|c| c.chunk_id);

        if seed_chunks.is_empty() {
            return;
        }

        let batches: Vec<Vec<RetrievedChunk>> = seed_chunks
            .chunks(self.config.batch_size.max(1))
            .map(|b| b.to_vec())
            .collect();
        let total = batches.len();
        let completed = AtomicUsize::new(0);
        let usage_cell = BatchUsage::default();

        let budget = Duration::from_millis(self.config.timeout_ms).min(ctx.remaining());
        let build = stream::iter(batches)
            .map(|batch| {
                let completed = &completed;
                let usage_cell = &usage_cell;
                let progress = ctx.progress.clone();
                async move {
                    match self.extract_batch(&batch, usage_cell).await {
                        Ok(relations) => {
                            let done = completed.fetch_add(1, Ordering::Relaxed) + 1;
                            progress.emit_with(
                                format!("Extracted entity batch {}/{}", done, total),
                                Some(serde_json::json!({
                                    "batch": done,
                                    "total": total,
                                    "relations": relations,
                                })),
                            );
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "Batch extraction failed");
                        }
                    }
                }
            })
            .buffer_unordered(self.config.parallelism.max(1))
            .collect::<Vec<()>>();

        if tokio::time::timeout(budget, build).await.is_err() {
            tracing::warn!(
                completed = completed.load(Ordering::Relaxed),
                total,
                budget_ms = budget.as_millis() as u64,
                "JIT graph build hit its wall budget, keeping committed nodes"
            );
        }

        usage.add(&usage_cell.snapshot());
    }
}

/// Token tally shared by the parallel extraction tasks
#[derive(Default)]
struct BatchUsage {
    prompt: AtomicU64,
    completion: AtomicU64,
}

impl BatchUsage {
    fn record(&self, usage: &TokenUsage) {
        self.prompt.fetch_add(usage.prompt_tokens, Ordering::Relaxed);
        self.completion.fetch_add(usage.completion_tokens, Ordering::Relaxed);
    }

    fn snapshot(&self) -> TokenUsage {
        let prompt_tokens = self.prompt.load(Ordering::Relaxed);
        let completion_tokens = self.completion.load(Ordering::Relaxed);
        TokenUsage {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

#[async_trait::async_trait]
impl Strategy for GraphStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Graph
    }

    async fn run(&self, request: &StrategyRequest, ctx: &AskContext) -> Result<StrategyOutcome> {
        let mut timings = Timings::default();
        let mut usage = TokenUsage::default();

        // 1. Entity extraction
        ctx.check_deadline()?;
        ctx.progress.emit("Extracting entities from the question");
        let start = Instant::now();
        let entities = self.extract_entities(&request.question, &mut usage).await?;
        timings.record("entity_extraction_ms", start.elapsed().as_millis() as u64);

        // 2. Missing-entity computation
        ctx.progress.emit("Checking the entity graph for known entities");
        let missing = self
            .graph
            .read()
            .expect("entity graph lock")
            .missing_of(&entities);

        // 3. JIT build for the missing entities
        ctx.check_deadline()?;
        ctx.progress.emit_with(
            "Building graph context for unseen entities",
            Some(serde_json::json!({ "missing": missing.len() })),
        );
        let start = Instant::now();
        self.jit_build(&missing, request, ctx, &mut usage).await;
        timings.record("jit_build_ms", start.elapsed().as_millis() as u64);

        // 4. Neighborhood traversal (copy-on-traverse: owned snapshot)
        ctx.progress.emit("Traversing the entity graph");
        let start = Instant::now();
        let snapshot = self
            .graph
            .read()
            .expect("entity graph lock")
            .traverse(&entities, self.config.max_hops);
        timings.record("graph_query_ms", start.elapsed().as_millis() as u64);

        // 5. Vector retrieval for the original question
        ctx.check_deadline()?;
        ctx.progress.emit("Retrieving supporting passages");
        let start = Instant::now();
        let retrieval = self
            .retriever
            .dense(&request.question, request.top_k, request.scope)
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

        if retrieval.is_empty() && snapshot.is_empty() {
            return Err(AppError::NoEvidence);
        }

        if !retrieval.is_empty() {
            ctx.record_partial(evidence_partial(&retrieval.chunks, &timings));
        }

        // 6. Generation over subgraph + passages
        ctx.check_deadline()?;
        ctx.progress.emit("Generating grounded answer");
        let extra = if snapshot.is_empty() {
            None
        } else {
            Some(snapshot.to_context_text())
        };
        let start = Instant::now();
        let generated = self
            .synthesizer
            .synthesize(&request.question, &retrieval.chunks, extra.as_deref())
            .await?;
        timings.record("generation_ms", start.elapsed().as_millis() as u64);
        usage.add(&generated.usage);

        Ok(StrategyOutcome {
            text: generated.text,
            citations: generated.citations,
            confidence: generated.confidence,
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
    use crate::progress::{ProgressBus, StreamItem};
    use crate::strategy::test_support::{static_retriever, test_chunks};
    use smartrag_common::llm::MockLlm;
    use smartrag_retrieval::Scope;

    fn config() -> GraphConfig {
        GraphConfig {
            max_chunks: 4,
            batch_size: 2,
            timeout_ms: 10_000,
            max_hops: 2,
            parallelism: 2,
        }
    }

    fn strategy(graph: Arc<RwLock<EntityGraph>>) -> GraphStrategy {
        GraphStrategy::new(
            static_retriever(test_chunks()),
            Arc::new(AnswerSynthesizer::new(Arc::new(MockLlm), 500)),
            Arc::new(MockLlm),
            graph,
            config(),
        )
    }

    fn request() -> StrategyRequest {
        StrategyRequest {
            question: "Show the roles and relationships in Sir Roberts Fortune".into(),
            top_k: 3,
            scope: Scope::All,
        }
    }

    #[tokio::test]
    async fn test_run_records_graph_timings() {
        let graph = Arc::new(RwLock::new(EntityGraph::new()));
        let strategy = strategy(graph.clone());
        let ctx = AskContext::new(ProgressBus::disabled(), Duration::from_secs(10));

        let outcome = strategy.run(&request(), &ctx).await.unwrap();

        assert!(outcome.timings.get("entity_extraction_ms").is_some());
        assert!(outcome.timings.get("jit_build_ms").is_some());
        assert!(outcome.timings.get("graph_query_ms").is_some());
        assert!(!outcome.citations.is_empty());
    }

    #[tokio::test]
    async fn test_jit_build_grows_graph_monotonically() {
        let graph = Arc::new(RwLock::new(EntityGraph::new()));
        let strategy = strategy(graph.clone());
        let ctx = AskContext::new(ProgressBus::disabled(), Duration::from_secs(10));

        strategy.run(&request(), &ctx).await.unwrap();
        let after_first = graph.read().unwrap().node_count();
        assert!(after_first > 0);

        strategy.run(&request(), &ctx).await.unwrap();
        assert!(graph.read().unwrap().node_count() >= after_first);
    }

    #[tokio::test]
    async fn test_known_entities_skip_jit_extraction() {
        let graph = Arc::new(RwLock::new(EntityGraph::new()));
        let strategy = strategy(graph.clone());
        let ctx = AskContext::new(ProgressBus::disabled(), Duration::from_secs(10));

        // First run warms the graph; the second should find nothing missing
        strategy.run(&request(), &ctx).await.unwrap();
        let edges_before = graph.read().unwrap().edge_count();

        let missing = {
            let g = graph.read().unwrap();
            g.missing_of(&["roberts".to_string()])
        };
        assert!(missing.is_empty() || edges_before == 0);
    }

    #[tokio::test]
    async fn test_batch_progress_is_emitted() {
        let (bus, mut rx) = ProgressBus::channel(64);
        let graph = Arc::new(RwLock::new(EntityGraph::new()));
        let strategy = strategy(graph);
        let ctx = AskContext::new(bus, Duration::from_secs(10));

        strategy.run(&request(), &ctx).await.unwrap();

        let mut batch_events = 0;
        while let Ok(item) = rx.try_recv() {
            if let StreamItem::Progress(event) = item {
                if let Some(meta) = &event.metadata {
                    if meta.get("batch").is_some() {
                        batch_events += 1;
                        assert!(meta.get("total").is_some());
                    }
                }
            }
        }
        assert!(batch_events >= 1);
    }
}
