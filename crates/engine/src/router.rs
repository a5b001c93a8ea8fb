//! Adaptive router
//!
//! Per request: classify the question, probe the answer cache, compute the
//! eligible arm set (hard routes + per-arm latency cuts), sample the
//! bandit, execute the strategy under the request deadline, validate the
//! evidence (one hybrid fallback), compute the automatic reward, update and
//! persist the bandit, record the query for later feedback, and optionally
//! admit the answer to the cache. A deadline that drops a run mid-flight
//! salvages the strategy's recorded best-so-far outcome as a truncated
//! answer when it carries citations, and degrades to the no-evidence
//! refusal otherwise.

use crate::answer::{Answer, Timings};
use crate::bandit::{auto_reward, blended_reward, Bandit};
use crate::cache::AnswerCache;
use crate::classify::{QueryClass, QueryClassifier};
use crate::progress::ProgressBus;
use crate::registry::{QueryRecord, QueryRegistry};
use crate::strategy::{AskContext, Strategy, StrategyKind, StrategyOutcome, StrategyRequest};
use smartrag_common::config::AppConfig;
use smartrag_common::embeddings::Embedder;
use smartrag_common::errors::{AppError, ErrorKind, Result};
use smartrag_common::llm::{estimate_cost, TokenUsage};
use smartrag_common::metrics;
use smartrag_retrieval::Scope;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use uuid::Uuid;

/// Refusal template for questions with no supporting evidence
const NO_EVIDENCE_TEXT: &str = "I could not find supporting evidence in the corpus for this \
question, so I will not guess. Try rephrasing the question or widening the search scope.";

/// Recent latency samples kept per arm
const LATENCY_WINDOW: usize = 32;

/// One ask request, already validated by the HTTP layer
#[derive(Debug, Clone)]
pub struct AskRequest {
    pub question: String,
    pub top_k: usize,
    pub scope: Scope,
    /// Forces the named arm and skips the bandit update
    pub strategy_override: Option<StrategyKind>,
}

/// Router output
#[derive(Debug, Clone)]
pub struct AskResponse {
    pub answer: Answer,
    pub query_id: Uuid,
}

/// Feedback application result
#[derive(Debug, Clone)]
pub struct FeedbackOutcome {
    pub arm: StrategyKind,
    pub bandit_updated: bool,
}

/// The adaptive router
pub struct Router {
    config: Arc<AppConfig>,
    classifier: QueryClassifier,
    cache: Arc<AnswerCache>,
    bandit: Arc<Bandit>,
    registry: Arc<QueryRegistry>,
    strategies: HashMap<StrategyKind, Arc<dyn Strategy>>,
    /// Primary embedder, for the cache's semantic layer
    embedder: Arc<dyn Embedder>,
    latencies: Mutex<HashMap<StrategyKind, VecDeque<u64>>>,
}

impl Router {
    pub fn new(
        config: Arc<AppConfig>,
        cache: Arc<AnswerCache>,
        bandit: Arc<Bandit>,
        registry: Arc<QueryRegistry>,
        strategies: HashMap<StrategyKind, Arc<dyn Strategy>>,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        Self {
            config,
            classifier: QueryClassifier::new(),
            cache,
            bandit,
            registry,
            strategies,
            embedder,
            latencies: Mutex::new(HashMap::new()),
        }
    }

    /// Handle one question end to end
    pub async fn ask(&self, request: AskRequest, progress: ProgressBus) -> Result<AskResponse> {
        let total_start = Instant::now();

        if request.question.trim().is_empty() {
            return Err(AppError::InvalidInput {
                message: "question must not be empty".to_string(),
            });
        }

        let class = self.classifier.classify(&request.question);
        tracing::debug!(class = class.as_str(), "Question classified");

        // Cache probe; the question embedding is reused for insertion later
        let mut question_embedding: Option<Vec<f32>> = None;
        if self.config.answer_cache.enabled {
            question_embedding = match self.embedder.embed(&request.question).await {
                Ok(vector) => Some(vector),
                Err(e) => {
                    tracing::warn!(error = %e, "Cache embedding failed, semantic layer disabled");
                    None
                }
            };

            if let Some((mut answer, hit)) = self
                .cache
                .lookup(&request.question, question_embedding.as_deref())
            {
                progress.emit_with(
                    "Answer served from cache",
                    Some(serde_json::json!({
                        "layer": hit.layer.as_str(),
                        "similarity": hit.similarity,
                    })),
                );

                let total_ms = total_start.elapsed().as_millis() as u64;
                answer.cache_hit = Some(hit);
                answer.token_usage = TokenUsage::default();
                answer.token_cost_usd = 0.0;
                answer.timings = Timings::default();
                answer.timings.record("total_ms", total_ms);

                // Feedback on cached answers still reaches the original arm
                let query_id = Uuid::new_v4();
                let reward = auto_reward(
                    answer.confidence,
                    !answer.citations.is_empty(),
                    total_ms,
                    self.config.bandit.latency_budget_ms,
                );
                self.registry.insert(QueryRecord::new(
                    query_id,
                    answer.strategy,
                    reward,
                    &request.question,
                ));

                tracing::info!(
                    query_id = %query_id,
                    layer = hit.layer.as_str(),
                    latency_ms = total_ms,
                    "Cache hit"
                );
                return Ok(AskResponse { answer, query_id });
            }
        }

        // Arm selection
        let forced = request.strategy_override.is_some();
        let arm = match request.strategy_override {
            Some(arm) => arm,
            None => {
                let eligible = self.eligible_arms(class);
                let mut rng = rand::thread_rng();
                self.bandit.select(&eligible, &mut rng)
            }
        };

        progress.emit_with(
            format!("Running {} strategy", arm.as_str()),
            Some(serde_json::json!({ "strategy": arm.as_str(), "forced": forced })),
        );

        let strategy_request = StrategyRequest {
            question: request.question.clone(),
            top_k: request.top_k,
            scope: request.scope,
        };
        let ctx = AskContext::new(progress.clone(), self.config.request_deadline());

        let run_start = Instant::now();
        let executed = self.execute_with_fallback(arm, &strategy_request, &ctx).await;
        let latency_ms = run_start.elapsed().as_millis() as u64;

        // Deadline expiry drops the strategy future; salvage the best
        // outcome it recorded. With at least one citation the request still
        // answers, marked truncated; without evidence it degrades to the
        // no-evidence refusal.
        let executed = match executed {
            Err(e) if e.kind() == ErrorKind::DeadlineExceeded => match ctx.take_partial() {
                Some(mut partial) if !partial.citations.is_empty() => {
                    partial.truncated = true;
                    progress.emit("Deadline reached, returning best partial answer");
                    tracing::warn!(
                        arm = arm.as_str(),
                        citations = partial.citations.len(),
                        "Deadline exceeded, salvaging partial answer"
                    );
                    Ok((partial, arm))
                }
                _ => Err(AppError::NoEvidence),
            },
            other => other,
        };

        let (outcome, arm_used) = match executed {
            Ok((outcome, arm_used)) => (outcome, arm_used),
            Err(e) if e.kind() == ErrorKind::NoEvidence => {
                return Ok(self.no_evidence_response(&request, arm, forced, total_start));
            }
            Err(e) => {
                metrics::record_strategy(arm.as_str(), latency_ms as f64 / 1000.0, false);
                return Err(e);
            }
        };

        self.record_latency(arm_used, latency_ms);
        metrics::record_strategy(arm_used.as_str(), latency_ms as f64 / 1000.0, true);

        // Reward and learning
        let reward = auto_reward(
            outcome.confidence,
            !outcome.citations.is_empty(),
            latency_ms,
            self.config.bandit.latency_budget_ms,
        );
        if forced {
            tracing::info!(arm = arm_used.as_str(), forced = true, "Skipping bandit update");
        } else if self.config.bandit.enabled {
            if let Err(e) = self.bandit.update(arm_used, reward, "auto") {
                tracing::error!(error = %e, "Bandit update failed");
            }
        }

        let query_id = Uuid::new_v4();
        self.registry
            .insert(QueryRecord::new(query_id, arm_used, reward, &request.question));

        let total_ms = total_start.elapsed().as_millis() as u64;
        let chunks_used = outcome.chunks_used;
        let answer = self.assemble(outcome, arm_used, total_ms);

        // Quality-gated cache admission
        if self.config.answer_cache.enabled {
            self.cache.put(
                &request.question,
                question_embedding.unwrap_or_default(),
                answer.clone(),
                chunks_used,
            );
        }

        tracing::info!(
            query_id = %query_id,
            strategy = arm_used.as_str(),
            confidence = answer.confidence,
            citations = answer.citations.len(),
            reward,
            latency_ms = total_ms,
            forced,
            "Question answered"
        );

        Ok(AskResponse { answer, query_id })
    }

    /// Apply user feedback to the recorded arm
    pub fn feedback(&self, query_id: Uuid, rating: f64) -> Result<FeedbackOutcome> {
        if !(0.0..=1.0).contains(&rating) {
            return Err(AppError::InvalidInput {
                message: "rating must be within [0, 1]".to_string(),
            });
        }

        let record = self
            .registry
            .lookup(query_id)
            .ok_or_else(|| AppError::QueryIdNotFound {
                query_id: query_id.to_string(),
            })?;

        let bandit_updated = self.config.bandit.enabled;
        if bandit_updated {
            // Additive correction; the automatic update is not rolled back
            let blended = blended_reward(rating, record.auto_reward);
            self.bandit.update(record.arm, blended, "feedback")?;
        }

        tracing::info!(
            query_id = %query_id,
            arm = record.arm.as_str(),
            rating,
            "Feedback applied"
        );

        Ok(FeedbackOutcome {
            arm: record.arm,
            bandit_updated,
        })
    }

    /// Current posterior snapshot, for operators
    pub fn bandit_snapshot(&self) -> HashMap<StrategyKind, crate::bandit::ArmState> {
        self.bandit.snapshot()
    }

    /// Hard routes plus the per-arm latency cut
    fn eligible_arms(&self, class: QueryClass) -> Vec<StrategyKind> {
        match class {
            QueryClass::Relational => vec![StrategyKind::Graph],
            QueryClass::Tabular => vec![StrategyKind::Table],
            _ => {
                let cut = (self.config.bandit.latency_budget_ms as f64 * 1.5) as u64;
                let latencies = self.latencies.lock().expect("latency window lock");
                StrategyKind::ALL
                    .into_iter()
                    .filter(|arm| {
                        // Hybrid stays eligible as the fallback of last resort
                        *arm == StrategyKind::Hybrid
                            || latencies
                                .get(arm)
                                .and_then(|window| p95(window))
                                .map_or(true, |p95| p95 <= cut)
                    })
                    .collect()
            }
        }
    }

    fn record_latency(&self, arm: StrategyKind, latency_ms: u64) {
        let mut latencies = self.latencies.lock().expect("latency window lock");
        let window = latencies.entry(arm).or_default();
        if window.len() == LATENCY_WINDOW {
            window.pop_front();
        }
        window.push_back(latency_ms);
    }

    /// Run the arm under the deadline; failures and empty evidence get one
    /// hybrid retry
    async fn execute_with_fallback(
        &self,
        arm: StrategyKind,
        request: &StrategyRequest,
        ctx: &AskContext,
    ) -> Result<(StrategyOutcome, StrategyKind)> {
        match self.run_arm(arm, request, ctx).await {
            Ok(outcome) if outcome.citations.is_empty() => {
                if arm == StrategyKind::Hybrid {
                    Err(AppError::NoEvidence)
                } else {
                    tracing::warn!(
                        arm = arm.as_str(),
                        "Strategy produced no citations, falling back to hybrid"
                    );
                    self.run_hybrid_fallback(request, ctx).await
                }
            }
            Ok(outcome) => Ok((outcome, arm)),
            // No time left for a hybrid retry; the caller salvages any
            // partial outcome recorded on the context
            Err(e) if e.kind() == ErrorKind::DeadlineExceeded => Err(e),
            Err(e) if arm != StrategyKind::Hybrid => {
                tracing::warn!(
                    arm = arm.as_str(),
                    error = %e,
                    "Strategy failed, falling back to hybrid"
                );
                self.run_hybrid_fallback(request, ctx).await
            }
            Err(e) => Err(e),
        }
    }

    async fn run_hybrid_fallback(
        &self,
        request: &StrategyRequest,
        ctx: &AskContext,
    ) -> Result<(StrategyOutcome, StrategyKind)> {
        ctx.progress.emit("Falling back to hybrid retrieval");
        let outcome = self.run_arm(StrategyKind::Hybrid, request, ctx).await?;
        if outcome.citations.is_empty() {
            return Err(AppError::NoEvidence);
        }
        Ok((outcome, StrategyKind::Hybrid))
    }

    async fn run_arm(
        &self,
        arm: StrategyKind,
        request: &StrategyRequest,
        ctx: &AskContext,
    ) -> Result<StrategyOutcome> {
        let strategy = self.strategies.get(&arm).ok_or_else(|| AppError::StrategyFailed {
            strategy: arm.as_str().to_string(),
            message: "strategy not registered".to_string(),
        })?;

        match tokio::time::timeout(ctx.remaining(), strategy.run(request, ctx)).await {
            Ok(result) => result,
            Err(_) => Err(AppError::DeadlineExceeded {
                deadline_ms: ctx.deadline_ms,
            }),
        }
    }

    fn assemble(&self, outcome: StrategyOutcome, arm: StrategyKind, total_ms: u64) -> Answer {
        let mut timings = outcome.timings;
        timings.record("total_ms", total_ms);

        Answer {
            text: outcome.text,
            citations: outcome.citations,
            confidence: outcome.confidence,
            strategy: arm,
            token_cost_usd: estimate_cost(&outcome.token_usage, &self.config.llm),
            token_usage: outcome.token_usage,
            timings,
            cache_hit: None,
            no_evidence: false,
            truncated: outcome.truncated,
            fallback: outcome.fallback,
            iterations: outcome.iterations,
        }
    }

    /// Refusal answer for questions with no evidence; never cached
    fn no_evidence_response(
        &self,
        request: &AskRequest,
        arm: StrategyKind,
        forced: bool,
        total_start: Instant,
    ) -> AskResponse {
        let total_ms = total_start.elapsed().as_millis() as u64;
        let mut timings = Timings::default();
        timings.record("total_ms", total_ms);

        let reward = auto_reward(0.1, false, total_ms, self.config.bandit.latency_budget_ms);
        if !forced && self.config.bandit.enabled {
            if let Err(e) = self.bandit.update(arm, reward, "auto") {
                tracing::error!(error = %e, "Bandit update failed");
            }
        }

        let query_id = Uuid::new_v4();
        self.registry
            .insert(QueryRecord::new(query_id, arm, reward, &request.question));

        tracing::info!(query_id = %query_id, strategy = arm.as_str(), "No evidence found");

        AskResponse {
            answer: Answer {
                text: NO_EVIDENCE_TEXT.to_string(),
                citations: Vec::new(),
                confidence: 0.1,
                strategy: arm,
                token_usage: TokenUsage::default(),
                token_cost_usd: 0.0,
                timings,
                cache_hit: None,
                no_evidence: true,
                truncated: false,
                fallback: None,
                iterations: None,
            },
            query_id,
        }
    }
}

/// p95 over a latency window
fn p95(window: &VecDeque<u64>) -> Option<u64> {
    if window.is_empty() {
        return None;
    }
    let mut sorted: Vec<u64> = window.iter().copied().collect();
    sorted.sort_unstable();
    let idx = ((sorted.len() as f64) * 0.95).ceil() as usize;
    Some(sorted[idx.saturating_sub(1).min(sorted.len() - 1)])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::answer::Citation;
    use crate::registry::QueryRegistry;
    use crate::state::StateStore;
    use smartrag_common::embeddings::HashEmbedder;
    use std::time::Duration;

    /// Scripted strategy for router tests
    struct ScriptedStrategy {
        kind: StrategyKind,
        behavior: Behavior,
    }

    #[derive(Clone)]
    enum Behavior {
        Answer { citations: usize, confidence: f32 },
        Fail,
        Stall,
        StallAfterPartial,
    }

    fn scripted_outcome(kind: StrategyKind, question: &str, citations: usize, confidence: f32) -> StrategyOutcome {
        StrategyOutcome {
            text: format!("answer from {} to '{}'", kind, question),
            citations: (0..citations)
                .map(|i| Citation {
                    source_path: format!("doc{}.txt", i),
                    snippet: "snippet".into(),
                    score: 0.8,
                    rank: i + 1,
                })
                .collect(),
            confidence,
            token_usage: TokenUsage {
                prompt_tokens: 100,
                completion_tokens: 50,
                total_tokens: 150,
            },
            timings: Timings::default(),
            chunks_used: citations,
            fallback: None,
            iterations: None,
            truncated: false,
        }
    }

    #[async_trait::async_trait]
    impl Strategy for ScriptedStrategy {
        fn kind(&self) -> StrategyKind {
            self.kind
        }

        async fn run(&self, request: &StrategyRequest, ctx: &AskContext) -> Result<StrategyOutcome> {
            match &self.behavior {
                Behavior::Answer { citations, confidence } => {
                    Ok(scripted_outcome(self.kind, &request.question, *citations, *confidence))
                }
                Behavior::Fail => Err(AppError::StrategyFailed {
                    strategy: self.kind.as_str().to_string(),
                    message: "scripted failure".to_string(),
                }),
                Behavior::Stall => {
                    tokio::time::sleep(Duration::from_secs(600)).await;
                    unreachable!("stall never completes")
                }
                Behavior::StallAfterPartial => {
                    ctx.record_partial(scripted_outcome(self.kind, &request.question, 1, 0.6));
                    tokio::time::sleep(Duration::from_secs(600)).await;
                    unreachable!("stall never completes")
                }
            }
        }
    }

    fn router_with(behaviors: HashMap<StrategyKind, Behavior>) -> Router {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(
            dir.path().join("state.json"),
            dir.path().join("default.json"),
        );
        std::mem::forget(dir);

        let mut config = AppConfig::default();
        config.server.request_timeout_secs = 2;
        let config = Arc::new(config);

        let bandit = Arc::new(Bandit::new(HashMap::new(), store, 0.1));
        let cache = Arc::new(AnswerCache::new(Duration::from_secs(3600), 100, 0.85));
        let registry = Arc::new(QueryRegistry::default());

        let strategies: HashMap<StrategyKind, Arc<dyn Strategy>> = behaviors
            .into_iter()
            .map(|(kind, behavior)| {
                (kind, Arc::new(ScriptedStrategy { kind, behavior }) as Arc<dyn Strategy>)
            })
            .collect();

        Router::new(
            config,
            cache,
            bandit,
            registry,
            strategies,
            Arc::new(HashEmbedder::new("test", 32)),
        )
    }

    fn all_answering() -> HashMap<StrategyKind, Behavior> {
        StrategyKind::ALL
            .into_iter()
            .map(|kind| {
                (
                    kind,
                    Behavior::Answer {
                        citations: 2,
                        confidence: 0.8,
                    },
                )
            })
            .collect()
    }

    fn request(question: &str) -> AskRequest {
        AskRequest {
            question: question.to_string(),
            top_k: 5,
            scope: Scope::All,
            strategy_override: None,
        }
    }

    #[tokio::test]
    async fn test_relational_question_routes_to_graph() {
        let router = router_with(all_answering());
        let response = router
            .ask(
                request("Show me the roles and relationships in Sir Roberts Fortune"),
                ProgressBus::disabled(),
            )
            .await
            .unwrap();
        assert_eq!(response.answer.strategy, StrategyKind::Graph);
    }

    #[tokio::test]
    async fn test_tabular_question_routes_to_table() {
        let router = router_with(all_answering());
        let response = router
            .ask(request("Compare Emma vs Persuasion"), ProgressBus::disabled())
            .await
            .unwrap();
        assert_eq!(response.answer.strategy, StrategyKind::Table);
    }

    #[tokio::test]
    async fn test_forced_arm_skips_bandit_update() {
        let router = router_with(all_answering());
        let before = router.bandit_snapshot();

        let mut req = request("Who wrote Emma?");
        req.strategy_override = Some(StrategyKind::Iterative);
        let response = router.ask(req, ProgressBus::disabled()).await.unwrap();

        assert_eq!(response.answer.strategy, StrategyKind::Iterative);
        assert_eq!(
            router.bandit_snapshot()[&StrategyKind::Iterative].trials,
            before[&StrategyKind::Iterative].trials
        );
    }

    #[tokio::test]
    async fn test_second_ask_hits_cache_with_zero_usage() {
        let router = router_with(all_answering());
        let q = "Who wrote Pride and Prejudice?";

        let first = router.ask(request(q), ProgressBus::disabled()).await.unwrap();
        assert!(first.answer.cache_hit.is_none());
        assert!(first.answer.token_usage.total_tokens > 0);
        let trials_after_first: u64 = router.bandit_snapshot().values().map(|a| a.trials).sum();

        let second = router.ask(request(q), ProgressBus::disabled()).await.unwrap();
        let hit = second.answer.cache_hit.expect("expected a cache hit");
        assert_eq!(second.answer.token_usage.total_tokens, 0);
        assert_eq!(second.answer.text, first.answer.text);
        assert!(hit.similarity >= 0.85);

        // Cache hits leave the bandit untouched
        let trials_after_second: u64 = router.bandit_snapshot().values().map(|a| a.trials).sum();
        assert_eq!(trials_after_first, trials_after_second);
    }

    #[tokio::test]
    async fn test_failed_arm_falls_back_to_hybrid() {
        let mut behaviors = all_answering();
        behaviors.insert(StrategyKind::Table, Behavior::Fail);
        let router = router_with(behaviors);

        let response = router
            .ask(request("Compare the two novels"), ProgressBus::disabled())
            .await
            .unwrap();
        assert_eq!(response.answer.strategy, StrategyKind::Hybrid);
    }

    #[tokio::test]
    async fn test_failing_hybrid_surfaces_error() {
        let mut behaviors = all_answering();
        behaviors.insert(StrategyKind::Hybrid, Behavior::Fail);
        let router = router_with(behaviors);

        let mut req = request("Anything at all");
        req.strategy_override = Some(StrategyKind::Hybrid);
        let err = router.ask(req, ProgressBus::disabled()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StrategyFailed);
    }

    #[tokio::test]
    async fn test_citationless_outcome_becomes_no_evidence() {
        let mut behaviors = HashMap::new();
        for kind in StrategyKind::ALL {
            behaviors.insert(
                kind,
                Behavior::Answer {
                    citations: 0,
                    confidence: 0.9,
                },
            );
        }
        let router = router_with(behaviors);

        let response = router
            .ask(request("Unanswerable question"), ProgressBus::disabled())
            .await
            .unwrap();
        assert!(response.answer.no_evidence);
        assert!(response.answer.citations.is_empty());
        assert!(response.answer.confidence <= 0.2);

        // The refusal must not be cached: a repeat does fresh work
        let repeat = router
            .ask(request("Unanswerable question"), ProgressBus::disabled())
            .await
            .unwrap();
        assert!(repeat.answer.cache_hit.is_none());
    }

    #[tokio::test]
    async fn test_stall_without_evidence_degrades_to_no_evidence() {
        let mut behaviors = all_answering();
        behaviors.insert(StrategyKind::Hybrid, Behavior::Stall);
        let router = router_with(behaviors);

        // Nothing was retrieved before the stall, so there is nothing to
        // salvage at the deadline
        let mut req = request("Slow question");
        req.strategy_override = Some(StrategyKind::Hybrid);
        let response = router.ask(req, ProgressBus::disabled()).await.unwrap();
        assert!(response.answer.no_evidence);
        assert!(response.answer.citations.is_empty());
        assert!(!response.answer.truncated);
    }

    #[tokio::test]
    async fn test_stall_after_evidence_salvages_truncated_answer() {
        let mut behaviors = all_answering();
        behaviors.insert(StrategyKind::Hybrid, Behavior::StallAfterPartial);
        let router = router_with(behaviors);

        let mut req = request("Slow question with evidence");
        req.strategy_override = Some(StrategyKind::Hybrid);
        let response = router.ask(req, ProgressBus::disabled()).await.unwrap();

        assert!(response.answer.truncated);
        assert!(!response.answer.no_evidence);
        assert_eq!(response.answer.citations.len(), 1);
        assert_eq!(response.answer.strategy, StrategyKind::Hybrid);

        // Truncated answers never enter the cache: a repeat does fresh
        // work and times out again
        let mut repeat = request("Slow question with evidence");
        repeat.strategy_override = Some(StrategyKind::Hybrid);
        let second = router.ask(repeat, ProgressBus::disabled()).await.unwrap();
        assert!(second.answer.cache_hit.is_none());
        assert!(second.answer.truncated);
    }

    #[tokio::test]
    async fn test_feedback_round_trip() {
        let router = router_with(all_answering());
        let response = router
            .ask(request("Who wrote Emma?"), ProgressBus::disabled())
            .await
            .unwrap();
        let arm = response.answer.strategy;
        let mean_before = router.bandit_snapshot()[&arm].mean();

        let outcome = router.feedback(response.query_id, 1.0).unwrap();
        assert_eq!(outcome.arm, arm);
        assert!(outcome.bandit_updated);
        assert!(router.bandit_snapshot()[&arm].mean() > mean_before);
    }

    #[tokio::test]
    async fn test_feedback_unknown_id_is_404() {
        let router = router_with(all_answering());
        let err = router.feedback(Uuid::new_v4(), 0.5).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::QueryIdNotFound);
    }

    #[tokio::test]
    async fn test_feedback_rejects_out_of_range_rating() {
        let router = router_with(all_answering());
        let err = router.feedback(Uuid::new_v4(), 1.5).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn test_repeated_downvotes_lower_graph_mean() {
        let router = router_with(all_answering());
        let q = "Show me the roles and relationships in the novel";

        let first = router.ask(request(q), ProgressBus::disabled()).await.unwrap();
        assert_eq!(first.answer.strategy, StrategyKind::Graph);
        let mean_after_first = router.bandit_snapshot()[&StrategyKind::Graph].mean();

        // Cache returns the same answer; each query id still accepts feedback
        for _ in 0..50 {
            let response = router.ask(request(q), ProgressBus::disabled()).await.unwrap();
            router.feedback(response.query_id, 0.0).unwrap();
        }

        assert!(router.bandit_snapshot()[&StrategyKind::Graph].mean() < mean_after_first);
    }

    #[tokio::test]
    async fn test_empty_question_is_invalid_input() {
        let router = router_with(all_answering());
        let err = router
            .ask(request("   "), ProgressBus::disabled())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn test_latency_cut_excludes_slow_arms() {
        let router = router_with(all_answering());
        // Budget 8000ms; 1.5x cut = 12000ms
        for _ in 0..20 {
            router.record_latency(StrategyKind::Iterative, 20_000);
        }

        let eligible = router.eligible_arms(QueryClass::Factual);
        assert!(!eligible.contains(&StrategyKind::Iterative));
        assert!(eligible.contains(&StrategyKind::Hybrid));
        assert!(eligible.contains(&StrategyKind::Graph));
    }
}
