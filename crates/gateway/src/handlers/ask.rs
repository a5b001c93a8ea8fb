//! Ask handlers
//!
//! `POST /ask-smart` lets the bandit pick the arm; the `/ask-<arm>`
//! variants force one. Forced runs are answered identically but never
//! update the bandit.

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::AppState;
use smartrag_common::errors::{AppError, Result};
use smartrag_common::llm::TokenUsage;
use smartrag_common::metrics::RequestMetrics;
use smartrag_engine::answer::{Answer, Citation, Timings};
use smartrag_engine::cache::CacheHitInfo;
use smartrag_engine::progress::ProgressBus;
use smartrag_engine::router::{AskRequest, AskResponse};
use smartrag_engine::strategy::StrategyKind;
use smartrag_retrieval::Scope;

const DEFAULT_TOP_K: usize = 5;
const MAX_TOP_K: usize = 50;

/// Ask request body
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct AskBody {
    #[validate(length(min = 1, max = 2000))]
    pub question: String,

    /// Number of chunks to retrieve (1..=50)
    pub top_k: Option<usize>,

    /// Search scope: system, user, all (default)
    pub scope: Option<Scope>,

    /// Force a named arm even on /ask-smart
    pub strategy_override: Option<String>,
}

/// Ask response, flattened for the wire
#[derive(Debug, Serialize)]
pub struct AskApiResponse {
    pub answer: String,
    pub query_id: Uuid,
    pub selected_strategy: StrategyKind,
    pub confidence: f32,
    pub citations: Vec<Citation>,
    pub token_usage: TokenUsage,
    pub token_cost_usd: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_hit: Option<CacheHitInfo>,
    pub timings: Timings,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub no_evidence: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub truncated: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub fallback_triggered: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iterations: Option<u32>,
}

impl AskApiResponse {
    pub fn from_engine(response: AskResponse) -> Self {
        let AskResponse { answer, query_id } = response;
        let Answer {
            text,
            citations,
            confidence,
            strategy,
            token_usage,
            token_cost_usd,
            timings,
            cache_hit,
            no_evidence,
            truncated,
            fallback,
            iterations,
        } = answer;

        Self {
            answer: text,
            query_id,
            selected_strategy: strategy,
            confidence,
            citations,
            token_usage,
            token_cost_usd,
            cache_hit,
            timings,
            no_evidence,
            truncated,
            fallback_triggered: fallback.is_some(),
            fallback_latency_ms: fallback.map(|f| f.latency_ms),
            iterations,
        }
    }
}

/// Convert an HTTP body into a router request
pub fn to_ask_request(body: AskBody, forced: Option<StrategyKind>) -> Result<AskRequest> {
    body.validate().map_err(|e| AppError::InvalidInput {
        message: e.to_string(),
    })?;

    let strategy_override = match (forced, body.strategy_override.as_deref()) {
        (Some(arm), _) => Some(arm),
        (None, Some(name)) => Some(StrategyKind::parse(name).ok_or_else(|| {
            AppError::InvalidInput {
                message: format!("unknown strategy '{}'", name),
            }
        })?),
        (None, None) => None,
    };

    let top_k = body.top_k.unwrap_or(DEFAULT_TOP_K);
    if !(1..=MAX_TOP_K).contains(&top_k) {
        return Err(AppError::InvalidInput {
            message: format!("top_k must be within 1..={}", MAX_TOP_K),
        });
    }

    Ok(AskRequest {
        question: body.question,
        top_k,
        scope: body.scope.unwrap_or_default(),
        strategy_override,
    })
}

async fn run_ask(
    state: AppState,
    body: AskBody,
    forced: Option<StrategyKind>,
    endpoint: &str,
) -> Result<Json<AskApiResponse>> {
    let request_metrics = RequestMetrics::start(endpoint);
    let request = to_ask_request(body, forced)?;

    let result = state.router.ask(request, ProgressBus::disabled()).await;
    request_metrics.finish(match &result {
        Ok(_) => 200,
        Err(e) => e.status_code().as_u16(),
    });

    let response = result?;
    tracing::info!(
        endpoint,
        query_id = %response.query_id,
        strategy = response.answer.strategy.as_str(),
        "Ask completed"
    );
    Ok(Json(AskApiResponse::from_engine(response)))
}

/// POST /ask-smart
pub async fn ask_smart(
    State(state): State<AppState>,
    Json(body): Json<AskBody>,
) -> Result<Json<AskApiResponse>> {
    run_ask(state, body, None, "/ask-smart").await
}

/// POST /ask-hybrid
pub async fn ask_hybrid(
    State(state): State<AppState>,
    Json(body): Json<AskBody>,
) -> Result<Json<AskApiResponse>> {
    run_ask(state, body, Some(StrategyKind::Hybrid), "/ask-hybrid").await
}

/// POST /ask-iterative
pub async fn ask_iterative(
    State(state): State<AppState>,
    Json(body): Json<AskBody>,
) -> Result<Json<AskApiResponse>> {
    run_ask(state, body, Some(StrategyKind::Iterative), "/ask-iterative").await
}

/// POST /ask-graph
pub async fn ask_graph(
    State(state): State<AppState>,
    Json(body): Json<AskBody>,
) -> Result<Json<AskApiResponse>> {
    run_ask(state, body, Some(StrategyKind::Graph), "/ask-graph").await
}

/// POST /ask-table
pub async fn ask_table(
    State(state): State<AppState>,
    Json(body): Json<AskBody>,
) -> Result<Json<AskApiResponse>> {
    run_ask(state, body, Some(StrategyKind::Table), "/ask-table").await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(question: &str) -> AskBody {
        AskBody {
            question: question.to_string(),
            top_k: None,
            scope: None,
            strategy_override: None,
        }
    }

    #[test]
    fn test_defaults_applied() {
        let request = to_ask_request(body("Who wrote Emma?"), None).unwrap();
        assert_eq!(request.top_k, DEFAULT_TOP_K);
        assert_eq!(request.scope, Scope::All);
        assert!(request.strategy_override.is_none());
    }

    #[test]
    fn test_forced_endpoint_wins_over_body_override() {
        let mut b = body("q");
        b.strategy_override = Some("table".into());
        let request = to_ask_request(b, Some(StrategyKind::Graph)).unwrap();
        assert_eq!(request.strategy_override, Some(StrategyKind::Graph));
    }

    #[test]
    fn test_body_override_parsed() {
        let mut b = body("q");
        b.strategy_override = Some("iterative".into());
        let request = to_ask_request(b, None).unwrap();
        assert_eq!(request.strategy_override, Some(StrategyKind::Iterative));
    }

    #[test]
    fn test_unknown_override_rejected() {
        let mut b = body("q");
        b.strategy_override = Some("quantum".into());
        let err = to_ask_request(b, None).unwrap_err();
        assert_eq!(err.kind(), smartrag_common::ErrorKind::InvalidInput);
    }

    #[test]
    fn test_top_k_bounds() {
        let mut b = body("q");
        b.top_k = Some(0);
        assert!(to_ask_request(b.clone(), None).is_err());
        b.top_k = Some(51);
        assert!(to_ask_request(b.clone(), None).is_err());
        b.top_k = Some(50);
        assert!(to_ask_request(b, None).is_ok());
    }

    #[test]
    fn test_empty_question_rejected() {
        let err = to_ask_request(body(""), None).unwrap_err();
        assert_eq!(err.kind(), smartrag_common::ErrorKind::InvalidInput);
    }
}
