//! Feedback handler
//!
//! `POST /feedback` applies a user rating to the arm recorded for the
//! query id. Unknown or expired ids are a 404.

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::AppState;
use smartrag_common::errors::{AppError, Result};

#[derive(Debug, Deserialize, Validate)]
pub struct FeedbackBody {
    pub query_id: Uuid,

    /// Rating in [0, 1]
    #[validate(range(min = 0.0, max = 1.0))]
    pub rating: f64,

    /// Optional free-text comment, logged for operators
    #[validate(length(max = 2000))]
    pub comment: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct FeedbackResponse {
    pub strategy_updated: String,
    pub bandit_updated: bool,
    pub message: String,
}

/// POST /feedback
pub async fn feedback(
    State(state): State<AppState>,
    Json(body): Json<FeedbackBody>,
) -> Result<Json<FeedbackResponse>> {
    body.validate().map_err(|e| AppError::InvalidInput {
        message: e.to_string(),
    })?;

    let outcome = state.router.feedback(body.query_id, body.rating)?;

    if let Some(comment) = &body.comment {
        tracing::info!(
            query_id = %body.query_id,
            rating = body.rating,
            comment = %comment,
            "Feedback comment"
        );
    }

    Ok(Json(FeedbackResponse {
        strategy_updated: outcome.arm.as_str().to_string(),
        bandit_updated: outcome.bandit_updated,
        message: format!(
            "feedback applied to the '{}' strategy",
            outcome.arm.as_str()
        ),
    }))
}
