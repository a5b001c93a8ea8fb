//! Health, seed-status, and metrics handlers

use axum::{extract::State, http::header, response::IntoResponse, Json};
use serde::Serialize;

use crate::seed::SeedSnapshot;
use crate::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub onnx_enabled: bool,
    pub int8_enabled: bool,
    pub version: &'static str,
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        onnx_enabled: state.config.embedding.onnx_enabled,
        int8_enabled: state.config.embedding.int8_enabled,
        version: smartrag_common::VERSION,
    })
}

/// GET /seed-status
pub async fn seed_status(State(state): State<AppState>) -> Json<SeedSnapshot> {
    Json(state.seed.snapshot())
}

/// GET /metrics (Prometheus text format)
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}
