//! Error types for SmartRAG services
//!
//! Provides a comprehensive error handling system with:
//! - Distinct error types for different failure modes
//! - HTTP status code mapping
//! - Structured error responses
//! - Machine-readable error kinds for client handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Machine-readable error kinds
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    // Upstream model/index failures
    EmbeddingUnavailable,
    RerankUnavailable,
    IndexUnavailable,
    LlmUnavailable,
    LlmRateLimited,
    UpstreamUnavailable,

    // Request-level failures
    StrategyFailed,
    NoEvidence,
    DeadlineExceeded,
    QueryIdNotFound,
    InvalidInput,

    // Internal
    ConfigurationError,
    SerializationError,
    InternalError,
}

impl ErrorKind {
    /// Stable wire name for the kind (matches the serde rename)
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::EmbeddingUnavailable => "EMBEDDING_UNAVAILABLE",
            ErrorKind::RerankUnavailable => "RERANK_UNAVAILABLE",
            ErrorKind::IndexUnavailable => "INDEX_UNAVAILABLE",
            ErrorKind::LlmUnavailable => "LLM_UNAVAILABLE",
            ErrorKind::LlmRateLimited => "LLM_RATE_LIMITED",
            ErrorKind::UpstreamUnavailable => "UPSTREAM_UNAVAILABLE",
            ErrorKind::StrategyFailed => "STRATEGY_FAILED",
            ErrorKind::NoEvidence => "NO_EVIDENCE",
            ErrorKind::DeadlineExceeded => "DEADLINE_EXCEEDED",
            ErrorKind::QueryIdNotFound => "QUERY_ID_NOT_FOUND",
            ErrorKind::InvalidInput => "INVALID_INPUT",
            ErrorKind::ConfigurationError => "CONFIGURATION_ERROR",
            ErrorKind::SerializationError => "SERIALIZATION_ERROR",
            ErrorKind::InternalError => "INTERNAL_ERROR",
        }
    }
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Embedding service failures are hard: retrieval cannot proceed
    #[error("Embedding service unavailable: {message}")]
    EmbeddingUnavailable { message: String },

    // Rerank failures are soft at the call site; this variant exists for
    // callers that still want to surface them
    #[error("Rerank service unavailable: {message}")]
    RerankUnavailable { message: String },

    #[error("Index unavailable: {message}")]
    IndexUnavailable { message: String },

    #[error("LLM provider unavailable: {message}")]
    LlmUnavailable { message: String },

    #[error("LLM provider rate limited: {message}")]
    LlmRateLimited { message: String },

    #[error("Upstream unavailable: {message}")]
    UpstreamUnavailable { message: String },

    #[error("Strategy '{strategy}' failed: {message}")]
    StrategyFailed { strategy: String, message: String },

    #[error("No evidence retrieved for the question")]
    NoEvidence,

    #[error("Deadline of {deadline_ms}ms exceeded")]
    DeadlineExceeded { deadline_ms: u64 },

    #[error("Query id not found: {query_id}")]
    QueryIdNotFound { query_id: String },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("Internal server error: {message}")]
    Internal { message: String },

    // Generic
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl AppError {
    /// Get the error kind for this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::EmbeddingUnavailable { .. } => ErrorKind::EmbeddingUnavailable,
            AppError::RerankUnavailable { .. } => ErrorKind::RerankUnavailable,
            AppError::IndexUnavailable { .. } => ErrorKind::IndexUnavailable,
            AppError::LlmUnavailable { .. } => ErrorKind::LlmUnavailable,
            AppError::LlmRateLimited { .. } => ErrorKind::LlmRateLimited,
            AppError::UpstreamUnavailable { .. } => ErrorKind::UpstreamUnavailable,
            AppError::StrategyFailed { .. } => ErrorKind::StrategyFailed,
            AppError::NoEvidence => ErrorKind::NoEvidence,
            AppError::DeadlineExceeded { .. } => ErrorKind::DeadlineExceeded,
            AppError::QueryIdNotFound { .. } => ErrorKind::QueryIdNotFound,
            AppError::InvalidInput { .. } => ErrorKind::InvalidInput,
            AppError::Configuration { .. } => ErrorKind::ConfigurationError,
            AppError::Serialization(_) => ErrorKind::SerializationError,
            AppError::HttpClient(_) => ErrorKind::UpstreamUnavailable,
            AppError::Internal { .. } => ErrorKind::InternalError,
            AppError::Other(_) => ErrorKind::InternalError,
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            AppError::InvalidInput { .. } => StatusCode::BAD_REQUEST,

            // 404 Not Found
            AppError::QueryIdNotFound { .. } => StatusCode::NOT_FOUND,

            // 422 Unprocessable Entity
            AppError::NoEvidence => StatusCode::UNPROCESSABLE_ENTITY,

            // 429 Too Many Requests
            AppError::LlmRateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,

            // 500 Internal Server Error
            AppError::StrategyFailed { .. }
            | AppError::Configuration { .. }
            | AppError::Serialization(_)
            | AppError::Internal { .. }
            | AppError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,

            // 502 Bad Gateway
            AppError::EmbeddingUnavailable { .. }
            | AppError::RerankUnavailable { .. }
            | AppError::LlmUnavailable { .. }
            | AppError::HttpClient(_) => StatusCode::BAD_GATEWAY,

            // 503 Service Unavailable
            AppError::IndexUnavailable { .. } | AppError::UpstreamUnavailable { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }

            // 504 Gateway Timeout
            AppError::DeadlineExceeded { .. } => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    /// Check if this error should be logged at error level
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }

    /// Check if this error is a client error
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }

    /// Short user-visible message; detailed causes stay in logs
    pub fn public_message(&self) -> String {
        match self {
            AppError::InvalidInput { message } => message.clone(),
            AppError::QueryIdNotFound { query_id } => {
                format!("query id {} is unknown or expired", query_id)
            }
            AppError::NoEvidence => "no supporting evidence was found for this question".into(),
            AppError::DeadlineExceeded { deadline_ms } => {
                format!("request exceeded the {}ms deadline", deadline_ms)
            }
            AppError::LlmRateLimited { .. } | AppError::UpstreamUnavailable { .. } => {
                "an upstream service is temporarily unavailable".into()
            }
            err if err.is_server_error() => "an internal error occurred".into(),
            err => err.to_string(),
        }
    }
}

/// Structured error response for the API
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetails,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let kind = self.kind();

        // Log based on severity; the full cause stays server-side
        if self.is_server_error() {
            tracing::error!(
                error = %self,
                kind = kind.as_str(),
                status = status.as_u16(),
                "Server error"
            );
        } else if self.is_client_error() {
            tracing::warn!(
                error = %self,
                kind = kind.as_str(),
                status = status.as_u16(),
                "Client error"
            );
        }

        let body = ErrorResponse {
            error: ErrorDetails {
                kind,
                message: self.public_message(),
                request_id: None, // filled by middleware
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal {
            message: err.to_string(),
        }
    }
}
