//! SmartRAG Common Library
//!
//! Shared code for the SmartRAG service including:
//! - Error types and handling
//! - Configuration management
//! - Embedding and rerank client abstractions
//! - LLM provider client
//! - Metrics and observability

pub mod config;
pub mod embeddings;
pub mod errors;
pub mod llm;
pub mod metrics;
pub mod rerank;

// Re-export commonly used types
pub use config::AppConfig;
pub use embeddings::{Embedder, EmbeddingClient};
pub use errors::{AppError, ErrorKind, Result};
pub use llm::{LanguageModel, TokenUsage};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default embedding dimension
pub const DEFAULT_EMBEDDING_DIMENSION: usize = 768;
