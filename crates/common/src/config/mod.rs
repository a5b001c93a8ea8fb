//! Configuration management for SmartRAG
//!
//! Supports loading configuration from:
//! - Configuration files (config/default.toml, config/local.toml)
//! - Environment variables (the recognized keys listed per section)
//! - Default values

use config::{Config, ConfigError, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Server configuration
    pub server: ServerConfig,

    /// Embedding service configuration
    pub embedding: EmbeddingConfig,

    /// Rerank service configuration
    pub rerank: RerankConfig,

    /// Vector index configuration
    pub vector_index: VectorIndexConfig,

    /// Keyword index (BM25) configuration
    pub keyword_index: KeywordIndexConfig,

    /// LLM provider configuration
    pub llm: LlmConfig,

    /// Hybrid retrieval configuration
    pub hybrid: HybridConfig,

    /// File-level fallback configuration
    pub file_fallback: FileFallbackConfig,

    /// Self-RAG iterative refinement configuration
    pub self_rag: SelfRagConfig,

    /// JIT entity graph configuration
    pub graph: GraphConfig,

    /// Answer cache configuration
    pub answer_cache: AnswerCacheConfig,

    /// Bandit configuration
    pub bandit: BanditConfig,

    /// Observability configuration
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Per-request deadline in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Shutdown timeout in seconds
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

/// Recognized env keys: `EMBEDDING_API_URL`, `EMBEDDING_API_KEY`
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmbeddingConfig {
    /// Embedding service base URL
    #[serde(default = "default_embedding_url")]
    pub base_url: String,

    /// API key, if the service requires one
    pub api_key: Option<String>,

    /// Primary model; its dimension must match the vector index
    #[serde(default = "default_embedding_model")]
    pub primary_model: String,

    /// Fallback model, used only by the file-level rescue path
    #[serde(default = "default_fallback_model")]
    pub fallback_model: String,

    /// Primary model vector dimension
    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,

    /// Request timeout in seconds
    #[serde(default = "default_client_timeout")]
    pub timeout_secs: u64,

    /// Maximum retries before EMBEDDING_UNAVAILABLE
    #[serde(default = "default_embedding_retries")]
    pub max_retries: u32,

    /// Batch size for embed_batch requests
    #[serde(default = "default_embedding_batch")]
    pub batch_size: usize,

    /// Whether the service runs an ONNX runtime (reported by /health)
    #[serde(default)]
    pub onnx_enabled: bool,

    /// Whether int8 quantization is active (reported by /health)
    #[serde(default)]
    pub int8_enabled: bool,
}

/// Recognized env key: `RERANK_API_URL`
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RerankConfig {
    /// Rerank service base URL
    #[serde(default = "default_rerank_url")]
    pub base_url: String,

    /// API key, if the service requires one
    pub api_key: Option<String>,

    /// Primary cross-encoder model
    #[serde(default = "default_rerank_model")]
    pub model: String,

    /// Faster fallback model used while p95 latency is elevated
    #[serde(default = "default_rerank_fallback_model")]
    pub fallback_model: String,

    /// p95 latency threshold that flips to the fallback model, in ms
    #[serde(default = "default_rerank_p95_threshold")]
    pub p95_threshold_ms: u64,

    /// Number of recent calls in the latency window
    #[serde(default = "default_rerank_window")]
    pub latency_window: usize,

    /// Request timeout in seconds
    #[serde(default = "default_client_timeout")]
    pub timeout_secs: u64,
}

/// Recognized env keys: `VECTOR_INDEX_URL`, `VECTOR_INDEX_API_KEY`,
/// `VECTOR_COLLECTION`
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VectorIndexConfig {
    /// ANN service base URL
    #[serde(default = "default_vector_url")]
    pub base_url: String,

    /// API key, if the service requires one
    pub api_key: Option<String>,

    /// Collection to search
    #[serde(default = "default_collection")]
    pub collection: String,

    /// Request timeout in seconds
    #[serde(default = "default_client_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct KeywordIndexConfig {
    /// JSONL chunk corpus the index is built from
    #[serde(default = "default_corpus_file")]
    pub corpus_file: String,

    /// Directory holding the serialized index artifact
    #[serde(default = "default_cache_dir")]
    pub cache_dir: String,
}

/// Recognized env keys: `LLM_API_URL`, `LLM_API_KEY`, `LLM_MODEL`
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LlmConfig {
    /// Chat-completions endpoint
    #[serde(default = "default_llm_url")]
    pub base_url: String,

    /// API key; when absent the client runs in deterministic mock mode
    pub api_key: Option<String>,

    /// Model name
    #[serde(default = "default_llm_model")]
    pub model: String,

    /// Maximum output tokens per call
    #[serde(default = "default_llm_max_tokens")]
    pub max_tokens: usize,

    /// Sampling temperature
    #[serde(default = "default_llm_temperature")]
    pub temperature: f32,

    /// Request timeout in seconds
    #[serde(default = "default_client_timeout")]
    pub timeout_secs: u64,

    /// Maximum retries on rate limits / transient failures
    #[serde(default = "default_llm_retries")]
    pub max_retries: u32,

    /// USD per 1k prompt tokens, for cost estimates
    #[serde(default = "default_prompt_cost")]
    pub prompt_cost_per_1k: f64,

    /// USD per 1k completion tokens, for cost estimates
    #[serde(default = "default_completion_cost")]
    pub completion_cost_per_1k: f64,
}

/// Recognized env keys: `HYBRID_ALPHA`, `BM25_TOP_K`
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HybridConfig {
    /// Dense-score weight in weighted fusion
    #[serde(default = "default_hybrid_alpha")]
    pub alpha: f32,

    /// Fusion mode: "weighted" or "rrf"
    #[serde(default = "default_fusion_mode")]
    pub fusion_mode: String,

    /// RRF rank constant
    #[serde(default = "default_rrf_c")]
    pub rrf_c: f32,

    /// Keyword-side candidate count
    #[serde(default = "default_bm25_top_k")]
    pub bm25_top_k: usize,

    /// Candidate expansion factor for each side (k_v = k_b = k * multiplier)
    #[serde(default = "default_candidate_multiplier")]
    pub candidate_multiplier: usize,

    /// Enable cross-encoder rerank over the fused top 2k
    #[serde(default = "default_true")]
    pub rerank_enabled: bool,
}

/// Recognized env keys: `ENABLE_FILE_LEVEL_FALLBACK`,
/// `CONFIDENCE_FALLBACK_THRESHOLD`, `FILE_FALLBACK_CHUNK_SIZE`,
/// `FILE_FALLBACK_CHUNK_OVERLAP`
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FileFallbackConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Top-1 score below which the fallback triggers
    #[serde(default = "default_fallback_threshold")]
    pub score_threshold: f32,

    /// Window size in tokens
    #[serde(default = "default_fallback_chunk_size")]
    pub chunk_size: usize,

    /// Window overlap in tokens
    #[serde(default = "default_fallback_chunk_overlap")]
    pub chunk_overlap: usize,

    /// Root directory source-document paths are resolved against
    #[serde(default = "default_corpus_root")]
    pub corpus_root: String,
}

/// Recognized env keys: `ENABLE_SELF_RAG`, `SELF_RAG_CONFIDENCE_THRESHOLD`,
/// `SELF_RAG_MAX_ITERATIONS`, `SELF_RAG_MIN_IMPROVEMENT`
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SelfRagConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Confidence at which refinement stops
    #[serde(default = "default_self_rag_confidence")]
    pub confidence_threshold: f32,

    /// Maximum refinement iterations
    #[serde(default = "default_self_rag_iterations")]
    pub max_iterations: u32,

    /// Minimum marginal confidence improvement to continue
    #[serde(default = "default_self_rag_improvement")]
    pub min_improvement: f32,
}

/// Recognized env keys: `GRAPH_JIT_MAX_CHUNKS`, `GRAPH_JIT_BATCH_SIZE`,
/// `GRAPH_JIT_TIMEOUT_MS`
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GraphConfig {
    /// Chunks retrieved per missing entity
    #[serde(default = "default_graph_max_chunks")]
    pub max_chunks: usize,

    /// Chunks per LLM extraction batch
    #[serde(default = "default_graph_batch_size")]
    pub batch_size: usize,

    /// Wall-clock budget for the JIT build, in ms
    #[serde(default = "default_graph_timeout")]
    pub timeout_ms: u64,

    /// Traversal depth from query entities
    #[serde(default = "default_graph_hops")]
    pub max_hops: usize,

    /// Parallel LLM extraction tasks
    #[serde(default = "default_graph_parallelism")]
    pub parallelism: usize,
}

/// Recognized env keys: `ENABLE_QUERY_CACHE`, `ANSWER_CACHE_TTL_HOURS`,
/// `ANSWER_CACHE_MAX_SIZE`, `ANSWER_CACHE_SIMILARITY_THRESHOLD`
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AnswerCacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Entry lifetime in hours
    #[serde(default = "default_cache_ttl_hours")]
    pub ttl_hours: u64,

    /// LRU capacity
    #[serde(default = "default_cache_max_size")]
    pub max_size: usize,

    /// Cosine threshold shared by the lexical and semantic layers
    #[serde(default = "default_cache_similarity")]
    pub similarity_threshold: f32,
}

/// Recognized env keys: `BANDIT_STATE_FILE`, `SMART_RAG_BANDIT_ENABLED`,
/// `SMART_RAG_LATENCY_BUDGET_MS`
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BanditConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Runtime state path, rewritten atomically after every update
    #[serde(default = "default_bandit_state_file")]
    pub state_file: String,

    /// Committed pre-warmed default state, read-only
    #[serde(default = "default_bandit_default_file")]
    pub default_state_file: String,

    /// Latency budget B for the reward function, in ms
    #[serde(default = "default_latency_budget")]
    pub latency_budget_ms: u64,

    /// Exploration bonus weight
    #[serde(default = "default_epsilon")]
    pub epsilon: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default)]
    pub json_logging: bool,

    /// Service name for log fields
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }
fn default_request_timeout() -> u64 { 30 }
fn default_shutdown_timeout() -> u64 { 30 }
fn default_embedding_url() -> String { "http://localhost:8081".to_string() }
fn default_embedding_model() -> String { "bge-base-en-v1.5".to_string() }
fn default_fallback_model() -> String { "all-minilm-l6-v2".to_string() }
fn default_embedding_dimension() -> usize { 768 }
fn default_client_timeout() -> u64 { 30 }
fn default_embedding_retries() -> u32 { 3 }
fn default_embedding_batch() -> usize { 32 }
fn default_rerank_url() -> String { "http://localhost:8082".to_string() }
fn default_rerank_model() -> String { "bge-reranker-base".to_string() }
fn default_rerank_fallback_model() -> String { "ms-marco-minilm-l6".to_string() }
fn default_rerank_p95_threshold() -> u64 { 1000 }
fn default_rerank_window() -> usize { 32 }
fn default_vector_url() -> String { "http://localhost:6333".to_string() }
fn default_collection() -> String { "corpus_chunks".to_string() }
fn default_corpus_file() -> String { "data/chunks.jsonl".to_string() }
fn default_cache_dir() -> String { ".cache/smartrag".to_string() }
fn default_llm_url() -> String { "https://api.openai.com/v1/chat/completions".to_string() }
fn default_llm_model() -> String { "gpt-4o-mini".to_string() }
fn default_llm_max_tokens() -> usize { 1000 }
fn default_llm_temperature() -> f32 { 0.2 }
fn default_llm_retries() -> u32 { 3 }
fn default_prompt_cost() -> f64 { 0.000_15 }
fn default_completion_cost() -> f64 { 0.000_6 }
fn default_hybrid_alpha() -> f32 { 0.7 }
fn default_fusion_mode() -> String { "weighted".to_string() }
fn default_rrf_c() -> f32 { 60.0 }
fn default_bm25_top_k() -> usize { 20 }
fn default_candidate_multiplier() -> usize { 2 }
fn default_fallback_threshold() -> f32 { 0.65 }
fn default_fallback_chunk_size() -> usize { 500 }
fn default_fallback_chunk_overlap() -> usize { 50 }
fn default_corpus_root() -> String { "data/corpus".to_string() }
fn default_self_rag_confidence() -> f32 { 0.75 }
fn default_self_rag_iterations() -> u32 { 3 }
fn default_self_rag_improvement() -> f32 { 0.05 }
fn default_graph_max_chunks() -> usize { 12 }
fn default_graph_batch_size() -> usize { 4 }
fn default_graph_timeout() -> u64 { 30_000 }
fn default_graph_hops() -> usize { 2 }
fn default_graph_parallelism() -> usize { 4 }
fn default_cache_ttl_hours() -> u64 { 24 }
fn default_cache_max_size() -> usize { 1000 }
fn default_cache_similarity() -> f32 { 0.85 }
fn default_bandit_state_file() -> String { "data/bandit_state.json".to_string() }
fn default_bandit_default_file() -> String { "data/bandit_default.json".to_string() }
fn default_latency_budget() -> u64 { 8000 }
fn default_epsilon() -> f64 { 0.1 }
fn default_log_level() -> String { "info".to_string() }
fn default_service_name() -> String { "smartrag".to_string() }
fn default_true() -> bool { true }

/// (env key, config path, value type) table for the recognized overrides
const ENV_OVERRIDES: &[(&str, &str, EnvValue)] = &[
    ("BANDIT_STATE_FILE", "bandit.state_file", EnvValue::Str),
    ("SMART_RAG_BANDIT_ENABLED", "bandit.enabled", EnvValue::Bool),
    ("SMART_RAG_LATENCY_BUDGET_MS", "bandit.latency_budget_ms", EnvValue::Int),
    ("HYBRID_ALPHA", "hybrid.alpha", EnvValue::Float),
    ("BM25_TOP_K", "hybrid.bm25_top_k", EnvValue::Int),
    ("ENABLE_QUERY_CACHE", "answer_cache.enabled", EnvValue::Bool),
    ("ANSWER_CACHE_TTL_HOURS", "answer_cache.ttl_hours", EnvValue::Int),
    ("ANSWER_CACHE_MAX_SIZE", "answer_cache.max_size", EnvValue::Int),
    ("ANSWER_CACHE_SIMILARITY_THRESHOLD", "answer_cache.similarity_threshold", EnvValue::Float),
    ("ENABLE_SELF_RAG", "self_rag.enabled", EnvValue::Bool),
    ("SELF_RAG_CONFIDENCE_THRESHOLD", "self_rag.confidence_threshold", EnvValue::Float),
    ("SELF_RAG_MAX_ITERATIONS", "self_rag.max_iterations", EnvValue::Int),
    ("SELF_RAG_MIN_IMPROVEMENT", "self_rag.min_improvement", EnvValue::Float),
    ("ENABLE_FILE_LEVEL_FALLBACK", "file_fallback.enabled", EnvValue::Bool),
    ("CONFIDENCE_FALLBACK_THRESHOLD", "file_fallback.score_threshold", EnvValue::Float),
    ("FILE_FALLBACK_CHUNK_SIZE", "file_fallback.chunk_size", EnvValue::Int),
    ("FILE_FALLBACK_CHUNK_OVERLAP", "file_fallback.chunk_overlap", EnvValue::Int),
    ("GRAPH_JIT_MAX_CHUNKS", "graph.max_chunks", EnvValue::Int),
    ("GRAPH_JIT_BATCH_SIZE", "graph.batch_size", EnvValue::Int),
    ("GRAPH_JIT_TIMEOUT_MS", "graph.timeout_ms", EnvValue::Int),
    ("VECTOR_INDEX_URL", "vector_index.base_url", EnvValue::Str),
    ("VECTOR_INDEX_API_KEY", "vector_index.api_key", EnvValue::Str),
    ("VECTOR_COLLECTION", "vector_index.collection", EnvValue::Str),
    ("EMBEDDING_API_URL", "embedding.base_url", EnvValue::Str),
    ("EMBEDDING_API_KEY", "embedding.api_key", EnvValue::Str),
    ("RERANK_API_URL", "rerank.base_url", EnvValue::Str),
    ("LLM_API_URL", "llm.base_url", EnvValue::Str),
    ("LLM_API_KEY", "llm.api_key", EnvValue::Str),
    ("LLM_MODEL", "llm.model", EnvValue::Str),
];

#[derive(Clone, Copy)]
enum EnvValue {
    Str,
    Bool,
    Int,
    Float,
}

fn parse_bool(raw: &str) -> bool {
    matches!(raw.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

impl AppConfig {
    /// Load configuration from defaults, files, and environment overrides
    pub fn load() -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            // Start with defaults
            .add_source(Config::try_from(&AppConfig::default())?)
            // Load base config file
            .add_source(File::with_name("config/default").required(false))
            // Load local overrides
            .add_source(File::with_name("config/local").required(false));

        // Apply the recognized env keys; they do not share a prefix
        for (env_key, path, value_kind) in ENV_OVERRIDES {
            let Ok(raw) = std::env::var(env_key) else {
                continue;
            };
            builder = match value_kind {
                EnvValue::Str => builder.set_override(*path, raw)?,
                EnvValue::Bool => builder.set_override(*path, parse_bool(&raw))?,
                EnvValue::Int => {
                    let parsed: i64 = raw.parse().map_err(|_| {
                        ConfigError::Message(format!("{} must be an integer, got '{}'", env_key, raw))
                    })?;
                    builder.set_override(*path, parsed)?
                }
                EnvValue::Float => {
                    let parsed: f64 = raw.parse().map_err(|_| {
                        ConfigError::Message(format!("{} must be a number, got '{}'", env_key, raw))
                    })?;
                    builder.set_override(*path, parsed)?
                }
            };
        }

        builder.build()?.try_deserialize()
    }

    /// Per-request deadline as a Duration
    pub fn request_deadline(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs)
    }

    /// Shutdown timeout as a Duration
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.server.shutdown_timeout_secs)
    }

    /// Answer cache TTL as a Duration
    pub fn answer_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.answer_cache.ttl_hours * 3600)
    }

    /// JIT graph wall budget as a Duration
    pub fn graph_timeout(&self) -> Duration {
        Duration::from_millis(self.graph.timeout_ms)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: default_host(),
                port: default_port(),
                request_timeout_secs: default_request_timeout(),
                shutdown_timeout_secs: default_shutdown_timeout(),
            },
            embedding: EmbeddingConfig {
                base_url: default_embedding_url(),
                api_key: None,
                primary_model: default_embedding_model(),
                fallback_model: default_fallback_model(),
                dimension: default_embedding_dimension(),
                timeout_secs: default_client_timeout(),
                max_retries: default_embedding_retries(),
                batch_size: default_embedding_batch(),
                onnx_enabled: false,
                int8_enabled: false,
            },
            rerank: RerankConfig {
                base_url: default_rerank_url(),
                api_key: None,
                model: default_rerank_model(),
                fallback_model: default_rerank_fallback_model(),
                p95_threshold_ms: default_rerank_p95_threshold(),
                latency_window: default_rerank_window(),
                timeout_secs: default_client_timeout(),
            },
            vector_index: VectorIndexConfig {
                base_url: default_vector_url(),
                api_key: None,
                collection: default_collection(),
                timeout_secs: default_client_timeout(),
            },
            keyword_index: KeywordIndexConfig {
                corpus_file: default_corpus_file(),
                cache_dir: default_cache_dir(),
            },
            llm: LlmConfig {
                base_url: default_llm_url(),
                api_key: None,
                model: default_llm_model(),
                max_tokens: default_llm_max_tokens(),
                temperature: default_llm_temperature(),
                timeout_secs: default_client_timeout(),
                max_retries: default_llm_retries(),
                prompt_cost_per_1k: default_prompt_cost(),
                completion_cost_per_1k: default_completion_cost(),
            },
            hybrid: HybridConfig {
                alpha: default_hybrid_alpha(),
                fusion_mode: default_fusion_mode(),
                rrf_c: default_rrf_c(),
                bm25_top_k: default_bm25_top_k(),
                candidate_multiplier: default_candidate_multiplier(),
                rerank_enabled: true,
            },
            file_fallback: FileFallbackConfig {
                enabled: true,
                score_threshold: default_fallback_threshold(),
                chunk_size: default_fallback_chunk_size(),
                chunk_overlap: default_fallback_chunk_overlap(),
                corpus_root: default_corpus_root(),
            },
            self_rag: SelfRagConfig {
                enabled: true,
                confidence_threshold: default_self_rag_confidence(),
                max_iterations: default_self_rag_iterations(),
                min_improvement: default_self_rag_improvement(),
            },
            graph: GraphConfig {
                max_chunks: default_graph_max_chunks(),
                batch_size: default_graph_batch_size(),
                timeout_ms: default_graph_timeout(),
                max_hops: default_graph_hops(),
                parallelism: default_graph_parallelism(),
            },
            answer_cache: AnswerCacheConfig {
                enabled: true,
                ttl_hours: default_cache_ttl_hours(),
                max_size: default_cache_max_size(),
                similarity_threshold: default_cache_similarity(),
            },
            bandit: BanditConfig {
                enabled: true,
                state_file: default_bandit_state_file(),
                default_state_file: default_bandit_default_file(),
                latency_budget_ms: default_latency_budget(),
                epsilon: default_epsilon(),
            },
            observability: ObservabilityConfig {
                log_level: default_log_level(),
                json_logging: false,
                service_name: default_service_name(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.hybrid.alpha, 0.7);
        assert_eq!(config.bandit.latency_budget_ms, 8000);
        assert_eq!(config.file_fallback.score_threshold, 0.65);
        assert_eq!(config.answer_cache.max_size, 1000);
    }

    #[test]
    fn test_duration_helpers() {
        let config = AppConfig::default();
        assert_eq!(config.request_deadline(), Duration::from_secs(30));
        assert_eq!(config.answer_cache_ttl(), Duration::from_secs(24 * 3600));
        assert_eq!(config.graph_timeout(), Duration::from_millis(30_000));
    }

    #[test]
    fn test_parse_bool_variants() {
        assert!(parse_bool("true"));
        assert!(parse_bool("1"));
        assert!(parse_bool("YES"));
        assert!(!parse_bool("false"));
        assert!(!parse_bool("0"));
        assert!(!parse_bool("nope"));
    }

    #[test]
    fn test_env_override_table_paths_are_known() {
        // Every path in the table must deserialize against AppConfig;
        // a stale path would silently drop the override.
        let defaults = Config::try_from(&AppConfig::default()).unwrap();
        for (_, path, _) in ENV_OVERRIDES {
            let section = path.split('.').next().unwrap();
            assert!(
                defaults.get_table(section).is_ok(),
                "unknown config section in override path {}",
                path
            );
        }
    }
}
