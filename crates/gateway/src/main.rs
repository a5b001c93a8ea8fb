//! SmartRAG API Gateway
//!
//! The single entry point for the adaptive ask pipeline. Constructs the
//! process-wide singletons (clients, indices, cache, bandit, entity graph,
//! registry, router), seeds the keyword index in the background, and serves
//! the HTTP surface with request tracing and Prometheus metrics.

mod handlers;
mod seed;

use axum::{
    routing::{get, post},
    Router as AxumRouter,
};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use smartrag_common::{
    config::AppConfig,
    embeddings::{EmbeddingClient, HashEmbedder},
    errors::AppError,
    llm::create_language_model,
    metrics,
};
use smartrag_engine::generate::AnswerSynthesizer;
use smartrag_engine::{
    AnswerCache, Bandit, EntityGraph, GraphStrategy, HybridStrategy, IterativeStrategy,
    QueryRegistry, Router, StateStore, Strategy, StrategyKind, TableStrategy,
};
use smartrag_retrieval::{FileLevelFallback, HybridRetriever, VectorIndexClient};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};
use tokio::signal;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

use seed::{SeedState, SharedKeywordIndex};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub router: Arc<Router>,
    pub seed: Arc<SeedState>,
    pub metrics: PrometheusHandle,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = Arc::new(AppConfig::load().map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        e
    })?);

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.observability.log_level.clone()));
    if config.observability.json_logging {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    info!("Starting SmartRAG gateway v{}", smartrag_common::VERSION);

    // Install the Prometheus recorder before any metric is touched
    let metrics_handle = PrometheusBuilder::new().install_recorder()?;
    metrics::register_metrics();

    // Construct the process-wide singletons
    let seed_state = Arc::new(SeedState::new());
    let keyword_index = Arc::new(SharedKeywordIndex::new());
    let router = build_router_core(&config, keyword_index.clone())?;

    // Seed the keyword index in the background; /seed-status observes it
    tokio::spawn(seed::run_seed(
        config.keyword_index.clone(),
        keyword_index,
        seed_state.clone(),
    ));

    let state = AppState {
        config: config.clone(),
        router,
        seed: seed_state,
        metrics: metrics_handle,
    };

    let app = create_router(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Wire the clients, strategies, bandit, and cache into the engine router
fn build_router_core(
    config: &Arc<AppConfig>,
    keyword_index: Arc<SharedKeywordIndex>,
) -> Result<Arc<Router>, AppError> {
    let embeddings = build_embedding_client(config)?;
    let rerank = Arc::new(smartrag_common::rerank::RerankClient::new(config.rerank.clone())?);
    let vector_index = Arc::new(VectorIndexClient::new(config.vector_index.clone())?);
    let llm = create_language_model(&config.llm)?;

    let retriever = Arc::new(HybridRetriever::new(
        embeddings.primary(),
        vector_index,
        keyword_index,
        Some(rerank.clone()),
        config.hybrid.clone(),
    ));

    // The fallback model's vectors stay inside this component
    let file_fallback = Arc::new(FileLevelFallback::new(
        embeddings.fallback(),
        Some(rerank),
        config.file_fallback.clone(),
    ));

    let synthesizer = Arc::new(AnswerSynthesizer::new(llm.clone(), config.llm.max_tokens));
    let graph = Arc::new(RwLock::new(EntityGraph::new()));

    let mut strategies: HashMap<StrategyKind, Arc<dyn Strategy>> = HashMap::new();
    strategies.insert(
        StrategyKind::Hybrid,
        Arc::new(HybridStrategy::new(
            retriever.clone(),
            file_fallback,
            synthesizer.clone(),
        )),
    );
    strategies.insert(
        StrategyKind::Iterative,
        Arc::new(IterativeStrategy::new(
            retriever.clone(),
            synthesizer.clone(),
            llm.clone(),
            config.self_rag.clone(),
        )),
    );
    strategies.insert(
        StrategyKind::Graph,
        Arc::new(GraphStrategy::new(
            retriever.clone(),
            synthesizer,
            llm.clone(),
            graph,
            config.graph.clone(),
        )),
    );
    strategies.insert(
        StrategyKind::Table,
        Arc::new(TableStrategy::new(retriever, llm)),
    );

    let store = StateStore::new(&config.bandit.state_file, &config.bandit.default_state_file);
    let bandit = Arc::new(Bandit::new(
        store.load_initial(),
        store,
        config.bandit.epsilon,
    ));

    let cache = Arc::new(AnswerCache::new(
        config.answer_cache_ttl(),
        config.answer_cache.max_size,
        config.answer_cache.similarity_threshold,
    ));

    Ok(Arc::new(Router::new(
        config.clone(),
        cache,
        bandit,
        Arc::new(QueryRegistry::default()),
        strategies,
        embeddings.primary(),
    )))
}

/// Embedding client factory; `base_url = "mock"` selects the deterministic
/// in-process embedder for local development
fn build_embedding_client(config: &AppConfig) -> Result<EmbeddingClient, AppError> {
    if config.embedding.base_url == "mock" {
        tracing::warn!("Using deterministic mock embedders");
        return Ok(EmbeddingClient::new(
            Arc::new(HashEmbedder::new(
                &config.embedding.primary_model,
                config.embedding.dimension,
            )),
            Arc::new(HashEmbedder::new(
                &config.embedding.fallback_model,
                config.embedding.dimension,
            )),
        ));
    }
    EmbeddingClient::from_config(&config.embedding)
}

/// Create the main application router
fn create_router(state: AppState) -> AxumRouter {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Request ID propagation
    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();

    AxumRouter::new()
        // Ask endpoints
        .route("/ask-smart", post(handlers::ask::ask_smart))
        .route("/ask-hybrid", post(handlers::ask::ask_hybrid))
        .route("/ask-iterative", post(handlers::ask::ask_iterative))
        .route("/ask-graph", post(handlers::ask::ask_graph))
        .route("/ask-table", post(handlers::ask::ask_table))
        .route("/ask-smart-stream", post(handlers::stream::ask_smart_stream))
        // Feedback
        .route("/feedback", post(handlers::feedback::feedback))
        // Operational endpoints
        .route("/seed-status", get(handlers::health::seed_status))
        .route("/health", get(handlers::health::health))
        .route("/metrics", get(handlers::health::metrics))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(request_id)
        .layer(propagate_id)
        .with_state(state)
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }
}
