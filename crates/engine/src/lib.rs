//! SmartRAG Core Engine
//!
//! The adaptive retrieval-and-generation engine:
//! - Question classification and hard routing
//! - Four retrieval strategies behind one contract
//! - Thompson-sampling bandit with persisted posteriors
//! - Three-layer semantic answer cache with a quality gate
//! - JIT entity graph
//! - Per-request progress streaming
//! - The router that coordinates all of the above

pub mod answer;
pub mod bandit;
pub mod cache;
pub mod classify;
pub mod generate;
pub mod graph;
pub mod progress;
pub mod registry;
pub mod router;
pub mod state;
pub mod strategy;

// Re-export commonly used types
pub use answer::{Answer, Citation, Timings};
pub use bandit::{auto_reward, blended_reward, ArmState, Bandit};
pub use cache::{AnswerCache, CacheHitInfo, CacheLayer};
pub use classify::{normalize_question, QueryClass, QueryClassifier};
pub use graph::{EntityGraph, GraphSnapshot};
pub use progress::{ProgressBus, ProgressEvent, RetrievalSummary, StreamItem, PROGRESS_BUFFER};
pub use registry::{QueryRecord, QueryRegistry, REGISTRY_CAPACITY};
pub use router::{AskRequest, AskResponse, FeedbackOutcome, Router};
pub use state::StateStore;
pub use strategy::{
    AskContext, GraphStrategy, HybridStrategy, IterativeStrategy, Strategy, StrategyKind,
    StrategyOutcome, StrategyRequest, TableStrategy,
};
