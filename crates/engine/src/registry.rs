//! Query registry
//!
//! Short-lived FIFO map from query id to the chosen arm and automatic
//! reward, so user feedback arriving later can be attributed. Capacity
//! 1000; overflow evicts the oldest record. Durability is intentionally
//! not provided: feedback older than the window simply misses.

use crate::strategy::StrategyKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use uuid::Uuid;

/// Registry capacity
pub const REGISTRY_CAPACITY: usize = 1000;

/// Question prefix length kept for log context
const QUESTION_PREFIX: usize = 120;

/// One recorded query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRecord {
    pub query_id: Uuid,
    pub arm: StrategyKind,
    pub auto_reward: f64,
    pub timestamp: DateTime<Utc>,
    /// Truncated question, for operator logs
    pub question: String,
}

impl QueryRecord {
    pub fn new(query_id: Uuid, arm: StrategyKind, auto_reward: f64, question: &str) -> Self {
        Self {
            query_id,
            arm,
            auto_reward,
            timestamp: Utc::now(),
            question: question.chars().take(QUESTION_PREFIX).collect(),
        }
    }
}

struct RegistryInner {
    records: HashMap<Uuid, QueryRecord>,
    order: VecDeque<Uuid>,
}

/// FIFO-bounded query registry
pub struct QueryRegistry {
    inner: Mutex<RegistryInner>,
    capacity: usize,
}

impl QueryRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                records: HashMap::new(),
                order: VecDeque::new(),
            }),
            capacity: capacity.max(1),
        }
    }

    /// Insert a record, evicting the oldest at capacity
    pub fn insert(&self, record: QueryRecord) {
        let mut inner = self.inner.lock().expect("registry lock");

        while inner.order.len() >= self.capacity {
            if let Some(evicted) = inner.order.pop_front() {
                inner.records.remove(&evicted);
            }
        }

        inner.order.push_back(record.query_id);
        inner.records.insert(record.query_id, record);
    }

    /// Look up a record by query id
    pub fn lookup(&self, query_id: Uuid) -> Option<QueryRecord> {
        self.inner
            .lock()
            .expect("registry lock")
            .records
            .get(&query_id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("registry lock").order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for QueryRegistry {
    fn default() -> Self {
        Self::new(REGISTRY_CAPACITY)
    }
}
