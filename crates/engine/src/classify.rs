//! Question classification
//!
//! Lightweight heuristic classifier with a memo cache keyed by the
//! normalized question. Classification drives hard routing
//! (relational -> graph, tabular -> table).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

/// Question class
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum QueryClass {
    /// Looking for a specific fact
    Factual,
    /// Seeking explanation or analysis
    Analytical,
    /// About entities and their relationships
    Relational,
    /// Comparison, list, or aggregation
    Tabular,
    /// Everything else
    General,
}

impl QueryClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryClass::Factual => "factual",
            QueryClass::Analytical => "analytical",
            QueryClass::Relational => "relational",
            QueryClass::Tabular => "tabular",
            QueryClass::General => "general",
        }
    }
}

/// Normalize a question: lowercase, punctuation stripped, whitespace
/// collapsed. Shared by the classifier memo and the answer cache key.
pub fn normalize_question(question: &str) -> String {
    question
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Heuristic intent classifier with a memo cache
pub struct QueryClassifier {
    memo: Mutex<HashMap<String, QueryClass>>,
}

impl QueryClassifier {
    pub fn new() -> Self {
        Self {
            memo: Mutex::new(HashMap::new()),
        }
    }

    /// Classify a question, consulting the memo first
    pub fn classify(&self, question: &str) -> QueryClass {
        let normalized = normalize_question(question);

        if let Some(class) = self.memo.lock().expect("classifier memo lock").get(&normalized) {
            return *class;
        }

        let class = detect_class(&normalized);
        self.memo
            .lock()
            .expect("classifier memo lock")
            .insert(normalized, class);
        class
    }
}

impl Default for QueryClassifier {
    fn default() -> Self {
        Self::new()
    }
}

/// Pattern-based class detection over a normalized question
fn detect_class(question: &str) -> QueryClass {
    // Tabular: comparison, listing, aggregation
    let tabular_patterns = [
        "compare",
        "comparison",
        " vs ",
        " versus ",
        "difference between",
        "list all",
        "list the",
        "how many",
        "average",
        "total number",
        "in a table",
        "side by side",
    ];
    if tabular_patterns.iter().any(|p| question.contains(p)) {
        return QueryClass::Tabular;
    }

    // Relational: entities and the links between them
    let relational_patterns = [
        "relationship",
        "relationships",
        "related to",
        "relations",
        "connection between",
        "connected to",
        "roles",
        "who knows",
        "interacts with",
        "network of",
    ];
    if relational_patterns.iter().any(|p| question.contains(p)) {
        return QueryClass::Relational;
    }

    // Analytical: explanation and reasoning
    if question.starts_with("why")
        || question.starts_with("explain")
        || question.starts_with("analyze")
        || question.starts_with("how does")
        || question.starts_with("how do")
        || question.contains("what causes")
    {
        return QueryClass::Analytical;
    }

    // Factual: direct lookups
    if question.starts_with("who")
        || question.starts_with("what is")
        || question.starts_with("what was")
        || question.starts_with("when")
        || question.starts_with("where")
        || question.starts_with("which")
        || question.starts_with("define")
    {
        return QueryClass::Factual;
    }

    QueryClass::General
}
