//! Semantic answer cache
//!
//! Three-layer lookup over previously answered questions:
//! 1. Exact: hash of the normalized question
//! 2. Lexical: TF-IDF cosine against stored normalized questions
//! 3. Semantic: embedding cosine against stored question embeddings
//!
//! Insertion is gated: only answers with at least one citation generated
//! from at least one chunk are admitted. Eviction is TTL plus LRU at
//! capacity. All access is serialized by an internal lock; a lookup during
//! an in-flight insertion may miss and recompute, but never observes a
//! partial entry.

use crate::answer::Answer;
use crate::classify::normalize_question;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use smartrag_common::embeddings::cosine_similarity;
use smartrag_common::metrics;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Which layer produced a hit
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CacheLayer {
    Exact,
    Lexical,
    Semantic,
}

impl CacheLayer {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheLayer::Exact => "exact",
            CacheLayer::Lexical => "lexical",
            CacheLayer::Semantic => "semantic",
        }
    }
}

/// Cache-hit marker attached to served answers
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CacheHitInfo {
    pub layer: CacheLayer,
    pub similarity: f32,
}

struct CacheEntry {
    term_counts: HashMap<String, u32>,
    embedding: Vec<f32>,
    answer: Answer,
    created: Instant,
    last_access: Instant,
}

struct CacheInner {
    entries: HashMap<String, CacheEntry>,
    /// term -> number of entries containing it, for IDF
    doc_freq: HashMap<String, u32>,
}

/// Three-layer answer cache
pub struct AnswerCache {
    inner: Mutex<CacheInner>,
    ttl: Duration,
    capacity: usize,
    similarity_threshold: f32,
}

fn exact_key(normalized: &str) -> String {
    hex::encode(Sha256::digest(normalized.as_bytes()))
}

fn term_counts(normalized: &str) -> HashMap<String, u32> {
    let mut counts = HashMap::new();
    for term in normalized.split_whitespace() {
        *counts.entry(term.to_string()).or_insert(0) += 1;
    }
    counts
}

/// TF-IDF cosine between two term-count maps
fn tfidf_cosine(
    a: &HashMap<String, u32>,
    b: &HashMap<String, u32>,
    doc_freq: &HashMap<String, u32>,
    total_docs: usize,
) -> f32 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let idf = |term: &str| -> f32 {
        let df = doc_freq.get(term).copied().unwrap_or(0) as f32;
        (1.0 + total_docs as f32 / (1.0 + df)).ln()
    };

    let weight = |counts: &HashMap<String, u32>, term: &str| -> f32 {
        counts.get(term).copied().unwrap_or(0) as f32 * idf(term)
    };

    let mut dot = 0.0;
    for term in a.keys() {
        dot += weight(a, term) * weight(b, term);
    }

    let norm = |counts: &HashMap<String, u32>| -> f32 {
        counts
            .iter()
            .map(|(term, &count)| {
                let w = count as f32 * idf(term);
                w * w
            })
            .sum::<f32>()
            .sqrt()
    };

    let norm_a = norm(a);
    let norm_b = norm(b);
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

impl AnswerCache {
    pub fn new(ttl: Duration, capacity: usize, similarity_threshold: f32) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                doc_freq: HashMap::new(),
            }),
            ttl,
            capacity: capacity.max(1),
            similarity_threshold,
        }
    }

    /// Look up a question across the three layers, first hit wins
    ///
    /// `embedding` enables the semantic layer; without it only exact and
    /// lexical run.
    pub fn lookup(&self, question: &str, embedding: Option<&[f32]>) -> Option<(Answer, CacheHitInfo)> {
        let normalized = normalize_question(question);
        let key = exact_key(&normalized);
        let query_terms = term_counts(&normalized);

        let mut inner = self.inner.lock().expect("answer cache lock");
        Self::purge_expired(&mut inner, self.ttl);

        // Layer 1: exact
        if inner.entries.contains_key(&key) {
            let entry = inner.entries.get_mut(&key).unwrap();
            entry.last_access = Instant::now();
            let hit = CacheHitInfo {
                layer: CacheLayer::Exact,
                similarity: 1.0,
            };
            metrics::record_cache(Some(hit.layer.as_str()));
            return Some((entry.answer.clone(), hit));
        }

        // Layer 2: lexical TF-IDF cosine
        let total_docs = inner.entries.len();
        let mut best: Option<(String, f32, CacheLayer)> = None;
        for (entry_key, entry) in &inner.entries {
            let similarity = tfidf_cosine(&query_terms, &entry.term_counts, &inner.doc_freq, total_docs);
            if similarity >= self.similarity_threshold
                && best.as_ref().map_or(true, |(_, s, _)| similarity > *s)
            {
                best = Some((entry_key.clone(), similarity, CacheLayer::Lexical));
            }
        }

        // Layer 3: semantic embedding cosine
        if best.is_none() {
            if let Some(query_embedding) = embedding {
                for (entry_key, entry) in &inner.entries {
                    let similarity = cosine_similarity(query_embedding, &entry.embedding);
                    if similarity >= self.similarity_threshold
                        && best.as_ref().map_or(true, |(_, s, _)| similarity > *s)
                    {
                        best = Some((entry_key.clone(), similarity, CacheLayer::Semantic));
                    }
                }
            }
        }

        match best {
            Some((entry_key, similarity, layer)) => {
                let entry = inner.entries.get_mut(&entry_key).unwrap();
                entry.last_access = Instant::now();
                let hit = CacheHitInfo { layer, similarity };
                metrics::record_cache(Some(layer.as_str()));
                Some((entry.answer.clone(), hit))
            }
            None => {
                metrics::record_cache(None);
                None
            }
        }
    }

    /// Insert an answer, subject to the quality gate
    ///
    /// Returns false when the gate rejects the answer (no citations, no
    /// chunks, a no-evidence refusal, or a deadline-truncated partial).
    pub fn put(&self, question: &str, embedding: Vec<f32>, answer: Answer, chunks_used: usize) -> bool {
        if answer.citations.is_empty() || chunks_used == 0 || answer.no_evidence || answer.truncated {
            tracing::debug!(
                citations = answer.citations.len(),
                chunks_used,
                no_evidence = answer.no_evidence,
                truncated = answer.truncated,
                "Answer rejected by cache quality gate"
            );
            return false;
        }

        let normalized = normalize_question(question);
        let key = exact_key(&normalized);
        let counts = term_counts(&normalized);

        let mut inner = self.inner.lock().expect("answer cache lock");
        Self::purge_expired(&mut inner, self.ttl);

        // LRU eviction at capacity (replacing an existing key is not growth)
        while !inner.entries.contains_key(&key) && inner.entries.len() >= self.capacity {
            let oldest = inner
                .entries
                .iter()
                .min_by_key(|(_, e)| e.last_access)
                .map(|(k, _)| k.clone());
            match oldest {
                Some(old_key) => Self::remove_entry(&mut inner, &old_key),
                None => break,
            }
        }

        if let Some(_previous) = inner.entries.get(&key) {
            Self::remove_entry(&mut inner, &key);
        }

        for term in counts.keys() {
            *inner.doc_freq.entry(term.clone()).or_insert(0) += 1;
        }

        let now = Instant::now();
        inner.entries.insert(
            key,
            CacheEntry {
                term_counts: counts,
                embedding,
                answer,
                created: now,
                last_access: now,
            },
        );
        true
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("answer cache lock").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn remove_entry(inner: &mut CacheInner, key: &str) {
        if let Some(entry) = inner.entries.remove(key) {
            for term in entry.term_counts.keys() {
                if let Some(df) = inner.doc_freq.get_mut(term) {
                    *df = df.saturating_sub(1);
                    if *df == 0 {
                        inner.doc_freq.remove(term);
                    }
                }
            }
        }
    }

    fn purge_expired(inner: &mut CacheInner, ttl: Duration) {
        let expired: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, e)| e.created.elapsed() > ttl)
            .map(|(k, _)| k.clone())
            .collect();
        for key in expired {
            Self::remove_entry(inner, &key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::answer::{Citation, Timings};
    use crate::strategy::StrategyKind;
    use smartrag_common::llm::TokenUsage;

    fn answer(text: &str, citations: usize) -> Answer {
        Answer {
            text: text.to_string(),
            citations: (0..citations)
                .map(|i| Citation {
                    source_path: format!("doc{}.txt", i),
                    snippet: "snippet".into(),
                    score: 0.8,
                    rank: i + 1,
                })
                .collect(),
            confidence: 0.8,
            strategy: StrategyKind::Hybrid,
            token_usage: TokenUsage::default(),
            token_cost_usd: 0.0,
            timings: Timings::default(),
            cache_hit: None,
            no_evidence: false,
            truncated: false,
            fallback: None,
            iterations: None,
        }
    }

    fn cache() -> AnswerCache {
        AnswerCache::new(Duration::from_secs(3600), 100, 0.85)
    }

    #[test]
    fn test_exact_hit_after_put() {
        let cache = cache();
        assert!(cache.put("Who wrote Pride and Prejudice?", vec![0.1; 8], answer("austen", 1), 3));

        let (hit, info) = cache.lookup("who wrote pride and prejudice!!", None).unwrap();
        assert_eq!(hit.text, "austen");
        assert_eq!(info.layer, CacheLayer::Exact);
        assert_eq!(info.similarity, 1.0);
    }

    #[test]
    fn test_lexical_hit_on_word_overlap() {
        let cache = cache();
        cache.put(
            "who wrote the novel pride and prejudice",
            vec![0.1; 8],
            answer("austen", 1),
            3,
        );

        // Same words, different order, one dropped
        let result = cache.lookup("the novel pride and prejudice who wrote", None);
        let (_, info) = result.expect("expected a lexical hit");
        assert_eq!(info.layer, CacheLayer::Lexical);
        assert!(info.similarity >= 0.85);
    }

    #[test]
    fn test_semantic_hit_via_embedding() {
        let cache = cache();
        let stored = vec![1.0, 0.0, 0.0, 0.1];
        cache.put("original question", stored.clone(), answer("cached", 1), 2);

        let near = vec![0.98, 0.05, 0.0, 0.1];
        let (_, info) = cache
            .lookup("completely different words entirely", Some(&near))
            .expect("expected a semantic hit");
        assert_eq!(info.layer, CacheLayer::Semantic);
        assert!(info.similarity >= 0.85);
    }

    #[test]
    fn test_miss_below_threshold() {
        let cache = cache();
        cache.put("who wrote pride and prejudice", vec![1.0, 0.0], answer("austen", 1), 3);

        let far_embedding = vec![0.0, 1.0];
        assert!(cache
            .lookup("thermodynamic entropy in closed systems", Some(&far_embedding))
            .is_none());
    }

    #[test]
    fn test_quality_gate_rejects() {
        let cache = cache();

        // No citations
        assert!(!cache.put("q1", vec![0.1], answer("a", 0), 3));
        // No chunks
        assert!(!cache.put("q2", vec![0.1], answer("a", 1), 0));
        // No-evidence refusal
        let mut refusal = answer("cannot answer", 1);
        refusal.no_evidence = true;
        assert!(!cache.put("q3", vec![0.1], refusal, 1));

        // Deadline-truncated partial
        let mut partial = answer("partial", 1);
        partial.truncated = true;
        assert!(!cache.put("q4", vec![0.1], partial, 1));

        assert!(cache.is_empty());
    }

    #[test]
    fn test_ttl_expiry() {
        let cache = AnswerCache::new(Duration::from_millis(0), 100, 0.85);
        cache.put("short lived", vec![0.1], answer("a", 1), 1);
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.lookup("short lived", None).is_none());
    }

    #[test]
    fn test_lru_eviction_at_capacity() {
        let cache = AnswerCache::new(Duration::from_secs(3600), 2, 0.85);
        cache.put("question one alpha", vec![0.1], answer("1", 1), 1);
        cache.put("question two beta", vec![0.1], answer("2", 1), 1);

        // Touch the first entry so the second becomes LRU
        cache.lookup("question one alpha", None).unwrap();
        cache.put("question three gamma", vec![0.1], answer("3", 1), 1);

        assert_eq!(cache.len(), 2);
        assert!(cache.lookup("question one alpha", None).is_some());
        assert!(cache.lookup("question two beta", None).is_none());
    }

    #[test]
    fn test_reinsert_same_question_replaces() {
        let cache = cache();
        cache.put("same question", vec![0.1], answer("old", 1), 1);
        cache.put("same question", vec![0.1], answer("new", 1), 1);

        assert_eq!(cache.len(), 1);
        let (hit, _) = cache.lookup("same question", None).unwrap();
        assert_eq!(hit.text, "new");
    }
}
