//! Cross-encoder rerank client
//!
//! Scores (query, passage) pairs through the rerank inference service.
//! Maintains a moving p95 over recent call latencies; while the p95 is above
//! the configured threshold, calls route to the faster fallback model.
//! Failures are soft: the caller receives order-preserving passthrough
//! scores and a warning is logged.

use crate::config::RerankConfig;
use crate::errors::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Sliding window of recent latencies with p95 readout
struct LatencyWindow {
    samples: VecDeque<u64>,
    capacity: usize,
}

impl LatencyWindow {
    fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    fn record(&mut self, latency_ms: u64) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(latency_ms);
    }

    fn p95(&self) -> Option<u64> {
        if self.samples.is_empty() {
            return None;
        }
        let mut sorted: Vec<u64> = self.samples.iter().copied().collect();
        sorted.sort_unstable();
        let idx = ((sorted.len() as f64) * 0.95).ceil() as usize;
        Some(sorted[idx.saturating_sub(1).min(sorted.len() - 1)])
    }
}

#[derive(Serialize)]
struct RerankRequest<'a> {
    model: &'a str,
    query: &'a str,
    documents: &'a [String],
}

#[derive(Deserialize)]
struct RerankResponse {
    results: Vec<RerankResult>,
}

#[derive(Deserialize)]
struct RerankResult {
    index: usize,
    relevance_score: f32,
}

/// Rerank client with latency-aware model selection
pub struct RerankClient {
    client: reqwest::Client,
    config: RerankConfig,
    window: Mutex<LatencyWindow>,
}

impl RerankClient {
    pub fn new(config: RerankConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::Configuration {
                message: format!("failed to create rerank HTTP client: {}", e),
            })?;

        let window = Mutex::new(LatencyWindow::new(config.latency_window));

        Ok(Self {
            client,
            config,
            window,
        })
    }

    /// Model for the next call, based on the current p95
    fn active_model(&self) -> &str {
        let p95 = self.window.lock().expect("latency window lock").p95();
        match p95 {
            Some(p95) if p95 > self.config.p95_threshold_ms => &self.config.fallback_model,
            _ => &self.config.model,
        }
    }

    /// Score passages against a query, preserving input order
    ///
    /// Returns one score per passage, higher is more relevant. On any
    /// failure the input ordering is preserved via descending passthrough
    /// scores so callers never observe an error from this path.
    pub async fn rerank(&self, query: &str, passages: &[String]) -> Vec<f32> {
        if passages.is_empty() {
            return Vec::new();
        }

        let model = self.active_model().to_string();
        let start = Instant::now();

        match self.request(&model, query, passages).await {
            Ok(scores) => {
                let elapsed = start.elapsed().as_millis() as u64;
                self.window.lock().expect("latency window lock").record(elapsed);
                scores
            }
            Err(e) => {
                tracing::warn!(
                    model = %model,
                    error = %e,
                    "Rerank failed, preserving input order"
                );
                passthrough_scores(passages.len())
            }
        }
    }

    async fn request(&self, model: &str, query: &str, passages: &[String]) -> Result<Vec<f32>> {
        let url = format!("{}/rerank", self.config.base_url);
        let request = RerankRequest {
            model,
            query,
            documents: passages,
        };

        let mut builder = self.client.post(&url).json(&request);
        if let Some(key) = &self.config.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|e| AppError::RerankUnavailable {
            message: format!("request failed: {}", e),
        })?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(AppError::RerankUnavailable {
                message: format!("API error {}", status),
            });
        }

        let parsed: RerankResponse =
            response.json().await.map_err(|e| AppError::RerankUnavailable {
                message: format!("failed to parse response: {}", e),
            })?;

        // The service returns (index, score) pairs; re-assemble input order
        let mut scores = vec![0.0f32; passages.len()];
        for item in parsed.results {
            if item.index < scores.len() {
                scores[item.index] = item.relevance_score;
            }
        }
        Ok(scores)
    }
}

/// Descending scores that keep the caller's original ordering intact
fn passthrough_scores(len: usize) -> Vec<f32> {
    (0..len).map(|i| 1.0 - (i as f32) / (len as f32)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_p95_of_empty_window() {
        let window = LatencyWindow::new(8);
        assert_eq!(window.p95(), None);
    }

    #[test]
    fn test_p95_tracks_tail() {
        let mut window = LatencyWindow::new(20);
        for _ in 0..18 {
            window.record(100);
        }
        // Two slow calls out of twenty land the nearest-rank p95 on the tail
        window.record(5000);
        window.record(5000);
        assert_eq!(window.p95(), Some(5000));
    }

    #[test]
    fn test_window_evicts_oldest() {
        let mut window = LatencyWindow::new(4);
        for ms in [5000, 100, 100, 100, 100] {
            window.record(ms);
        }
        // The 5000ms sample aged out
        assert_eq!(window.p95(), Some(100));
    }

    #[test]
    fn test_passthrough_preserves_order() {
        let scores = passthrough_scores(4);
        assert_eq!(scores.len(), 4);
        for pair in scores.windows(2) {
            assert!(pair[0] > pair[1]);
        }
    }

    #[test]
    fn test_fallback_model_activates_on_high_p95() {
        let config = RerankConfig {
            base_url: "http://localhost:9".into(),
            api_key: None,
            model: "primary".into(),
            fallback_model: "fast".into(),
            p95_threshold_ms: 500,
            latency_window: 8,
            timeout_secs: 1,
        };
        let client = RerankClient::new(config).unwrap();

        assert_eq!(client.active_model(), "primary");
        for _ in 0..8 {
            client.window.lock().unwrap().record(900);
        }
        assert_eq!(client.active_model(), "fast");

        // Recovery: fast samples push p95 back under the threshold
        for _ in 0..8 {
            client.window.lock().unwrap().record(50);
        }
        assert_eq!(client.active_model(), "primary");
    }
}
