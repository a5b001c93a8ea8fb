//! Metrics and observability utilities
//!
//! Prometheus metrics with standardized naming for the ask pipeline:
//! requests, strategy runs, cache layers, bandit updates, and LLM usage.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit};
use std::time::Instant;

/// Metrics prefix for all SmartRAG metrics
pub const METRICS_PREFIX: &str = "smartrag";

/// Register all metric descriptions
pub fn register_metrics() {
    describe_counter!(
        format!("{}_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total number of HTTP requests"
    );

    describe_histogram!(
        format!("{}_request_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "HTTP request latency in seconds"
    );

    describe_counter!(
        format!("{}_strategy_runs_total", METRICS_PREFIX),
        Unit::Count,
        "Strategy executions by arm and outcome"
    );

    describe_histogram!(
        format!("{}_strategy_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Strategy execution latency in seconds"
    );

    describe_counter!(
        format!("{}_cache_hits_total", METRICS_PREFIX),
        Unit::Count,
        "Answer cache hits by layer"
    );

    describe_counter!(
        format!("{}_cache_misses_total", METRICS_PREFIX),
        Unit::Count,
        "Answer cache misses"
    );

    describe_counter!(
        format!("{}_bandit_updates_total", METRICS_PREFIX),
        Unit::Count,
        "Bandit reward updates by arm and source"
    );

    describe_gauge!(
        format!("{}_bandit_posterior_mean", METRICS_PREFIX),
        "Posterior mean per bandit arm"
    );

    describe_counter!(
        format!("{}_llm_tokens_total", METRICS_PREFIX),
        Unit::Count,
        "LLM tokens consumed by direction"
    );

    describe_counter!(
        format!("{}_file_fallback_total", METRICS_PREFIX),
        Unit::Count,
        "File-level fallback triggers"
    );

    describe_histogram!(
        format!("{}_retrieval_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Retrieval latency in seconds by mode"
    );

    tracing::info!("Metrics registered");
}

/// Helper to record request metrics
pub struct RequestMetrics {
    start: Instant,
    endpoint: String,
}

impl RequestMetrics {
    /// Start tracking a request
    pub fn start(endpoint: &str) -> Self {
        Self {
            start: Instant::now(),
            endpoint: endpoint.to_string(),
        }
    }

    /// Record request completion
    pub fn finish(self, status: u16) {
        let duration = self.start.elapsed().as_secs_f64();

        counter!(
            format!("{}_requests_total", METRICS_PREFIX),
            "endpoint" => self.endpoint.clone(),
            "status" => status.to_string()
        )
        .increment(1);

        histogram!(
            format!("{}_request_duration_seconds", METRICS_PREFIX),
            "endpoint" => self.endpoint
        )
        .record(duration);
    }
}

/// Record a strategy run
pub fn record_strategy(strategy: &str, duration_secs: f64, success: bool) {
    let outcome = if success { "ok" } else { "error" };

    counter!(
        format!("{}_strategy_runs_total", METRICS_PREFIX),
        "strategy" => strategy.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);

    histogram!(
        format!("{}_strategy_duration_seconds", METRICS_PREFIX),
        "strategy" => strategy.to_string()
    )
    .record(duration_secs);
}

/// Record an answer-cache lookup
pub fn record_cache(layer: Option<&str>) {
    match layer {
        Some(layer) => {
            counter!(
                format!("{}_cache_hits_total", METRICS_PREFIX),
                "layer" => layer.to_string()
            )
            .increment(1);
        }
        None => {
            counter!(format!("{}_cache_misses_total", METRICS_PREFIX)).increment(1);
        }
    }
}

/// Record a bandit update and the new posterior mean
pub fn record_bandit_update(arm: &str, source: &str, posterior_mean: f64) {
    counter!(
        format!("{}_bandit_updates_total", METRICS_PREFIX),
        "arm" => arm.to_string(),
        "source" => source.to_string()
    )
    .increment(1);

    gauge!(
        format!("{}_bandit_posterior_mean", METRICS_PREFIX),
        "arm" => arm.to_string()
    )
    .set(posterior_mean);
}

/// Record LLM token consumption
pub fn record_llm_tokens(prompt_tokens: u64, completion_tokens: u64) {
    counter!(
        format!("{}_llm_tokens_total", METRICS_PREFIX),
        "direction" => "prompt"
    )
    .increment(prompt_tokens);

    counter!(
        format!("{}_llm_tokens_total", METRICS_PREFIX),
        "direction" => "completion"
    )
    .increment(completion_tokens);
}

/// Record a file-level fallback trigger
pub fn record_file_fallback() {
    counter!(format!("{}_file_fallback_total", METRICS_PREFIX)).increment(1);
}

/// Record retrieval latency
pub fn record_retrieval(mode: &str, duration_secs: f64) {
    histogram!(
        format!("{}_retrieval_duration_seconds", METRICS_PREFIX),
        "mode" => mode.to_string()
    )
    .record(duration_secs);
}
