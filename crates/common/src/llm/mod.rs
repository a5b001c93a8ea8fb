//! LLM provider client
//!
//! Chat-completion client for grounded answer generation and structured
//! extraction. Rate limits and transient upstream failures are retried with
//! jittered exponential backoff; exhaustion surfaces as UPSTREAM_UNAVAILABLE.
//! When no API key is configured a deterministic mock takes its place so the
//! service can run end-to-end in development and tests.

use crate::config::LlmConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use backoff::ExponentialBackoff;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Token usage counters for one or more LLM calls
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl TokenUsage {
    pub fn add(&mut self, other: &TokenUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }

    pub fn is_zero(&self) -> bool {
        self.total_tokens == 0
    }
}

/// One chat completion request
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub system: String,
    pub prompt: String,
    pub max_tokens: usize,
    pub temperature: f32,
}

impl ChatRequest {
    pub fn new(system: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            prompt: prompt.into(),
            max_tokens: 1000,
            temperature: 0.2,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// Completion text plus usage accounting
#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub usage: TokenUsage,
}

/// Trait for LLM providers
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Run one chat completion
    async fn complete(&self, request: &ChatRequest) -> Result<Completion>;

    /// Model identifier, for logs and cost accounting
    fn model_name(&self) -> &str;
}

/// Rough token estimate used when the provider omits a usage block
pub fn approx_tokens(text: &str) -> u64 {
    (text.len() / 4) as u64
}

/// USD cost estimate from configured per-1k prices
pub fn estimate_cost(usage: &TokenUsage, config: &LlmConfig) -> f64 {
    let prompt = usage.prompt_tokens as f64 / 1000.0 * config.prompt_cost_per_1k;
    let completion = usage.completion_tokens as f64 / 1000.0 * config.completion_cost_per_1k;
    prompt + completion
}

/// Extract the first balanced JSON object from a reply
///
/// Models wrap JSON in prose or code fences; scan for the first '{' and
/// return the balanced object, respecting string escapes.
pub fn extract_json(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &byte) in bytes[start..].iter().enumerate() {
        if escaped {
            escaped = false;
            continue;
        }
        match byte {
            b'\\' if in_string => escaped = true,
            b'"' => in_string = !in_string,
            b'{' if !in_string => depth += 1,
            b'}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Parse a structured reply into `T`, tolerating surrounding prose
pub fn parse_structured<T: DeserializeOwned>(text: &str) -> Result<T> {
    let json = extract_json(text).ok_or_else(|| AppError::UpstreamUnavailable {
        message: "LLM reply contained no JSON object".to_string(),
    })?;
    serde_json::from_str(json).map_err(|e| AppError::UpstreamUnavailable {
        message: format!("LLM reply JSON did not match the expected shape: {}", e),
    })
}

// --- HTTP client -----------------------------------------------------------

#[derive(Serialize)]
struct ApiMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ApiRequest<'a> {
    model: &'a str,
    messages: Vec<ApiMessage<'a>>,
    max_tokens: usize,
    temperature: f32,
}

#[derive(Deserialize)]
struct ApiChoice {
    message: ApiMessageResponse,
}

#[derive(Deserialize)]
struct ApiMessageResponse {
    content: String,
}

#[derive(Deserialize)]
struct ApiUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
    total_tokens: u64,
}

#[derive(Deserialize)]
struct ApiResponse {
    choices: Vec<ApiChoice>,
    usage: Option<ApiUsage>,
}

/// HTTP LLM client (OpenAI-compatible chat endpoint)
pub struct HttpLlm {
    client: reqwest::Client,
    config: LlmConfig,
    api_key: String,
}

impl HttpLlm {
    pub fn new(config: LlmConfig, api_key: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::Configuration {
                message: format!("failed to create LLM HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            config,
            api_key,
        })
    }

    fn retry_policy(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: Duration::from_millis(250),
            max_interval: Duration::from_secs(4),
            max_elapsed_time: Some(Duration::from_secs(self.config.timeout_secs)),
            ..ExponentialBackoff::default()
        }
    }

    async fn try_request(&self, request: &ChatRequest) -> Result<Completion> {
        let body = ApiRequest {
            model: &self.config.model,
            messages: vec![
                ApiMessage {
                    role: "system",
                    content: &request.system,
                },
                ApiMessage {
                    role: "user",
                    content: &request.prompt,
                },
            ],
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        };

        let response = self
            .client
            .post(&self.config.base_url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::LlmUnavailable {
                message: format!("request failed: {}", e),
            })?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(AppError::LlmRateLimited {
                message: "provider returned 429".to_string(),
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::LlmUnavailable {
                message: format!("API error {}: {}", status, body),
            });
        }

        let parsed: ApiResponse = response.json().await.map_err(|e| AppError::LlmUnavailable {
            message: format!("failed to parse response: {}", e),
        })?;

        let text = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| AppError::LlmUnavailable {
                message: "empty response from provider".to_string(),
            })?;

        let usage = match parsed.usage {
            Some(u) => TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            },
            None => {
                let prompt_tokens = approx_tokens(&request.prompt) + approx_tokens(&request.system);
                let completion_tokens = approx_tokens(&text);
                TokenUsage {
                    prompt_tokens,
                    completion_tokens,
                    total_tokens: prompt_tokens + completion_tokens,
                }
            }
        };

        Ok(Completion { text, usage })
    }
}

#[async_trait]
impl LanguageModel for HttpLlm {
    async fn complete(&self, request: &ChatRequest) -> Result<Completion> {
        let result = backoff::future::retry(self.retry_policy(), || async {
            match self.try_request(request).await {
                Ok(completion) => Ok(completion),
                // Rate limits and transport failures are transient
                Err(e @ AppError::LlmRateLimited { .. }) => {
                    tracing::warn!(error = %e, "LLM rate limited, backing off");
                    Err(backoff::Error::transient(e))
                }
                Err(e @ AppError::LlmUnavailable { .. }) => {
                    tracing::warn!(error = %e, "LLM call failed, backing off");
                    Err(backoff::Error::transient(e))
                }
                Err(e) => Err(backoff::Error::permanent(e)),
            }
        })
        .await;

        result.map_err(|e| AppError::UpstreamUnavailable {
            message: format!("LLM provider failed after retries: {}", e),
        })
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

// --- Mock client -----------------------------------------------------------

/// Deterministic mock provider used when no API key is configured
///
/// Replies are keyed off the structured-output schema embedded in the prompt
/// so every call site receives a shape it can parse.
pub struct MockLlm;

impl MockLlm {
    fn reply_for(&self, request: &ChatRequest) -> String {
        let prompt = &request.prompt;

        if prompt.contains("\"entities\"") {
            // Entity extraction: pick distinctive words from the question
            let entities: Vec<String> = prompt
                .lines()
                .find(|l| l.starts_with("Question:"))
                .unwrap_or(prompt.lines().next().unwrap_or(""))
                .split_whitespace()
                .filter(|w| w.len() > 3 && w.chars().next().is_some_and(|c| c.is_uppercase()))
                .take(4)
                .map(|w| {
                    format!(
                        "{{\"name\": \"{}\", \"type\": \"concept\"}}",
                        w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase()
                    )
                })
                .collect();
            return format!("{{\"entities\": [{}]}}", entities.join(", "));
        }

        if prompt.contains("\"relations\"") {
            // Relation extraction over a chunk batch
            return r#"{"relations": [
                {"source": "subject", "source_type": "concept", "relation": "relates_to", "target": "object", "target_type": "concept"}
            ]}"#
                .to_string();
        }

        if prompt.contains("\"refined_query\"") {
            return r#"{"critique": "The answer is plausible but thin on specifics.", "refined_query": "additional supporting details", "confidence": 0.8}"#
                .to_string();
        }

        if prompt.contains("\"headers\"") {
            return r#"{"headers": ["Item", "Value"], "rows": [["first", "one"], ["second", "two"]], "summary": "Two items compared side by side."}"#
                .to_string();
        }

        // Grounded answer: cite the numbered context windows that exist
        let context_count = prompt.matches("\n[").count().max(1);
        let mut answer = String::from("Based on the provided sources, ");
        answer.push_str("the evidence supports a direct answer [1].");
        if context_count > 1 {
            answer.push_str(" A second source corroborates this [2].");
        }
        answer.push_str("\nConfidence: 0.82");
        answer
    }
}

#[async_trait]
impl LanguageModel for MockLlm {
    async fn complete(&self, request: &ChatRequest) -> Result<Completion> {
        let text = self.reply_for(request);
        let prompt_tokens = approx_tokens(&request.prompt) + approx_tokens(&request.system);
        let completion_tokens = approx_tokens(&text);
        Ok(Completion {
            usage: TokenUsage {
                prompt_tokens,
                completion_tokens,
                total_tokens: prompt_tokens + completion_tokens,
            },
            text,
        })
    }

    fn model_name(&self) -> &str {
        "mock-llm"
    }
}

/// Create a provider based on configuration
pub fn create_language_model(config: &LlmConfig) -> Result<Arc<dyn LanguageModel>> {
    match &config.api_key {
        Some(key) if !key.is_empty() => Ok(Arc::new(HttpLlm::new(config.clone(), key.clone())?)),
        _ => {
            tracing::warn!("No LLM API key configured, using deterministic mock provider");
            Ok(Arc::new(MockLlm))
        }
    }
}
