//! Vector index client
//!
//! ANN search against the external vector database over its HTTP API.
//! The index is treated as externally consistent; this client only reads.

use crate::{RetrievedChunk, Scope, VectorSearcher};
use serde::{Deserialize, Serialize};
use smartrag_common::config::VectorIndexConfig;
use smartrag_common::errors::{AppError, Result};
use std::time::Duration;
use uuid::Uuid;

/// HTTP client for the ANN service
pub struct VectorIndexClient {
    client: reqwest::Client,
    config: VectorIndexConfig,
}

#[derive(Serialize)]
struct SearchBody<'a> {
    vector: &'a [f32],
    limit: usize,
    with_payload: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    filter: Option<ScopeFilter>,
}

#[derive(Serialize)]
struct ScopeFilter {
    must: Vec<FieldMatch>,
}

#[derive(Serialize)]
struct FieldMatch {
    key: &'static str,
    #[serde(rename = "match")]
    matcher: MatchValue,
}

#[derive(Serialize)]
struct MatchValue {
    value: String,
}

#[derive(Deserialize)]
struct SearchResponse {
    result: Vec<SearchHit>,
}

#[derive(Deserialize)]
struct SearchHit {
    id: Uuid,
    score: f32,
    payload: HitPayload,
}

#[derive(Deserialize)]
struct HitPayload {
    source_path: String,
    #[serde(default)]
    ordinal: i32,
    content: String,
    #[serde(default)]
    scope: Scope,
}

impl VectorIndexClient {
    pub fn new(config: VectorIndexConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::Configuration {
                message: format!("failed to create vector index HTTP client: {}", e),
            })?;

        Ok(Self { client, config })
    }
}

#[async_trait::async_trait]
impl VectorSearcher for VectorIndexClient {
    async fn search(&self, vector: &[f32], k: usize, scope: Scope) -> Result<Vec<RetrievedChunk>> {
        let url = format!(
            "{}/collections/{}/points/search",
            self.config.base_url, self.config.collection
        );

        let filter = scope.filter_value().map(|value| ScopeFilter {
            must: vec![FieldMatch {
                key: "scope",
                matcher: MatchValue {
                    value: value.to_string(),
                },
            }],
        });

        let body = SearchBody {
            vector,
            limit: k,
            with_payload: true,
            filter,
        };

        let mut builder = self.client.post(&url).json(&body);
        if let Some(key) = &self.config.api_key {
            builder = builder.header("api-key", key);
        }

        let response = builder.send().await.map_err(|e| AppError::IndexUnavailable {
            message: format!("vector search request failed: {}", e),
        })?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(AppError::IndexUnavailable {
                message: format!("vector index returned {}", status),
            });
        }

        let parsed: SearchResponse =
            response.json().await.map_err(|e| AppError::IndexUnavailable {
                message: format!("failed to parse vector search response: {}", e),
            })?;

        let chunks = parsed
            .result
            .into_iter()
            .map(|hit| RetrievedChunk {
                chunk_id: hit.id,
                source_path: hit.payload.source_path,
                ordinal: hit.payload.ordinal,
                content: hit.payload.content,
                score: hit.score,
                scope: hit.payload.scope,
            })
            .collect();

        Ok(chunks)
    }
}
