use async_trait::async_trait;
use fundrag_core::{EmbeddingConfig, RetrievalError};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

use crate::providers::EmbeddingProvider;

#[derive(Debug, Clone)]
pub struct OpenAIEmbeddingConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub dimension: usize,
    pub timeout_secs: u64,
    pub max_retries: usize,
}

impl OpenAIEmbeddingConfig {
    pub fn from_embedding_config(config: &EmbeddingConfig) -> Option<Self> {
        let api_key = config.openai_api_key.clone()?;
        Some(Self {
            api_key,
            base_url: config.openai_base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            dimension: config.dimension,
            timeout_secs: config.timeout_secs,
            max_retries: 3,
        })
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: [&'a str; 1],
    dimensions: usize,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// Hosted embeddings via an OpenAI-style `/embeddings` endpoint.
pub struct OpenAIEmbeddingProvider {
    client: Client,
    config: OpenAIEmbeddingConfig,
}

impl OpenAIEmbeddingProvider {
    pub fn new(config: OpenAIEmbeddingConfig) -> Result<Self, RetrievalError> {
        if config.api_key.is_empty() {
            return Err(RetrievalError::Embedding(
                "OpenAI API key is required. Set OPENAI_API_KEY environment variable.".into(),
            ));
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| RetrievalError::Embedding(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client, config })
    }

    fn should_retry(status: StatusCode) -> bool {
        status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
    }

    fn retry_backoff(attempt: usize) -> Duration {
        let capped = attempt.min(5) as u32;
        Duration::from_millis(500 * (1 << capped))
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, RetrievalError> {
        let request = EmbeddingRequest {
            model: &self.config.model,
            input: [text],
            dimensions: self.config.dimension,
        };
        let endpoint = format!("{}/embeddings", self.config.base_url);

        let mut attempt = 0usize;
        loop {
            let response = self
                .client
                .post(&endpoint)
                .bearer_auth(&self.config.api_key)
                .json(&request)
                .send()
                .await;

            match response {
                Ok(resp) if resp.status().is_success() => {
                    let parsed: EmbeddingResponse = resp.json().await.map_err(|e| {
                        RetrievalError::Embedding(format!(
                            "failed to parse OpenAI embedding response: {}",
                            e
                        ))
                    })?;
                    let embedding = parsed
                        .data
                        .into_iter()
                        .next()
                        .map(|d| d.embedding)
                        .ok_or_else(|| {
                            RetrievalError::Embedding("OpenAI returned no embedding".into())
                        })?;
                    if embedding.len() != self.config.dimension {
                        return Err(RetrievalError::DimensionMismatch {
                            expected: self.config.dimension,
                            actual: embedding.len(),
                        });
                    }
                    return Ok(embedding);
                }
                Ok(resp) => {
                    let status = resp.status();
                    let body = resp
                        .text()
                        .await
                        .unwrap_or_else(|_| "<body unavailable>".to_string());
                    if Self::should_retry(status) && attempt + 1 < self.config.max_retries {
                        attempt += 1;
                        warn!("OpenAI embeddings returned {}, retrying (attempt {})", status, attempt);
                        tokio::time::sleep(Self::retry_backoff(attempt)).await;
                        continue;
                    }
                    return Err(RetrievalError::Embedding(format!(
                        "OpenAI embeddings request failed ({}): {}",
                        status, body
                    )));
                }
                Err(err) => {
                    let retryable = err.is_timeout() || err.is_connect() || err.is_request();
                    if retryable && attempt + 1 < self.config.max_retries {
                        attempt += 1;
                        warn!("OpenAI embeddings request failed: {}, retrying", err);
                        tokio::time::sleep(Self::retry_backoff(attempt)).await;
                        continue;
                    }
                    return Err(RetrievalError::Embedding(err.to_string()));
                }
            }
        }
    }

    fn model_id(&self) -> &str {
        &self.config.model
    }

    fn dimension(&self) -> usize {
        self.config.dimension
    }

    fn provider_name(&self) -> &str {
        "openai"
    }
}
