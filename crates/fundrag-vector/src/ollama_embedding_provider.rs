/// Ollama embedding provider for locally served sentence-transformer models
use async_trait::async_trait;
use fundrag_core::{EmbeddingConfig, RetrievalError};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::timeout;
use tracing::debug;

use crate::providers::EmbeddingProvider;

#[derive(Debug, Clone)]
pub struct OllamaEmbeddingConfig {
    pub model_name: String,
    pub base_url: String,
    pub dimension: usize,
    pub timeout: Duration,
}

impl Default for OllamaEmbeddingConfig {
    fn default() -> Self {
        Self {
            model_name: "all-minilm".to_string(),
            base_url: "http://localhost:11434".to_string(),
            dimension: 384,
            timeout: Duration::from_secs(30),
        }
    }
}

impl From<&EmbeddingConfig> for OllamaEmbeddingConfig {
    fn from(config: &EmbeddingConfig) -> Self {
        Self {
            model_name: config.model.clone(),
            base_url: config.ollama_url.trim_end_matches('/').to_string(),
            dimension: config.dimension,
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }
}

#[derive(Debug, Serialize)]
struct OllamaEmbeddingRequest<'a> {
    model: &'a str,
    input: [&'a str; 1],
}

#[derive(Debug, Deserialize)]
struct OllamaEmbeddingResponse {
    embeddings: Vec<Vec<f32>>,
}

pub struct OllamaEmbeddingProvider {
    client: Client,
    config: OllamaEmbeddingConfig,
}

impl OllamaEmbeddingProvider {
    pub fn new(config: OllamaEmbeddingConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, RetrievalError> {
        let request = OllamaEmbeddingRequest {
            model: &self.config.model_name,
            input: [text],
        };

        debug!("Embedding query with Ollama model {}", self.config.model_name);

        let response = timeout(
            self.config.timeout,
            self.client
                .post(format!("{}/api/embed", self.config.base_url))
                .json(&request)
                .send(),
        )
        .await
        .map_err(|_| RetrievalError::Timeout(self.config.timeout))?
        .map_err(|e| RetrievalError::Embedding(format!("Ollama request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(RetrievalError::Embedding(format!(
                "Ollama embedding error ({}): {}",
                status, error_text
            )));
        }

        let parsed: OllamaEmbeddingResponse = response.json().await.map_err(|e| {
            RetrievalError::Embedding(format!("Failed to parse Ollama response: {}", e))
        })?;

        let embedding = parsed
            .embeddings
            .into_iter()
            .next()
            .ok_or_else(|| RetrievalError::Embedding("Ollama returned no embedding".into()))?;

        if embedding.len() != self.config.dimension {
            return Err(RetrievalError::DimensionMismatch {
                expected: self.config.dimension,
                actual: embedding.len(),
            });
        }

        Ok(embedding)
    }

    fn model_id(&self) -> &str {
        &self.config.model_name
    }

    fn dimension(&self) -> usize {
        self.config.dimension
    }

    fn provider_name(&self) -> &str {
        "ollama"
    }

    async fn is_available(&self) -> bool {
        let check = self
            .client
            .get(format!("{}/api/tags", self.config.base_url))
            .send();
        matches!(
            timeout(Duration::from_secs(5), check).await,
            Ok(Ok(resp)) if resp.status().is_success()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_embedding_config() {
        let embedding = EmbeddingConfig {
            ollama_url: "http://ollama:11434/".to_string(),
            ..Default::default()
        };
        let config = OllamaEmbeddingConfig::from(&embedding);
        assert_eq!(config.base_url, "http://ollama:11434");
        assert_eq!(config.model_name, "all-MiniLM-L6-v2");
        assert_eq!(config.dimension, 384);
    }

    #[tokio::test]
    async fn test_unreachable_server_is_embedding_error() {
        let provider = OllamaEmbeddingProvider::new(OllamaEmbeddingConfig {
            base_url: "http://127.0.0.1:1".to_string(),
            timeout: Duration::from_secs(2),
            ..Default::default()
        });
        let err = provider.embed("expense ratio").await.unwrap_err();
        assert!(err.is_transient());
    }
}
