use fundrag_core::{ConfigError, EmbeddingConfig, FundRagError, Result};
use std::sync::Arc;
use tracing::info;

use crate::hashing_embedding_provider::HashingEmbeddingProvider;
use crate::ollama_embedding_provider::{OllamaEmbeddingConfig, OllamaEmbeddingProvider};
use crate::openai_embedding_provider::{OpenAIEmbeddingConfig, OpenAIEmbeddingProvider};
use crate::providers::EmbeddingProvider;

/// Create the query embedder selected in configuration.
pub fn create_embedding_provider(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    let provider: Arc<dyn EmbeddingProvider> = match config.provider.to_lowercase().as_str() {
        "ollama" => {
            Arc::new(OllamaEmbeddingProvider::new(OllamaEmbeddingConfig::from(config)))
        }
        "openai" => {
            let openai = OpenAIEmbeddingConfig::from_embedding_config(config).ok_or_else(|| {
                FundRagError::Config(ConfigError::ValidationError(
                    "OpenAI embeddings need 'openai_api_key' in config or OPENAI_API_KEY".into(),
                ))
            })?;
            Arc::new(OpenAIEmbeddingProvider::new(openai)?)
        }
        "hashing" => Arc::new(HashingEmbeddingProvider::new(config.dimension)),
        other => {
            return Err(FundRagError::Config(ConfigError::ValidationError(format!(
                "Unsupported embedding provider: {}. Available providers: ollama, openai, hashing",
                other
            ))))
        }
    };

    info!(
        "Embedding provider: {} (model {}, {} dims)",
        provider.provider_name(),
        provider.model_id(),
        provider.dimension()
    );
    Ok(provider)
}
