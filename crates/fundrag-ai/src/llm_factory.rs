use crate::anthropic_provider::{AnthropicConfig, AnthropicProvider};
use crate::gemini_provider::{GeminiConfig, GeminiProvider};
use crate::llm_provider::*;
use crate::local_provider::{LocalEndpointConfig, LocalEndpointProvider};
use crate::ollama_provider::{OllamaConfig, OllamaProvider};
use crate::openai_provider::{OpenAIConfig, OpenAIProvider};
use anyhow::{anyhow, Result};
use fundrag_core::config_manager::LLMConfig;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Factory for creating LLM providers based on configuration
pub struct LLMProviderFactory;

impl LLMProviderFactory {
    /// Create an LLM provider from configuration
    pub fn create_from_config(config: &LLMConfig) -> Result<Arc<dyn LLMProvider>> {
        let provider_name = config.provider.to_lowercase();

        let provider = match provider_name.as_str() {
            "gemini" => Self::create_gemini_provider(config),
            "openai" => Self::create_openai_provider(config),
            "openai-compatible" => Self::create_openai_compatible_provider(config),
            "anthropic" => Self::create_anthropic_provider(config),
            "ollama" => Self::create_ollama_provider(config),
            "local" => Self::create_local_provider(config),
            _ => Err(anyhow!(
                "Unsupported LLM provider: {}. Available providers: {}",
                provider_name,
                Self::supported_providers().join(", ")
            )),
        }?;

        info!(
            "LLM provider ready: {} ({:?}, model {})",
            provider.provider_name(),
            provider.kind(),
            provider.model_name()
        );
        Ok(provider)
    }

    fn create_gemini_provider(config: &LLMConfig) -> Result<Arc<dyn LLMProvider>> {
        let api_key = config
            .gemini_api_key
            .clone()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| {
                anyhow!(
                    "Gemini API key not found. Set 'gemini_api_key' in config \
                     or GEMINI_API_KEY environment variable"
                )
            })?;

        let defaults = GeminiConfig::default();
        let gemini_config = GeminiConfig {
            api_key,
            model: config.model.clone().unwrap_or(defaults.model),
            base_url: config.base_url.clone().unwrap_or(defaults.base_url),
            timeout_secs: config.timeout_secs,
        };

        Ok(Arc::new(GeminiProvider::new(gemini_config)?))
    }

    fn create_openai_provider(config: &LLMConfig) -> Result<Arc<dyn LLMProvider>> {
        let api_key = config
            .openai_api_key
            .clone()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| {
                anyhow!(
                    "OpenAI API key not found. Set 'openai_api_key' in config \
                     or OPENAI_API_KEY environment variable"
                )
            })?;

        let defaults = OpenAIConfig::default();
        let openai_config = OpenAIConfig {
            api_key: Some(api_key),
            base_url: config.base_url.clone().unwrap_or(defaults.base_url),
            model: config.model.clone().unwrap_or(defaults.model),
            timeout_secs: config.timeout_secs,
            ..defaults
        };

        Ok(Arc::new(OpenAIProvider::new(openai_config)?))
    }

    fn create_openai_compatible_provider(config: &LLMConfig) -> Result<Arc<dyn LLMProvider>> {
        let base_url = config.base_url.clone().ok_or_else(|| {
            anyhow!(
                "openai-compatible provider requires 'base_url' in config \
                 or FUNDRAG_LLM_BASE_URL environment variable"
            )
        })?;

        let mut compat_config = OpenAIConfig::compatible(
            base_url,
            config
                .model
                .clone()
                .unwrap_or_else(|| "local-model".to_string()),
            config.openai_api_key.clone(),
        );
        compat_config.timeout_secs = config.timeout_secs;

        Ok(Arc::new(OpenAIProvider::new(compat_config)?))
    }

    fn create_anthropic_provider(config: &LLMConfig) -> Result<Arc<dyn LLMProvider>> {
        let api_key = config
            .anthropic_api_key
            .clone()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| {
                anyhow!(
                    "Anthropic API key not found. Set 'anthropic_api_key' in config \
                     or ANTHROPIC_API_KEY environment variable"
                )
            })?;

        let defaults = AnthropicConfig::default();
        let anthropic_config = AnthropicConfig {
            api_key,
            model: config.model.clone().unwrap_or(defaults.model),
            timeout_secs: config.timeout_secs,
        };

        Ok(Arc::new(AnthropicProvider::new(anthropic_config)?))
    }

    fn create_ollama_provider(config: &LLMConfig) -> Result<Arc<dyn LLMProvider>> {
        let defaults = OllamaConfig::default();
        let ollama_config = OllamaConfig {
            model_name: config.model.clone().unwrap_or(defaults.model_name),
            base_url: config.ollama_url.trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(config.timeout_secs),
        };

        Ok(Arc::new(OllamaProvider::new(ollama_config)))
    }

    fn create_local_provider(config: &LLMConfig) -> Result<Arc<dyn LLMProvider>> {
        if config.local_url.is_empty() {
            return Err(anyhow!(
                "local provider requires 'local_url' in config or FUNDRAG_LOCAL_LLM_URL"
            ));
        }
        let local_config = LocalEndpointConfig {
            url: config.local_url.clone(),
            model: config
                .model
                .clone()
                .unwrap_or_else(|| "local-model".to_string()),
            api_key: config.local_api_key.clone(),
            timeout_secs: config.timeout_secs,
        };

        Ok(Arc::new(LocalEndpointProvider::new(local_config)?))
    }

    /// Get a list of supported providers
    pub fn supported_providers() -> Vec<&'static str> {
        vec![
            "gemini",
            "openai",
            "openai-compatible",
            "anthropic",
            "ollama",
            "local",
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supported_providers() {
        let providers = LLMProviderFactory::supported_providers();
        assert!(providers.contains(&"gemini"));
        assert!(providers.contains(&"ollama"));
        assert!(providers.contains(&"local"));
        assert_eq!(
            providers,
            fundrag_core::config_manager::LLM_PROVIDERS.to_vec()
        );
    }

    #[test]
    fn test_unknown_provider() {
        let config = LLMConfig {
            provider: "qwen".to_string(),
            ..Default::default()
        };
        let err = LLMProviderFactory::create_from_config(&config)
            .err()
            .unwrap();
        assert!(err.to_string().contains("Unsupported LLM provider"));
    }

    #[test]
    fn test_gemini_without_key_fails() {
        let config = LLMConfig {
            provider: "gemini".to_string(),
            gemini_api_key: None,
            ..Default::default()
        };
        assert!(LLMProviderFactory::create_from_config(&config).is_err());
    }

    #[test]
    fn test_ollama_needs_no_key() {
        let config = LLMConfig {
            provider: "Ollama".to_string(),
            model: Some("mistral".to_string()),
            ..Default::default()
        };
        let provider = LLMProviderFactory::create_from_config(&config).unwrap();
        assert_eq!(provider.provider_name(), "ollama");
        assert_eq!(provider.model_name(), "mistral");
        assert_eq!(provider.kind(), ProviderKind::Local);
    }

    #[test]
    fn test_openai_compatible_requires_base_url() {
        let mut config = LLMConfig {
            provider: "openai-compatible".to_string(),
            base_url: None,
            ..Default::default()
        };
        assert!(LLMProviderFactory::create_from_config(&config).is_err());

        config.base_url = Some("http://localhost:1234/v1".to_string());
        let provider = LLMProviderFactory::create_from_config(&config).unwrap();
        assert_eq!(provider.provider_name(), "openai-compatible");
    }

    #[test]
    fn test_local_provider() {
        let config = LLMConfig {
            provider: "local".to_string(),
            ..Default::default()
        };
        let provider = LLMProviderFactory::create_from_config(&config).unwrap();
        assert_eq!(provider.provider_name(), "local");
    }
}
