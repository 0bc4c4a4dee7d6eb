use crate::http::{build_client, send_json};
use crate::llm_provider::*;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

const OPENAI_API_BASE: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Configuration for OpenAI and OpenAI-compatible chat endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAIConfig {
    /// Optional for self-hosted compatible servers
    pub api_key: Option<String>,
    /// Base URL for the API (e.g., "https://api.openai.com/v1")
    pub base_url: String,
    pub model: String,
    pub timeout_secs: u64,
    /// Provider name for display purposes
    pub provider_name: String,
    pub kind: ProviderKind,
}

impl Default for OpenAIConfig {
    fn default() -> Self {
        Self {
            api_key: std::env::var("OPENAI_API_KEY").ok(),
            base_url: OPENAI_API_BASE.to_string(),
            model: DEFAULT_MODEL.to_string(),
            timeout_secs: 30,
            provider_name: "openai".to_string(),
            kind: ProviderKind::Hosted,
        }
    }
}

impl OpenAIConfig {
    /// Any server speaking the chat completions protocol
    pub fn compatible(base_url: String, model: String, api_key: Option<String>) -> Self {
        let kind = if base_url.contains("localhost") || base_url.contains("127.0.0.1") {
            ProviderKind::Local
        } else {
            ProviderKind::Hosted
        };
        Self {
            api_key,
            base_url,
            model,
            provider_name: "openai-compatible".to_string(),
            kind,
            ..Default::default()
        }
    }
}

/// Chat completions client
pub struct OpenAIProvider {
    config: OpenAIConfig,
    client: Client,
}

impl OpenAIProvider {
    pub fn new(config: OpenAIConfig) -> Result<Self> {
        if config.provider_name == "openai" && config.api_key.as_deref().unwrap_or("").is_empty() {
            return Err(anyhow!(
                "OpenAI API key is required. Set OPENAI_API_KEY environment variable."
            ));
        }
        let client = build_client(config.timeout_secs)?;
        Ok(Self { config, client })
    }

    fn build_request(&self, messages: &[Message], config: &GenerationConfig) -> ChatRequest {
        ChatRequest {
            model: self.config.model.clone(),
            messages: messages
                .iter()
                .map(|m| ChatMessage {
                    role: m.role.wire_role().to_string(),
                    content: m.content.clone(),
                })
                .collect(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            stop: config.stop.clone(),
        }
    }
}

#[async_trait]
impl LLMProvider for OpenAIProvider {
    async fn generate_chat(
        &self,
        messages: &[Message],
        config: &GenerationConfig,
    ) -> LLMResult<LLMResponse> {
        let request = self.build_request(messages, config);
        let mut builder = self
            .client
            .post(format!(
                "{}/chat/completions",
                self.config.base_url.trim_end_matches('/')
            ))
            .json(&request);
        if let Some(key) = self.config.api_key.as_deref().filter(|k| !k.is_empty()) {
            builder = builder.bearer_auth(key);
        }

        let response: ChatResponse = send_json(&self.config.provider_name, builder).await?;

        let choice = response.choices.into_iter().next();
        let finish_reason = choice.as_ref().and_then(|c| c.finish_reason.clone());
        let content = choice
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        Ok(LLMResponse {
            content,
            total_tokens: response.usage.as_ref().map(|u| u.total_tokens),
            prompt_tokens: response.usage.as_ref().map(|u| u.prompt_tokens),
            completion_tokens: response.usage.as_ref().map(|u| u.completion_tokens),
            finish_reason,
            model: response.model.unwrap_or_else(|| self.config.model.clone()),
        })
    }

    async fn is_available(&self) -> bool {
        let mut builder = self.client.get(format!(
            "{}/models",
            self.config.base_url.trim_end_matches('/')
        ));
        if let Some(key) = self.config.api_key.as_deref().filter(|k| !k.is_empty()) {
            builder = builder.bearer_auth(key);
        }
        matches!(builder.send().await, Ok(resp) if resp.status().is_success())
    }

    fn provider_name(&self) -> &str {
        &self.config.provider_name
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }

    fn kind(&self) -> ProviderKind {
        self.config.kind
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    prompt_tokens: usize,
    completion_tokens: usize,
    total_tokens: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openai_requires_key() {
        let config = OpenAIConfig {
            api_key: None,
            ..Default::default()
        };
        assert!(OpenAIProvider::new(config).is_err());
    }

    #[test]
    fn test_compatible_allows_missing_key() {
        let config = OpenAIConfig::compatible(
            "http://localhost:1234/v1".into(),
            "local-model".into(),
            None,
        );
        let provider = OpenAIProvider::new(config).unwrap();
        assert_eq!(provider.provider_name(), "openai-compatible");
        assert_eq!(provider.kind(), ProviderKind::Local);
    }

    #[test]
    fn test_roles_on_the_wire() {
        let provider = OpenAIProvider::new(OpenAIConfig {
            api_key: Some("sk-test".into()),
            ..Default::default()
        })
        .unwrap();
        let request = provider.build_request(
            &[
                Message::system("rules"),
                Message::context("chunks"),
                Message::user("q"),
            ],
            &GenerationConfig::default(),
        );
        let roles: Vec<&str> = request.messages.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["system", "user", "user"]);
    }

    #[test]
    fn test_parse_response() {
        let json = r#"{
            "model": "gpt-4o-mini",
            "choices": [{"message": {"role": "assistant", "content": "NAV is published daily."}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 50, "completion_tokens": 6, "total_tokens": 56}
        }"#;
        let parsed: ChatResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.usage.unwrap().total_tokens, 56);
        assert_eq!(
            parsed.choices[0].message.content.as_deref(),
            Some("NAV is published daily.")
        );
    }
}
