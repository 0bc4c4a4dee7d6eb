use crate::http::send_json;
use crate::llm_provider::*;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::timeout;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct OllamaConfig {
    pub model_name: String,
    pub base_url: String,
    pub timeout: Duration,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            model_name: "llama3.1:8b".to_string(),
            base_url: "http://localhost:11434".to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
    options: ChatOptions,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatOptions {
    temperature: f32,
    num_predict: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ResponseMessage,
    #[serde(default)]
    done_reason: Option<String>,
    #[serde(default)]
    eval_count: Option<usize>,
    #[serde(default)]
    prompt_eval_count: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: String,
}

/// Local model served by Ollama's `/api/chat`
pub struct OllamaProvider {
    client: Client,
    config: OllamaConfig,
}

impl OllamaProvider {
    pub fn new(config: OllamaConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }
}

#[async_trait]
impl LLMProvider for OllamaProvider {
    async fn generate_chat(
        &self,
        messages: &[Message],
        config: &GenerationConfig,
    ) -> LLMResult<LLMResponse> {
        let request = ChatRequest {
            model: self.config.model_name.clone(),
            messages: messages
                .iter()
                .map(|m| ChatMessage {
                    role: m.role.wire_role().to_string(),
                    content: m.content.clone(),
                })
                .collect(),
            stream: false,
            options: ChatOptions {
                temperature: config.temperature,
                num_predict: config.max_tokens,
                stop: config.stop.clone(),
            },
        };

        debug!("Sending chat request to Ollama model {}", self.config.model_name);

        let response: ChatResponse = timeout(
            self.config.timeout,
            send_json(
                "ollama",
                self.client
                    .post(format!("{}/api/chat", self.config.base_url))
                    .json(&request),
            ),
        )
        .await
        .map_err(|_| fundrag_core::GenerationError::timeout(self.config.timeout))??;

        let total = match (response.prompt_eval_count, response.eval_count) {
            (Some(p), Some(e)) => Some(p + e),
            _ => None,
        };

        Ok(LLMResponse {
            content: response.message.content,
            total_tokens: total,
            prompt_tokens: response.prompt_eval_count,
            completion_tokens: response.eval_count,
            finish_reason: response.done_reason,
            model: self.config.model_name.clone(),
        })
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

    fn provider_name(&self) -> &str {
        "ollama"
    }

    fn model_name(&self) -> &str {
        &self.config.model_name
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Local
    }
}
