use crate::llm_provider::{GenerationConfig, LLMProvider, LLMResponse, LLMResult, ProviderKind};
use crate::prompt::Prompt;
use fundrag_core::GenerationError;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::debug;

/// Provider-agnostic generation with a hard per-call timeout.
///
/// The backend is chosen once at startup; nothing here branches on which
/// provider is behind the trait object. Dropping the timed-out future drops
/// the in-flight request with it.
#[derive(Clone)]
pub struct LLMClient {
    provider: Arc<dyn LLMProvider>,
    timeout: Duration,
}

impl LLMClient {
    pub fn new(provider: Arc<dyn LLMProvider>, timeout: Duration) -> Self {
        Self { provider, timeout }
    }

    pub fn provider(&self) -> &Arc<dyn LLMProvider> {
        &self.provider
    }

    pub fn kind(&self) -> ProviderKind {
        self.provider.kind()
    }

    pub async fn generate(
        &self,
        prompt: &Prompt,
        temperature: f32,
        max_tokens: usize,
    ) -> LLMResult<String> {
        self.generate_response(prompt, temperature, max_tokens)
            .await
            .map(|r| r.content)
    }

    /// Like `generate`, keeping token usage for logging.
    pub async fn generate_response(
        &self,
        prompt: &Prompt,
        temperature: f32,
        max_tokens: usize,
    ) -> LLMResult<LLMResponse> {
        let config = GenerationConfig {
            temperature,
            max_tokens,
            stop: None,
        };

        let mut response = timeout(
            self.timeout,
            self.provider.generate_chat(&prompt.messages, &config),
        )
        .await
        .map_err(|_| GenerationError::timeout(self.timeout))??;

        response.content = response.content.trim().to_string();
        if response.content.is_empty() {
            return Err(GenerationError::retryable(format!(
                "{} returned an empty completion",
                self.provider.provider_name()
            )));
        }

        debug!(
            "{} generated {} chars ({:?} tokens)",
            self.provider.provider_name(),
            response.content.len(),
            response.total_tokens
        );
        Ok(response)
    }

    pub async fn is_available(&self) -> bool {
        matches!(
            timeout(self.timeout, self.provider.is_available()).await,
            Ok(true)
        )
    }
}
