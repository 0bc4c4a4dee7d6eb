pub mod anthropic_provider;
pub mod gemini_provider;
pub mod guardrails;
mod http;
pub mod llm_client;
pub mod llm_factory;
pub mod llm_provider;
pub mod local_provider;
pub mod ollama_provider;
pub mod openai_provider;
pub mod prompt;

pub use guardrails::{GuardrailViolation, Guardrails, ViolationKind, REFUSAL_TEMPLATE};
pub use llm_client::LLMClient;
pub use llm_factory::LLMProviderFactory;
pub use llm_provider::*;
pub use prompt::{Prompt, PromptBuilder, PromptSource, SYSTEM_GUARDRAIL};
