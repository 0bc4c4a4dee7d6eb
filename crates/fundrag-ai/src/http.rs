use anyhow::Context;
use fundrag_core::GenerationError;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use std::time::Duration;

use crate::llm_provider::LLMResult;

const MAX_ERROR_BODY: usize = 300;

pub(crate) fn build_client(timeout_secs: u64) -> anyhow::Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .context("Failed to create HTTP client")
}

/// Map a transport failure onto the retry taxonomy.
pub(crate) fn transport_error(provider: &str, err: reqwest::Error) -> GenerationError {
    if err.is_timeout() {
        GenerationError::retryable(format!("{} request timed out: {}", provider, err))
    } else if err.is_decode() || err.is_builder() {
        GenerationError::non_retryable(format!("{} request failed: {}", provider, err))
    } else {
        GenerationError::retryable(format!("{} request failed: {}", provider, err))
    }
}

/// Send a request and decode a JSON body, classifying every failure.
pub(crate) async fn send_json<T: DeserializeOwned>(
    provider: &str,
    request: RequestBuilder,
) -> LLMResult<T> {
    let response = request
        .send()
        .await
        .map_err(|e| transport_error(provider, e))?;

    let status = response.status();
    if !status.is_success() {
        let mut body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        if body.len() > MAX_ERROR_BODY {
            let cut = (0..=MAX_ERROR_BODY)
                .rev()
                .find(|i| body.is_char_boundary(*i))
                .unwrap_or(0);
            body.truncate(cut);
        }
        return Err(GenerationError::from_status(
            status.as_u16(),
            &format!("{} API error: {}", provider, body),
        ));
    }

    response
        .json::<T>()
        .await
        .map_err(|e| transport_error(provider, e))
}
