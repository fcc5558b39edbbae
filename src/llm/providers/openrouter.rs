//! OpenRouter provider.
//!
//! OpenRouter fronts many model vendors behind one OpenAI-compatible endpoint,
//! which lets every candidate in an exam share a single provider instance and
//! differ only by model id.

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

use crate::error::LlmError;
use crate::llm::litellm::{post_chat_completion, ApiRequest};
use crate::llm::{GenerationRequest, GenerationResponse, LlmProvider};

/// Default OpenRouter API endpoint.
const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// Default model to use if none specified.
const DEFAULT_MODEL: &str = "deepseek/deepseek-chat";

/// Maximum number of attempts for transient failures.
const MAX_RETRIES: u32 = 3;

/// Base delay for exponential backoff in milliseconds.
const BASE_RETRY_DELAY_MS: u64 = 1000;

const REQUEST_TIMEOUT_SECS: u64 = 120;

/// OpenRouter provider for LLM requests.
pub struct OpenRouterProvider {
    client: Client,
    api_key: String,
    base_url: String,
    default_model: String,
    max_retries: u32,
}

impl std::fmt::Debug for OpenRouterProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenRouterProvider")
            .field("base_url", &self.base_url)
            .field("default_model", &self.default_model)
            .field("api_key", &self.api_key_masked())
            .finish_non_exhaustive()
    }
}

impl OpenRouterProvider {
    /// Create a provider against the public OpenRouter endpoint.
    pub fn new(api_key: String) -> Result<Self, LlmError> {
        Self::with_custom_url(
            api_key,
            OPENROUTER_BASE_URL.to_string(),
            DEFAULT_MODEL.to_string(),
        )
    }

    /// Create a provider with a specific default model.
    pub fn with_model(api_key: String, model: String) -> Result<Self, LlmError> {
        Self::with_custom_url(api_key, OPENROUTER_BASE_URL.to_string(), model)
    }

    /// Create a provider against an OpenRouter-compatible proxy.
    ///
    /// # Arguments
    ///
    /// * `api_key` - API key for authentication
    /// * `base_url` - Base URL for the API, without the `/chat/completions` suffix
    /// * `model` - Default model identifier
    pub fn with_custom_url(
        api_key: String,
        base_url: String,
        model: String,
    ) -> Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| LlmError::ClientBuild(e.to_string()))?;

        Ok(Self {
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            default_model: model,
            max_retries: MAX_RETRIES,
        })
    }

    /// Overrides the number of attempts made for transient failures (minimum 1).
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }

    /// API key with everything but the first and last four characters hidden.
    pub fn api_key_masked(&self) -> String {
        let len = self.api_key.chars().count();
        if len <= 8 {
            "*".repeat(len)
        } else {
            let head: String = self.api_key.chars().take(4).collect();
            let tail: String = self.api_key.chars().skip(len - 4).collect();
            format!("{}...{}", head, tail)
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    async fn execute_with_retry(
        &self,
        request: &ApiRequest,
    ) -> Result<GenerationResponse, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);
        let mut last_error = None;

        for attempt in 0..self.max_retries {
            if attempt > 0 {
                // 1s, 2s, 4s, ...
                let delay_ms = BASE_RETRY_DELAY_MS * (1 << (attempt - 1));
                tracing::debug!(
                    model = %request.model,
                    attempt = attempt + 1,
                    delay_ms = delay_ms,
                    "Retrying OpenRouter request after transient failure"
                );
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }

            match post_chat_completion(&self.client, &url, Some(&self.api_key), request).await {
                Ok(response) => return Ok(response),
                Err(err) if err.is_transient() => {
                    tracing::warn!(
                        model = %request.model,
                        attempt = attempt + 1,
                        max_retries = self.max_retries,
                        error = %err,
                        "Transient error, will retry"
                    );
                    last_error = Some(err);
                }
                Err(err) => return Err(err),
            }
        }

        Err(last_error.unwrap_or_else(|| {
            LlmError::RequestFailed("Max retries exceeded with no error captured".to_string())
        }))
    }
}

#[async_trait]
impl LlmProvider for OpenRouterProvider {
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, LlmError> {
        let api_request = ApiRequest::from_request(request, &self.default_model);
        self.execute_with_retry(&api_request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Message;

    #[test]
    fn test_openrouter_provider_new() {
        let provider = OpenRouterProvider::new("test-api-key".to_string()).expect("builds");

        assert_eq!(provider.base_url(), OPENROUTER_BASE_URL);
        assert_eq!(provider.default_model(), DEFAULT_MODEL);
        assert_eq!(provider.api_key_masked(), "test...-key");
    }

    #[test]
    fn test_api_key_masked_non_ascii() {
        let provider = OpenRouterProvider::new("ключ-секрет-ключ".to_string()).expect("builds");
        assert_eq!(provider.api_key_masked(), "ключ...ключ");
        assert!(format!("{:?}", provider).contains("ключ...ключ"));

        let short = OpenRouterProvider::new("ключ".to_string()).expect("builds");
        assert_eq!(short.api_key_masked(), "****");
    }

    #[test]
    fn test_openrouter_provider_with_custom_url() {
        let provider = OpenRouterProvider::with_custom_url(
            "test-key".to_string(),
            "https://proxy.example.com/v1/".to_string(),
            "custom-model".to_string(),
        )
        .expect("builds");

        assert_eq!(provider.base_url(), "https://proxy.example.com/v1");
        assert_eq!(provider.default_model(), "custom-model");
    }

    #[test]
    fn test_api_key_masked_short() {
        let provider = OpenRouterProvider::new("abc".to_string()).expect("builds");
        assert_eq!(provider.api_key_masked(), "***");
    }

    #[test]
    fn test_debug_does_not_leak_key() {
        let provider = OpenRouterProvider::new("sk-1234567890abcdef".to_string()).expect("builds");
        let rendered = format!("{:?}", provider);
        assert!(rendered.contains("sk-1...cdef"));
        assert!(!rendered.contains("sk-1234567890abcdef"));
    }

    #[test]
    fn test_max_retries_floor() {
        let provider = OpenRouterProvider::new("k".to_string())
            .expect("builds")
            .with_max_retries(0);
        assert_eq!(provider.max_retries, 1);
    }

    #[tokio::test]
    async fn test_generate_connection_error() {
        let provider = OpenRouterProvider::with_custom_url(
            "test-key".to_string(),
            "http://localhost:65535".to_string(),
            "test-model".to_string(),
        )
        .expect("builds")
        .with_max_retries(1);

        let request = GenerationRequest::new("test-model", vec![Message::user("test")]);
        let result = provider.generate(request).await;

        assert!(matches!(result, Err(LlmError::RequestFailed(_))));
    }
}
