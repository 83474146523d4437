//! Ollama completion provider via Rig
//!
//! Runs the workflow against a local model served by Ollama.

use async_trait::async_trait;
use rig::client::{CompletionClient, ProviderClient};
use rig::completion::Prompt;
use rig::providers::ollama;
use tracing::debug;

use super::openai::{classify_error, stream_agent};
use super::provider::{CompletionProvider, CompletionRequest, CompletionStream};
use crate::error::CompletionError;

/// Default Ollama model
pub const DEFAULT_OLLAMA_MODEL: &str = "llama3.2";

/// Default Ollama server
pub const DEFAULT_OLLAMA_HOST: &str = "http://localhost:11434";

/// Ollama completion provider
pub struct OllamaProvider {
    client: ollama::Client,
    model: String,
    host: String,
    temperature: Option<f64>,
}

impl OllamaProvider {
    /// Connect to the server named by OLLAMA_API_BASE_URL (or the local default)
    pub fn from_env(model: impl Into<String>) -> Self {
        let host = std::env::var("OLLAMA_API_BASE_URL")
            .unwrap_or_else(|_| DEFAULT_OLLAMA_HOST.to_string());
        Self::new(host, model)
    }

    /// Connect to an explicit server
    ///
    /// rig's Ollama client reads its base URL from OLLAMA_API_BASE_URL, so the
    /// variable is set to `host` before the client is built.
    pub fn new(host: impl Into<String>, model: impl Into<String>) -> Self {
        let host = host.into();
        std::env::set_var("OLLAMA_API_BASE_URL", &host);

        Self {
            client: ollama::Client::from_env(),
            model: model.into(),
            host,
            temperature: None,
        }
    }

    /// Set the sampling temperature
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }
}

#[async_trait]
impl CompletionProvider for OllamaProvider {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, CompletionError> {
        let mut builder = self.client.agent(&self.model).preamble(&request.preamble());

        if let Some(temperature) = self.temperature {
            builder = builder.temperature(temperature);
        }

        let agent = builder.build();

        debug!(host = %self.host, model = %self.model, "Ollama completion");

        agent
            .prompt(request.user_prompt.as_str())
            .await
            .map_err(|e| classify_error(&e.to_string()))
    }

    async fn stream(&self, request: &CompletionRequest) -> Result<CompletionStream, CompletionError> {
        let mut builder = self.client.agent(&self.model).preamble(&request.preamble());

        if let Some(temperature) = self.temperature {
            builder = builder.temperature(temperature);
        }

        debug!(host = %self.host, model = %self.model, "Ollama streaming completion");

        stream_agent(&builder.build(), &request.user_prompt).await
    }

    fn name(&self) -> &str {
        "ollama"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ollama_provider_implements_trait() {
        fn assert_provider<T: CompletionProvider>() {}
        assert_provider::<OllamaProvider>();
    }

    #[tokio::test]
    #[ignore] // Requires a running Ollama server with the default model pulled
    async fn test_ollama_provider_complete() {
        let provider = OllamaProvider::from_env(DEFAULT_OLLAMA_MODEL);
        let request = CompletionRequest::new("Answer in one word.", "Say 'hello'.");

        let response = provider.complete(&request).await.unwrap();
        assert!(!response.is_empty());
    }
}
