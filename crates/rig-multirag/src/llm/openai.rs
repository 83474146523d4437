//! OpenAI completion provider via Rig
//!
//! Provides OpenAI API access through rig-core's OpenAI client.

use async_trait::async_trait;
use futures::StreamExt;
use rig::agent::Agent;
use rig::client::{CompletionClient, ProviderClient};
use rig::completion::{Completion, CompletionModel, Message as RigMessage, Prompt};
use rig::providers::openai::Client;
use rig::streaming::StreamedAssistantContent;
use tracing::debug;

use super::provider::{CompletionProvider, CompletionRequest, CompletionStream};
use crate::error::CompletionError;

/// Default OpenAI model
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4.1";

/// OpenAI completion provider
///
/// # Example
///
/// ```rust,ignore
/// use rig_multirag::llm::OpenAIProvider;
///
/// // Create from environment (OPENAI_API_KEY)
/// let provider = OpenAIProvider::from_env()?;
///
/// // Or with explicit configuration
/// let provider = OpenAIProvider::new("sk-...", "gpt-4.1");
/// ```
pub struct OpenAIProvider {
    client: Client,
    model: String,
    temperature: Option<f64>,
}

impl OpenAIProvider {
    /// Create a new OpenAI provider with API key from OPENAI_API_KEY environment variable
    pub fn from_env() -> Result<Self, CompletionError> {
        Self::from_env_with_model(DEFAULT_OPENAI_MODEL)
    }

    /// Create from environment with specific model
    pub fn from_env_with_model(model: impl Into<String>) -> Result<Self, CompletionError> {
        if std::env::var("OPENAI_API_KEY").is_err() {
            return Err(CompletionError::Configuration(
                "OPENAI_API_KEY environment variable not set".to_string(),
            ));
        }

        Ok(Self {
            client: Client::from_env(),
            model: model.into(),
            temperature: None,
        })
    }

    /// Create with explicit API key and model
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        let api_key: String = api_key.into();
        Self {
            client: Client::from_val(api_key.into()),
            model: model.into(),
            temperature: None,
        }
    }

    /// Set the sampling temperature
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl CompletionProvider for OpenAIProvider {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, CompletionError> {
        let mut builder = self.client.agent(&self.model).preamble(&request.preamble());

        if let Some(temperature) = self.temperature {
            builder = builder.temperature(temperature);
        }

        let agent = builder.build();

        debug!(model = %self.model, schema = ?request.output_schema.as_ref().map(|s| s.name), "OpenAI completion");

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

        debug!(model = %self.model, "OpenAI streaming completion");

        stream_agent(&builder.build(), &request.user_prompt).await
    }

    fn name(&self) -> &str {
        "openai"
    }
}

/// Stream the text of a single-turn agent response
///
/// Only text fragments are forwarded; reasoning, tool calls and the final
/// usage record are skipped.
pub(crate) async fn stream_agent<M>(
    agent: &Agent<M>,
    user_prompt: &str,
) -> Result<CompletionStream, CompletionError>
where
    M: CompletionModel + Send + Sync + 'static,
{
    let stream = agent
        .completion(RigMessage::user(user_prompt.to_string()), Vec::new())
        .await
        .map_err(|e| classify_error(&e.to_string()))?
        .stream()
        .await
        .map_err(|e| classify_error(&e.to_string()))?;

    let fragments = stream.filter_map(|item| async move {
        match item {
            Ok(StreamedAssistantContent::Text(text)) => Some(Ok(text.text)),
            Ok(_) => None,
            Err(e) => Some(Err(classify_error(&e.to_string()))),
        }
    });

    Ok(CompletionStream::new(fragments))
}

/// Map a provider error message onto the completion error taxonomy
pub(crate) fn classify_error(message: &str) -> CompletionError {
    let lower = message.to_lowercase();
    if lower.contains("timed out") || lower.contains("timeout") {
        CompletionError::Timeout
    } else if lower.contains("429") || lower.contains("rate limit") || lower.contains("quota") {
        CompletionError::Quota(message.to_string())
    } else {
        CompletionError::Transport(message.to_string())
    }
}
