//! Completion provider trait definition
//!
//! The workflow only needs one thing from a language model: given a system
//! prompt, a user prompt and optionally a JSON schema, return text. Typed
//! parsing is layered on top in [`super::schema`].

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use std::pin::Pin;

use crate::error::CompletionError;

/// JSON schema attached to a request for structured output
#[derive(Debug, Clone, PartialEq)]
pub struct OutputSchema {
    pub name: &'static str,
    pub schema: serde_json::Value,
}

/// A single completion request
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub system_prompt: String,
    pub user_prompt: String,
    pub output_schema: Option<OutputSchema>,
}

impl CompletionRequest {
    pub fn new(system_prompt: impl Into<String>, user_prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            user_prompt: user_prompt.into(),
            output_schema: None,
        }
    }

    /// Request output matching a JSON schema
    pub fn with_schema(mut self, schema: OutputSchema) -> Self {
        self.output_schema = Some(schema);
        self
    }

    /// System prompt with the output schema instructions appended
    ///
    /// Providers without native structured output send this as the preamble.
    pub fn preamble(&self) -> String {
        match &self.output_schema {
            Some(schema) => format!(
                "{}\n\nRespond with a single JSON object named `{}` that matches this JSON schema, \
                 and nothing else:\n{}",
                self.system_prompt, schema.name, schema.schema
            ),
            None => self.system_prompt.clone(),
        }
    }
}

/// Finite stream of answer fragments
pub struct CompletionStream {
    inner: Pin<Box<dyn Stream<Item = Result<String, CompletionError>> + Send>>,
}

impl CompletionStream {
    /// Create a new stream from any compatible async stream
    pub fn new<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<String, CompletionError>> + Send + 'static,
    {
        Self {
            inner: Box::pin(stream),
        }
    }

    /// A stream yielding a complete response as one fragment
    pub fn from_text(text: impl Into<String>) -> Self {
        let text = text.into();
        Self::new(futures::stream::once(async move { Ok(text) }))
    }

    pub fn into_inner(self) -> Pin<Box<dyn Stream<Item = Result<String, CompletionError>> + Send>> {
        self.inner
    }

    /// Drain the stream, concatenating fragments
    pub async fn collect_text(self) -> Result<String, CompletionError> {
        let mut inner = self.inner;
        let mut text = String::new();
        while let Some(fragment) = inner.next().await {
            text.push_str(&fragment?);
        }
        Ok(text)
    }
}

impl std::fmt::Debug for CompletionStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionStream").finish_non_exhaustive()
    }
}

/// Completion collaborator
///
/// # Example Implementation
///
/// ```rust,ignore
/// use async_trait::async_trait;
/// use rig_multirag::llm::{CompletionProvider, CompletionRequest};
/// use rig_multirag::CompletionError;
///
/// struct Echo;
///
/// #[async_trait]
/// impl CompletionProvider for Echo {
///     async fn complete(&self, request: &CompletionRequest) -> Result<String, CompletionError> {
///         Ok(request.user_prompt.clone())
///     }
///
///     fn name(&self) -> &str { "echo" }
/// }
/// ```
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Generate a complete response
    async fn complete(&self, request: &CompletionRequest) -> Result<String, CompletionError>;

    /// Generate a response as a stream of fragments
    ///
    /// Default implementation wraps [`complete`](Self::complete) as a single fragment.
    async fn stream(&self, request: &CompletionRequest) -> Result<CompletionStream, CompletionError> {
        let text = self.complete(request).await?;
        Ok(CompletionStream::from_text(text))
    }

    /// Provider name for logging
    fn name(&self) -> &str;
}
