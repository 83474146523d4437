//! Completion collaborators
//!
//! - [`CompletionProvider`]: text in, text (or a fragment stream) out
//! - [`StructuredOutput`]: typed responses parsed from provider text
//! - [`OpenAIProvider`], [`OllamaProvider`]: rig-core backed providers

pub mod ollama;
pub mod openai;
pub mod provider;
pub mod schema;

pub use ollama::{OllamaProvider, DEFAULT_OLLAMA_HOST, DEFAULT_OLLAMA_MODEL};
pub use openai::{OpenAIProvider, DEFAULT_OPENAI_MODEL};
pub use provider::{CompletionProvider, CompletionRequest, CompletionStream, OutputSchema};
pub use schema::{
    complete_structured, parse_structured, ReviewDecision, SearchQueryPlan, StructuredOutput,
    TaxonomyExtraction,
};
