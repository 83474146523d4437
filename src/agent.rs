//! # Agent Module
//!
//! Wires the configured collaborators into a research [`Orchestrator`]:
//! - a completion provider (OpenAI or a local Ollama server)
//! - a search backend (Azure AI Search or an in-memory JSON corpus)

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

use rig_multirag::{
    AzureSearchBackend, CompletionProvider, InMemorySearchBackend, OllamaProvider, OpenAIProvider,
    Orchestrator, SearchBackend,
};

use crate::config::{Config, ProviderKind, SearchKind};

// =============================================================================
// COLLABORATORS
// =============================================================================
/// Build the completion provider named by the configuration.
///
/// # Rust Concept: Trait Objects
///
/// `Arc<dyn CompletionProvider>` hides which provider was chosen. The
/// orchestrator only sees the trait, and the `Arc` lets every research
/// branch share the same client.
pub fn build_completion(config: &Config) -> Result<Arc<dyn CompletionProvider>> {
    let model = config.model_name();

    let provider: Arc<dyn CompletionProvider> = match config.provider {
        ProviderKind::OpenAI => Arc::new(
            OpenAIProvider::from_env_with_model(model)
                .context("Failed to create OpenAI client")?
                .with_temperature(config.temperature),
        ),
        ProviderKind::Ollama => Arc::new(
            OllamaProvider::new(&config.ollama_host, model).with_temperature(config.temperature),
        ),
    };

    info!(provider = provider.name(), model = %model, "Completion provider ready");
    Ok(provider)
}

/// Build the search backend named by the configuration.
pub fn build_search(config: &Config) -> Result<Arc<dyn SearchBackend>> {
    let backend: Arc<dyn SearchBackend> = match config.search {
        SearchKind::Azure => {
            let (Some(endpoint), Some(index), Some(api_key)) = (
                config.azure_endpoint.as_deref(),
                config.azure_index.as_deref(),
                config.azure_api_key.as_deref(),
            ) else {
                anyhow::bail!("Azure search credentials are incomplete");
            };
            Arc::new(AzureSearchBackend::new(endpoint, index, api_key))
        }
        SearchKind::Memory => {
            let path = config
                .corpus_path
                .as_ref()
                .context("No corpus file configured")?;
            let backend = InMemorySearchBackend::from_json_file(path)
                .with_context(|| format!("Failed to load corpus from {}", path.display()))?;
            info!(documents = backend.len(), "Corpus loaded");
            Arc::new(backend)
        }
    };

    Ok(backend)
}

// =============================================================================
// ORCHESTRATOR
// =============================================================================
/// Build the orchestrator shared by every question of this process.
pub fn build_orchestrator(config: &Config) -> Result<Arc<Orchestrator>> {
    let completion = build_completion(config)?;
    let search = build_search(config)?;

    let orchestrator = Orchestrator::new(completion, search, config.workflow.clone())
        .context("Failed to create research orchestrator")?;

    Ok(Arc::new(orchestrator))
}
