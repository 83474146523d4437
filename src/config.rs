//! # Configuration Module
//!
//! Loads the application configuration from environment variables (and a
//! `.env` file when present): which completion provider and search backend
//! to use, and the workflow bounds handed to the orchestrator.

use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use rig_multirag::llm::{DEFAULT_OLLAMA_HOST, DEFAULT_OLLAMA_MODEL, DEFAULT_OPENAI_MODEL};
use rig_multirag::WorkflowConfig;

// =============================================================================
// BACKEND SELECTION
// =============================================================================
/// Completion provider used for planning, review and synthesis
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    OpenAI,
    Ollama,
}

impl FromStr for ProviderKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "ollama" => Ok(Self::Ollama),
            other => anyhow::bail!("Unknown LLM provider '{}': expected openai or ollama", other),
        }
    }
}

/// Document search backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchKind {
    Azure,
    Memory,
}

impl FromStr for SearchKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "azure" => Ok(Self::Azure),
            "memory" => Ok(Self::Memory),
            other => anyhow::bail!("Unknown search backend '{}': expected azure or memory", other),
        }
    }
}

// =============================================================================
// CONFIGURATION STRUCT
// =============================================================================
#[derive(Debug, Clone)]
pub struct Config {
    pub provider: ProviderKind,

    /// Model name; the provider's default when unset
    pub model: Option<String>,

    /// Ollama server URL (default: http://localhost:11434)
    pub ollama_host: String,

    /// Temperature for LLM responses (0.0 = deterministic)
    pub temperature: f64,

    pub search: SearchKind,

    pub azure_endpoint: Option<String>,
    pub azure_index: Option<String>,
    pub azure_api_key: Option<String>,

    /// JSON corpus for the in-memory backend
    pub corpus_path: Option<PathBuf>,

    /// Bounds for each run
    pub workflow: WorkflowConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            provider: ProviderKind::OpenAI,
            model: None,
            ollama_host: DEFAULT_OLLAMA_HOST.to_string(),
            // Low temperature: planning and review want structured, repeatable output
            temperature: 0.0,
            search: SearchKind::Memory,
            azure_endpoint: None,
            azure_index: None,
            azure_api_key: None,
            corpus_path: None,
            workflow: WorkflowConfig::default(),
        }
    }
}

// =============================================================================
// CONFIGURATION LOADING
// =============================================================================
impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Rust Concept: The ? Operator with context
    ///
    /// `.context()` wraps the underlying error with a message naming the
    /// variable at fault, and `?` returns it to the caller.
    pub fn from_env() -> Result<Self> {
        // Load .env file if it exists (silently ignore if not found)
        let _ = dotenvy::dotenv();

        let mut config = Config::default();

        if let Ok(val) = env::var("LLM_PROVIDER") {
            config.provider = val.parse()?;
        }

        if let Ok(val) = env::var("LLM_MODEL") {
            config.model = Some(val);
        }

        if let Ok(val) = env::var("OLLAMA_API_BASE_URL") {
            config.ollama_host = val;
        }

        if let Ok(val) = env::var("TEMPERATURE") {
            config.temperature = val
                .parse()
                .context("TEMPERATURE must be a valid floating-point number (e.g., 0.2)")?;
        }

        if let Ok(val) = env::var("SEARCH_BACKEND") {
            config.search = val.parse()?;
        }

        config.azure_endpoint = env::var("AZURE_SEARCH_ENDPOINT").ok();
        config.azure_index = env::var("AZURE_SEARCH_INDEX").ok();
        config.azure_api_key = env::var("AZURE_SEARCH_API_KEY").ok();
        config.corpus_path = env::var("CORPUS_PATH").ok().map(PathBuf::from);

        config.workflow = WorkflowConfig::from_env().context("Invalid workflow configuration")?;

        Ok(config)
    }

    /// Model to use, falling back to the provider default
    pub fn model_name(&self) -> &str {
        match (&self.model, self.provider) {
            (Some(model), _) => model,
            (None, ProviderKind::OpenAI) => DEFAULT_OPENAI_MODEL,
            (None, ProviderKind::Ollama) => DEFAULT_OLLAMA_MODEL,
        }
    }

    /// Validate the configuration before any collaborator is built.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=2.0).contains(&self.temperature) {
            anyhow::bail!(
                "Temperature must be between 0.0 and 2.0, got: {}",
                self.temperature
            );
        }

        if self.model_name().trim().is_empty() {
            anyhow::bail!("LLM_MODEL cannot be empty");
        }

        match self.search {
            SearchKind::Azure => {
                if self.azure_endpoint.is_none()
                    || self.azure_index.is_none()
                    || self.azure_api_key.is_none()
                {
                    anyhow::bail!(
                        "Azure search requires AZURE_SEARCH_ENDPOINT, AZURE_SEARCH_INDEX and AZURE_SEARCH_API_KEY"
                    );
                }
            }
            SearchKind::Memory => {
                if self.corpus_path.is_none() {
                    anyhow::bail!("In-memory search requires CORPUS_PATH or --corpus");
                }
            }
        }

        self.workflow
            .validate()
            .context("Invalid workflow configuration")?;

        Ok(())
    }
}
