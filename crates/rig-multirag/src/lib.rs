//! rig-multirag: taxonomy fan-out / fan-in RAG workflow engine for Rig
//!
//! A question is split into research taxonomies, each taxonomy is researched
//! concurrently in its own bounded generate -> search -> review loop, and the
//! vetted evidence is merged and synthesized into one answer.
//! - Orchestrator: root graph execution, fan-out, barrier, error mapping
//! - ResearchBranch: per-taxonomy state machine with result deduplication
//! - ProgressReporter / EventReceiver: request-scoped progress events
//! - CompletionProvider / SearchBackend: collaborator traits
//!
//! # Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use rig_multirag::{InMemorySearchBackend, OpenAIProvider, Orchestrator, WorkflowConfig};
//!
//! let completion = Arc::new(OpenAIProvider::from_env()?);
//! let search = Arc::new(InMemorySearchBackend::from_json_file("corpus.json")?);
//! let orchestrator = Arc::new(Orchestrator::new(completion, search, WorkflowConfig::from_env()?)?);
//!
//! let mut run = orchestrator.spawn_streaming("Can losses be group relieved?", "");
//! while let Some(event) = run.events.recv().await {
//!     println!("[{}] {}", event.source, event.message);
//! }
//! let state = run.handle.await??;
//! ```

pub mod accumulator;
pub mod config;
pub mod error;
pub mod events;
pub mod graph;
pub mod llm;
pub mod memory;
pub mod orchestrator;
pub mod prompts;
pub mod research;
pub mod search;
pub mod state;
pub mod summary;

// Re-exports for convenience
pub use accumulator::{DuplicateTaxonomy, OutputAccumulator};
pub use config::WorkflowConfig;
pub use error::{
    BranchError, CompletionError, ConfigError, GraphError, MalformedOutputError, NodeError,
    OrchestrationError, PlanningError, SearchError,
};
pub use events::{progress_channel, EventKind, EventReceiver, ProgressEvent, ProgressReporter};
pub use memory::{ChatMemory, ChatMessage, Role};
pub use orchestrator::{Orchestrator, StreamingRun, WORKFLOW};
pub use state::{
    BranchState, BranchStep, Decision, ReviewOutcome, SearchRecord, SearchResult, TaxonomyResult,
    ThoughtEntry, WorkflowState, WorkflowUpdate,
};
pub use summary::{Snippet, TaxonomySummary, WorkflowSummary};

// Collaborator exports
pub use llm::{
    CompletionProvider, CompletionRequest, CompletionStream, OllamaProvider, OpenAIProvider,
    StructuredOutput,
};
pub use search::{
    AzureSearchBackend, CorpusDocument, InMemorySearchBackend, SearchBackend, SearchRequest,
};

// Workflow step exports
pub use research::{BranchOutcome, ResearchBranch, TaxonomyPlan, TaxonomyPlanner};
