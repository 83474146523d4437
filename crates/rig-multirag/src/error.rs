//! Error types for the multi-agent RAG workflow
//!
//! Errors are layered the same way the workflow is:
//! collaborator errors (completion, search) are recovered inside a branch,
//! planning and synthesis errors surface from the root graph, and
//! [`OrchestrationError`] is what callers of the orchestrator see.

use std::time::Duration;
use thiserror::Error;

use crate::graph::NodeId;
use crate::state::WorkflowState;

/// Failures of the completion collaborator
#[derive(Debug, Error)]
pub enum CompletionError {
    /// Transport-level failure talking to the provider
    #[error("Completion transport error: {0}")]
    Transport(String),

    /// The provider did not answer in time
    #[error("Completion timed out")]
    Timeout,

    /// Quota exhausted or rate limited
    #[error("Completion quota exceeded: {0}")]
    Quota(String),

    /// The provider answered, but not with the requested shape
    #[error("Malformed completion output: {0}")]
    MalformedOutput(String),

    /// Provider could not be constructed
    #[error("Completion provider configuration error: {0}")]
    Configuration(String),
}

impl CompletionError {
    /// Create a transport error
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    /// Create a malformed output error
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedOutput(message.into())
    }

    /// Check if the failure is transient
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Timeout | Self::Quota(_))
    }
}

/// Failures of the search collaborator
#[derive(Debug, Error)]
pub enum SearchError {
    #[error("Search request timed out")]
    Timeout,

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Unauthorized - check search API key")]
    Unauthorized,

    #[error("Rate limited - too many requests")]
    RateLimited,

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Server error ({0}): {1}")]
    ServerError(u16, String),

    #[error("HTTP error ({0}): {1}")]
    HttpError(u16, String),

    #[error("Failed to parse search response: {0}")]
    ParseError(String),

    /// Backend-specific failure (corpus loading, invalid filter, ...)
    #[error("Search backend error: {0}")]
    Backend(String),
}

impl SearchError {
    /// Create a backend error
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend(message.into())
    }

    /// Check if this error is worth retrying with identical parameters
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SearchError::Timeout
                | SearchError::Connection(_)
                | SearchError::RateLimited
                | SearchError::ServerError(_, _)
        )
    }
}

/// Collaborator output that is only partially usable
///
/// These are never fatal; the offending portion is dropped and logged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedOutputError {
    /// Review referenced a result index that does not exist
    #[error("Result index {index} out of range for {len} results")]
    IndexOutOfRange { index: i64, len: usize },

    /// Review listed something other than an integer as a result index
    #[error("Result index {0} is not an integer")]
    InvalidIndex(String),

    /// Review decision was neither retry nor finalize
    #[error("Unknown review decision: {0:?}")]
    UnknownDecision(String),

    /// Planner produced a label that cannot be used
    #[error("Unusable taxonomy label: {0:?}")]
    InvalidTaxonomy(String),
}

/// Failures of the taxonomy planning step (fatal for the run)
#[derive(Debug, Error)]
pub enum PlanningError {
    /// The planner returned no usable taxonomies
    #[error("No taxonomies identified for the question")]
    NoTaxonomies,

    /// The planner call failed or its output could not be parsed
    #[error("Taxonomy identification failed: {0}")]
    Completion(#[from] CompletionError),
}

/// Failures inside a single research branch
///
/// A branch error ends the branch with empty vetted results; it never aborts siblings.
#[derive(Debug, Error)]
pub enum BranchError {
    #[error("Query generation failed for taxonomy {taxonomy}: {source}")]
    QueryGeneration {
        taxonomy: String,
        #[source]
        source: CompletionError,
    },

    #[error("Search failed for taxonomy {taxonomy}: {source}")]
    Search {
        taxonomy: String,
        #[source]
        source: SearchError,
    },

    #[error("Review failed for taxonomy {taxonomy}: {source}")]
    Review {
        taxonomy: String,
        #[source]
        source: CompletionError,
    },
}

/// Errors raised by a node of the root graph
#[derive(Debug, Error)]
pub enum NodeError {
    #[error(transparent)]
    Planning(#[from] PlanningError),

    #[error("Final answer synthesis failed: {0}")]
    Synthesis(#[source] CompletionError),

    #[error("Node cancelled")]
    Cancelled,

    #[error("Step limit exceeded: {0}")]
    StepLimitExceeded(usize),
}

/// Structural errors found when compiling a graph
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("Graph has no entry node")]
    MissingEntry,

    #[error("Duplicate node: {0}")]
    DuplicateNode(NodeId),

    #[error("Edge references unknown node: {0}")]
    UnknownNode(NodeId),

    #[error("Node {0} has no outgoing edge")]
    MissingEdge(NodeId),

    #[error("Node {0} has more than one outgoing edge")]
    AmbiguousEdge(NodeId),
}

/// Invalid workflow configuration
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid configuration for {field}: {reason}")]
pub struct ConfigError {
    pub field: &'static str,
    pub reason: String,
}

impl ConfigError {
    pub fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}

/// Errors returned by the orchestrator
///
/// Every variant that can occur after fan-out carries the partial [`WorkflowState`]
/// gathered so far.
#[derive(Debug, Error)]
pub enum OrchestrationError {
    #[error(transparent)]
    Planning(#[from] PlanningError),

    #[error("Final answer synthesis failed: {source}")]
    Synthesis {
        #[source]
        source: CompletionError,
        partial: Box<WorkflowState>,
    },

    #[error("Workflow cancelled")]
    Cancelled { partial: Box<WorkflowState> },

    #[error("Workflow timeout after {after:?}")]
    TimedOut {
        after: Duration,
        partial: Box<WorkflowState>,
    },

    #[error("Invalid workflow graph: {0}")]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Workflow aborted at {node}: {message}")]
    Internal {
        node: NodeId,
        message: String,
        partial: Box<WorkflowState>,
    },
}

impl OrchestrationError {
    /// Partial state gathered before the failure, if any
    pub fn partial_state(&self) -> Option<&WorkflowState> {
        match self {
            Self::Synthesis { partial, .. }
            | Self::Cancelled { partial }
            | Self::TimedOut { partial, .. }
            | Self::Internal { partial, .. } => Some(partial),
            Self::Planning(_) | Self::Graph(_) | Self::Config(_) => None,
        }
    }

    /// Consume the error, returning the partial state if any
    pub fn into_partial_state(self) -> Option<WorkflowState> {
        match self {
            Self::Synthesis { partial, .. }
            | Self::Cancelled { partial }
            | Self::TimedOut { partial, .. }
            | Self::Internal { partial, .. } => Some(*partial),
            Self::Planning(_) | Self::Graph(_) | Self::Config(_) => None,
        }
    }

    /// Check if the run was stopped from outside (cancel or timeout)
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled { .. } | Self::TimedOut { .. })
    }
}

#[cfg(test)]
mod tests {
    // Ensure errors are Send + Sync (compile-time check)
    static_assertions::assert_impl_all!(super::OrchestrationError: Send, Sync);
    static_assertions::assert_impl_all!(super::BranchError: Send, Sync);
    use super::*;

    #[test]
    fn test_search_error_retryable() {
        assert!(SearchError::Timeout.is_retryable());
        assert!(SearchError::RateLimited.is_retryable());
        assert!(SearchError::ServerError(503, "busy".into()).is_retryable());

        assert!(!SearchError::Unauthorized.is_retryable());
        assert!(!SearchError::BadRequest("bad filter".into()).is_retryable());
        assert!(!SearchError::backend("missing corpus").is_retryable());
    }

    #[test]
    fn test_completion_error_retryable() {
        assert!(CompletionError::Timeout.is_retryable());
        assert!(CompletionError::transport("reset").is_retryable());
        assert!(!CompletionError::malformed("not json").is_retryable());
    }

    #[test]
    fn test_branch_error_names_taxonomy() {
        let err = BranchError::Search {
            taxonomy: "Stamp Duty".into(),
            source: SearchError::Timeout,
        };
        assert_eq!(
            err.to_string(),
            "Search failed for taxonomy Stamp Duty: Search request timed out"
        );
    }

    #[test]
    fn test_partial_state_access() {
        let mut partial = WorkflowState::new("q", "");
        partial.taxonomies = vec!["A".into()];

        let err = OrchestrationError::Synthesis {
            source: CompletionError::Timeout,
            partial: Box::new(partial),
        };
        assert_eq!(err.partial_state().unwrap().taxonomies, vec!["A".to_string()]);
        assert!(!err.is_cancellation());

        let err = OrchestrationError::Planning(PlanningError::NoTaxonomies);
        assert!(err.partial_state().is_none());
    }

    #[test]
    fn test_malformed_output_display() {
        let err = MalformedOutputError::IndexOutOfRange { index: 7, len: 3 };
        assert_eq!(err.to_string(), "Result index 7 out of range for 3 results");
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::new("max_attempts", "must be at least 1");
        assert_eq!(
            err.to_string(),
            "Invalid configuration for max_attempts: must be at least 1"
        );
    }
}
