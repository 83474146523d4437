//! Node abstractions for the root workflow graph

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::state::GraphState;
use crate::error::NodeError;
use crate::events::ProgressReporter;

/// Unique identifier for a node in the workflow graph
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub String);

/// Pseudo-node marking the graph entry in edges
pub const START: &str = "__start__";

/// Pseudo-node marking the graph exit in edges
pub const END: &str = "__end__";

impl NodeId {
    /// Create a new NodeId
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the ID as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_start(&self) -> bool {
        self.0 == START
    }

    pub fn is_end(&self) -> bool {
        self.0 == END
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-run services handed to every node
///
/// Cloning is cheap; all fields are handles.
#[derive(Clone)]
pub struct RunContext {
    pub run_id: Uuid,
    pub reporter: ProgressReporter,
    pub cancel: CancellationToken,
}

impl RunContext {
    pub fn new(reporter: ProgressReporter, cancel: CancellationToken) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            reporter,
            cancel,
        }
    }

    /// Context with no event consumer and a fresh token
    pub fn detached() -> Self {
        Self::new(ProgressReporter::detached(), CancellationToken::new())
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// A computation step of the root graph
#[async_trait]
pub trait Node<S: GraphState>: Send + Sync {
    /// Identifier used in edges
    fn id(&self) -> NodeId;

    /// Run the node against the current state, returning the update to apply
    async fn run(&self, state: &S, ctx: &RunContext) -> Result<S::Update, NodeError>;
}
