//! Graph builder and executor
//!
//! A [`StateGraph`] is a set of nodes joined by static edges, with one entry
//! and the [`END`] exit. Compiling validates the structure; running walks the
//! edges, applying each node's update before following the next edge.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use super::node::{Node, NodeId, RunContext, END};
use super::state::GraphState;
use crate::error::{GraphError, NodeError};

/// Default bound on node executions per run
const DEFAULT_MAX_STEPS: usize = 64;

/// A failed graph run, carrying the state reached before the failure
#[derive(Debug, Error)]
#[error("Node {node} failed: {error}")]
pub struct GraphRunError<S: fmt::Debug> {
    pub node: NodeId,
    pub state: Box<S>,
    #[source]
    pub error: NodeError,
}

/// Graph under construction
pub struct StateGraph<S: GraphState> {
    nodes: HashMap<NodeId, Arc<dyn Node<S>>>,
    order: Vec<NodeId>,
    duplicates: Vec<NodeId>,
    edges: Vec<(NodeId, NodeId)>,
    entry: Option<NodeId>,
    max_steps: usize,
}

impl<S: GraphState> Default for StateGraph<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: GraphState> StateGraph<S> {
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
            order: Vec::new(),
            duplicates: Vec::new(),
            edges: Vec::new(),
            entry: None,
            max_steps: DEFAULT_MAX_STEPS,
        }
    }

    /// Add a node; its id comes from [`Node::id`]
    pub fn add_node(mut self, node: impl Node<S> + 'static) -> Self {
        let id = node.id();
        if self.nodes.insert(id.clone(), Arc::new(node)).is_some() {
            self.duplicates.push(id);
        } else {
            self.order.push(id);
        }
        self
    }

    /// Add a static edge; an edge from [`START`](super::START) sets the entry node
    pub fn add_edge(mut self, from: impl Into<NodeId>, to: impl Into<NodeId>) -> Self {
        let from = from.into();
        let to = to.into();
        if from.is_start() {
            self.entry = Some(to);
        } else {
            self.edges.push((from, to));
        }
        self
    }

    /// Set the entry node
    pub fn set_entry(mut self, id: impl Into<NodeId>) -> Self {
        self.entry = Some(id.into());
        self
    }

    /// Bound the number of node executions per run
    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps.max(1);
        self
    }

    /// Validate the structure and produce an executable graph
    pub fn compile(self) -> Result<CompiledGraph<S>, GraphError> {
        if let Some(id) = self.duplicates.into_iter().next() {
            return Err(GraphError::DuplicateNode(id));
        }

        let entry = self.entry.ok_or(GraphError::MissingEntry)?;
        if !self.nodes.contains_key(&entry) {
            return Err(GraphError::UnknownNode(entry));
        }

        let mut successors: HashMap<NodeId, NodeId> = HashMap::new();
        for (from, to) in self.edges {
            if !self.nodes.contains_key(&from) {
                return Err(GraphError::UnknownNode(from));
            }
            if !to.is_end() && !self.nodes.contains_key(&to) {
                return Err(GraphError::UnknownNode(to));
            }
            if successors.insert(from.clone(), to).is_some() {
                return Err(GraphError::AmbiguousEdge(from));
            }
        }

        if let Some(id) = self.order.iter().find(|id| !successors.contains_key(*id)) {
            return Err(GraphError::MissingEdge(id.clone()));
        }

        Ok(CompiledGraph {
            nodes: self.nodes,
            order: self.order,
            successors,
            entry,
            max_steps: self.max_steps,
        })
    }
}

/// Executable graph
pub struct CompiledGraph<S: GraphState> {
    nodes: HashMap<NodeId, Arc<dyn Node<S>>>,
    order: Vec<NodeId>,
    successors: HashMap<NodeId, NodeId>,
    entry: NodeId,
    max_steps: usize,
}

impl<S: GraphState + fmt::Debug> CompiledGraph<S> {
    /// Node ids in insertion order
    pub fn node_ids(&self) -> &[NodeId] {
        &self.order
    }

    pub fn entry(&self) -> &NodeId {
        &self.entry
    }

    /// Run the graph from its entry node until [`END`] or a terminal state
    ///
    /// Cancellation is checked before every node.
    pub async fn run(&self, initial: S, ctx: &RunContext) -> Result<S, GraphRunError<S>> {
        let mut state = initial;
        let mut current = self.entry.clone();
        let mut steps = 0;

        loop {
            if current.is_end() || state.is_terminal() {
                debug!(steps, "Graph reached end");
                return Ok(state);
            }
            if steps >= self.max_steps {
                return Err(GraphRunError {
                    node: current,
                    state: Box::new(state),
                    error: NodeError::StepLimitExceeded(self.max_steps),
                });
            }
            if ctx.is_cancelled() {
                return Err(GraphRunError {
                    node: current,
                    state: Box::new(state),
                    error: NodeError::Cancelled,
                });
            }

            // compile() guarantees every edge target other than END is a node
            let Some(node) = self.nodes.get(&current) else {
                return Ok(state);
            };

            info!(node = %current, step = steps, "Running node");
            match node.run(&state, ctx).await {
                Ok(update) => state = state.apply_update(update),
                Err(error) => {
                    return Err(GraphRunError {
                        node: current,
                        state: Box::new(state),
                        error,
                    })
                }
            }

            current = self
                .successors
                .get(&current)
                .cloned()
                .unwrap_or_else(|| NodeId::from(END));
            steps += 1;
        }
    }
}

impl<S: GraphState> fmt::Debug for CompiledGraph<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledGraph")
            .field("entry", &self.entry)
            .field("nodes", &self.order)
            .field("max_steps", &self.max_steps)
            .finish()
    }
}
