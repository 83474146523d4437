//! State abstraction for the root workflow graph
//!
//! Nodes never mutate state directly. Each node returns an update and the
//! graph applies it before moving to the next node. Concurrent branch output
//! does not flow through here; it is gathered by the research node's
//! accumulator and arrives as a single update.

/// State threaded through a [`CompiledGraph`](super::CompiledGraph)
///
/// # Example
///
/// ```ignore
/// #[derive(Clone, Default)]
/// struct Notes {
///     lines: Vec<String>,
/// }
///
/// impl GraphState for Notes {
///     type Update = Vec<String>;
///
///     fn apply_update(&self, update: Vec<String>) -> Self {
///         let mut new = self.clone();
///         new.lines.extend(update);
///         new
///     }
/// }
/// ```
pub trait GraphState: Clone + Send + Sync + 'static {
    /// The update type produced by nodes
    type Update: Clone + Send + Sync + 'static;

    /// Apply an update to produce a new state
    ///
    /// This should be a pure function - the original state is not modified.
    fn apply_update(&self, update: Self::Update) -> Self;

    /// Check if the state represents a terminal condition
    ///
    /// When true, the graph stops regardless of remaining edges.
    fn is_terminal(&self) -> bool {
        false
    }
}
