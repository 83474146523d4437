//! Graph execution primitives
//!
//! - [`StateGraph`] / [`CompiledGraph`]: the root workflow as nodes joined by edges
//! - [`GraphState`]: how node updates are applied
//! - [`FanOut`] / [`join_all`]: dynamic spawning of runtime-discovered branches

pub mod compiled;
pub mod fanout;
pub mod node;
pub mod state;

pub use compiled::{CompiledGraph, GraphRunError, StateGraph};
pub use fanout::{join_all, BranchHandle, FanOut, JoinFailure, Joined, TaskSpawner, TokioSpawner};
pub use node::{Node, NodeId, RunContext, END, START};
pub use state::GraphState;
