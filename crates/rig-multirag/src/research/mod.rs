//! Workflow steps
//!
//! The root graph is `identify_taxonomies -> research_agent -> consolidate_results
//! -> final_inference`. The research node fans out one [`ResearchBranch`] per
//! taxonomy and waits for all of them before handing the merged outputs on.

pub mod branch;
pub mod planner;
pub mod synthesis;

use async_trait::async_trait;
use std::future::Future;
use tracing::{info, info_span, warn, Instrument};

use crate::accumulator::OutputAccumulator;
use crate::error::NodeError;
use crate::graph::{join_all, FanOut, Node, NodeId, RunContext};
use crate::state::{BranchState, TaxonomyResult, ThoughtEntry, WorkflowState, WorkflowUpdate};

pub use branch::{BranchOutcome, BranchStatus, ResearchBranch, RESEARCH_AGENT};
pub use planner::{normalize_taxonomies, IdentifyTaxonomiesNode, TaxonomyPlan, TaxonomyPlanner, PLANNER};
pub use synthesis::{ConsolidateNode, FinalInferenceNode, CONSOLIDATION_AGENT, SYNTHESIS_AGENT};

pub const IDENTIFY_TAXONOMIES: &str = "identify_taxonomies";
pub const RESEARCH: &str = "research_agent";
pub const CONSOLIDATE: &str = "consolidate_results";
pub const FINAL_INFERENCE: &str = "final_inference";

/// Event source used by the fan-out step
pub const RESEARCH_COORDINATOR: &str = "Research Coordinator";

/// Await `fut` unless the run is cancelled first
pub(crate) async fn until_cancelled<F, T>(ctx: &RunContext, fut: F) -> Result<T, NodeError>
where
    F: Future<Output = T>,
{
    if ctx.is_cancelled() {
        return Err(NodeError::Cancelled);
    }
    tokio::select! {
        biased;
        _ = ctx.cancel.cancelled() => Err(NodeError::Cancelled),
        out = fut => Ok(out),
    }
}

/// Root node: distribute, barrier, merge
///
/// Each branch appends to the shared [`OutputAccumulator`] as soon as it
/// finishes. The node returns once every branch has finished, with the
/// merged outputs as its update.
pub struct ResearchNode {
    branch: ResearchBranch,
    fan_out: FanOut,
    accumulator: OutputAccumulator,
}

impl ResearchNode {
    pub fn new(branch: ResearchBranch, fan_out: FanOut, accumulator: OutputAccumulator) -> Self {
        Self {
            branch,
            fan_out,
            accumulator,
        }
    }

    pub fn accumulator(&self) -> &OutputAccumulator {
        &self.accumulator
    }
}

#[async_trait]
impl Node<WorkflowState> for ResearchNode {
    fn id(&self) -> NodeId {
        NodeId::from(RESEARCH)
    }

    async fn run(&self, state: &WorkflowState, ctx: &RunContext) -> Result<WorkflowUpdate, NodeError> {
        if ctx.is_cancelled() {
            return Err(NodeError::Cancelled);
        }

        ctx.reporter
            .report(
                RESEARCH_COORDINATOR,
                format!(
                    "Starting research on {} taxonomies: {}",
                    state.taxonomies.len(),
                    state.taxonomies.join(", ")
                ),
            )
            .await;

        let handles: Vec<_> = state
            .taxonomies
            .iter()
            .map(|taxonomy| {
                let branch = self.branch.clone();
                let accumulator = self.accumulator.clone();
                let ctx = ctx.clone();
                let initial = BranchState::new(taxonomy, &state.user_input, &state.user_history);
                let span = info_span!("branch", taxonomy = %taxonomy);

                self.fan_out.spawn(
                    taxonomy.clone(),
                    async move {
                        let outcome = branch.run(initial, &ctx).await;
                        let failed = matches!(outcome, BranchOutcome::Failed { .. });
                        if let Some((result, thoughts)) = outcome.into_merge() {
                            if let Err(err) = accumulator.append_with_notes(result, thoughts).await {
                                warn!(error = %err, "Discarding duplicate branch output");
                            }
                        }
                        failed
                    }
                    .instrument(span),
                )
            })
            .collect();

        let joined = join_all(handles).await;

        let mut failed = 0usize;
        for branch in joined {
            match branch.outcome {
                Ok(true) => failed += 1,
                Ok(false) => {}
                Err(failure) => {
                    failed += 1;
                    if ctx.is_cancelled() || self.accumulator.contains(&branch.label).await {
                        continue;
                    }
                    let note = ThoughtEntry::BranchFailure {
                        taxonomy: branch.label.clone(),
                        error: failure.to_string(),
                    };
                    // Taxonomy was not merged yet, so the append cannot collide
                    let _ = self
                        .accumulator
                        .append_with_notes(TaxonomyResult::empty(branch.label), vec![note])
                        .await;
                }
            }
        }

        if ctx.is_cancelled() {
            let merged = self.accumulator.len().await;
            info!(merged, "Research cancelled");
            return Err(NodeError::Cancelled);
        }

        let (outputs, notes) = self.accumulator.snapshot().await;
        info!(branches = outputs.len(), failed, "All research branches finished");
        ctx.reporter
            .report(
                RESEARCH_COORDINATOR,
                format!(
                    "Research complete for {} taxonomies ({} failed)",
                    outputs.len(),
                    failed
                ),
            )
            .await;

        Ok(WorkflowUpdate::research_outputs(outputs).with_thoughts(notes))
    }
}
