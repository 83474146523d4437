//! Consolidation and final answer synthesis

use async_trait::async_trait;
use futures::StreamExt;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

use super::{until_cancelled, CONSOLIDATE, FINAL_INFERENCE};
use crate::error::{CompletionError, NodeError};
use crate::events::ProgressReporter;
use crate::graph::{Node, NodeId, RunContext};
use crate::llm::{CompletionProvider, CompletionRequest};
use crate::prompts;
use crate::state::{ThoughtEntry, WorkflowState, WorkflowUpdate};

/// Event source used by consolidation
pub const CONSOLIDATION_AGENT: &str = "Consolidation Agent";

/// Event source used by final synthesis
pub const SYNTHESIS_AGENT: &str = "Synthesis Agent";

/// Freezes the merged branch outputs and records per-taxonomy counts
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsolidateNode;

#[async_trait]
impl Node<WorkflowState> for ConsolidateNode {
    fn id(&self) -> NodeId {
        NodeId::from(CONSOLIDATE)
    }

    async fn run(&self, state: &WorkflowState, ctx: &RunContext) -> Result<WorkflowUpdate, NodeError> {
        let results_per_taxonomy: BTreeMap<String, usize> = state
            .research_outputs
            .iter()
            .map(|output| (output.taxonomy.clone(), output.vetted_results.len()))
            .collect();

        info!(
            taxonomies = results_per_taxonomy.len(),
            vetted = state.vetted_count(),
            "Consolidating research results"
        );
        ctx.reporter
            .report(
                CONSOLIDATION_AGENT,
                format!(
                    "Consolidating {} vetted results across {} taxonomies",
                    state.vetted_count(),
                    results_per_taxonomy.len()
                ),
            )
            .await;

        Ok(
            WorkflowUpdate::research_results(state.research_outputs.clone()).with_thought(
                ThoughtEntry::Consolidation {
                    num_taxonomies: results_per_taxonomy.len(),
                    results_per_taxonomy,
                },
            ),
        )
    }
}

/// Produces the final answer from consolidated results
pub struct FinalInferenceNode {
    completion: Arc<dyn CompletionProvider>,
}

impl FinalInferenceNode {
    pub fn new(completion: Arc<dyn CompletionProvider>) -> Self {
        Self { completion }
    }

    /// Stream the answer, forwarding each fragment to the consumer as it arrives
    async fn synthesize(
        &self,
        request: &CompletionRequest,
        reporter: &ProgressReporter,
    ) -> Result<String, CompletionError> {
        let mut fragments = self.completion.stream(request).await?.into_inner();
        debug!(provider = self.completion.name(), "Streaming final answer");

        let mut answer = String::new();
        while let Some(fragment) = fragments.next().await {
            let fragment = fragment?;
            if fragment.is_empty() {
                continue;
            }
            reporter.answer_fragment(SYNTHESIS_AGENT, fragment.as_str()).await;
            answer.push_str(&fragment);
        }
        Ok(answer)
    }
}

#[async_trait]
impl Node<WorkflowState> for FinalInferenceNode {
    fn id(&self) -> NodeId {
        NodeId::from(FINAL_INFERENCE)
    }

    async fn run(&self, state: &WorkflowState, ctx: &RunContext) -> Result<WorkflowUpdate, NodeError> {
        ctx.reporter
            .report(SYNTHESIS_AGENT, "Generating final answer")
            .await;

        let request = CompletionRequest::new(
            prompts::SYNTHESIS_SYSTEM_PROMPT,
            prompts::synthesis_prompt(&state.user_input, &state.user_history, &state.research_results),
        );
        let answer = until_cancelled(ctx, self.synthesize(&request, &ctx.reporter))
            .await?
            .map_err(NodeError::Synthesis)?;

        info!(chars = answer.len(), "Final answer generated");
        Ok(WorkflowUpdate::final_answer(answer.clone())
            .with_thought(ThoughtEntry::FinalAnswer { final_answer: answer }))
    }
}
