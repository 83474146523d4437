//! Fan-out/fan-in orchestrator
//!
//! Builds the root graph for every run, wires the run's progress channel and
//! cancellation token into it, and turns graph failures into
//! [`OrchestrationError`]s that carry whatever state was gathered.
//!
//! # Example
//!
//! ```rust,ignore
//! let orchestrator = Orchestrator::new(completion, search, WorkflowConfig::default())?;
//! let state = orchestrator.run("Can trading losses be group relieved?", "").await?;
//! println!("{}", state.final_answer.unwrap_or_default());
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

use crate::accumulator::OutputAccumulator;
use crate::config::WorkflowConfig;
use crate::error::{GraphError, NodeError, OrchestrationError, PlanningError};
use crate::events::{progress_channel, EventReceiver, ProgressReporter};
use crate::graph::{
    CompiledGraph, FanOut, GraphRunError, GraphState, RunContext, StateGraph, TaskSpawner, END,
    START,
};
use crate::llm::CompletionProvider;
use crate::research::{
    ConsolidateNode, FinalInferenceNode, IdentifyTaxonomiesNode, ResearchBranch, ResearchNode,
    TaxonomyPlan, TaxonomyPlanner, CONSOLIDATE, FINAL_INFERENCE, IDENTIFY_TAXONOMIES, RESEARCH,
};
use crate::search::SearchBackend;
use crate::state::{WorkflowState, WorkflowUpdate};

/// Event source used for terminal events
pub const WORKFLOW: &str = "Workflow";

/// A run executing in the background
pub struct StreamingRun {
    /// Progress events, ending with exactly one terminal event
    pub events: EventReceiver,
    /// Final outcome of the run
    pub handle: JoinHandle<Result<WorkflowState, OrchestrationError>>,
    /// Cancels the run; dropping `events` does the same
    pub cancel: CancellationToken,
}

/// Runs the multi-agent research workflow
pub struct Orchestrator {
    completion: Arc<dyn CompletionProvider>,
    search: Arc<dyn SearchBackend>,
    config: WorkflowConfig,
    fan_out: FanOut,
}

impl Orchestrator {
    pub fn new(
        completion: Arc<dyn CompletionProvider>,
        search: Arc<dyn SearchBackend>,
        config: WorkflowConfig,
    ) -> Result<Self, OrchestrationError> {
        config.validate()?;
        let fan_out = FanOut::default().with_concurrency(config.branch_concurrency);
        Ok(Self {
            completion,
            search,
            config,
            fan_out,
        })
    }

    /// Spawn branches with a custom executor
    pub fn with_spawner(mut self, spawner: impl TaskSpawner + 'static) -> Self {
        self.fan_out = FanOut::new(spawner).with_concurrency(self.config.branch_concurrency);
        self
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    fn build_graph(&self, accumulator: OutputAccumulator) -> Result<CompiledGraph<WorkflowState>, GraphError> {
        let planner = TaxonomyPlanner::new(self.completion.clone(), &self.config);
        let branch = ResearchBranch::new(self.completion.clone(), self.search.clone(), &self.config);

        StateGraph::new()
            .add_node(IdentifyTaxonomiesNode::new(planner))
            .add_node(ResearchNode::new(branch, self.fan_out.clone(), accumulator))
            .add_node(ConsolidateNode)
            .add_node(FinalInferenceNode::new(self.completion.clone()))
            .add_edge(START, IDENTIFY_TAXONOMIES)
            .add_edge(IDENTIFY_TAXONOMIES, RESEARCH)
            .add_edge(RESEARCH, CONSOLIDATE)
            .add_edge(CONSOLIDATE, FINAL_INFERENCE)
            .add_edge(FINAL_INFERENCE, END)
            .compile()
    }

    /// Run only the planning step
    pub async fn identify_taxonomies(
        &self,
        user_input: &str,
        user_history: &str,
    ) -> Result<TaxonomyPlan, PlanningError> {
        TaxonomyPlanner::new(self.completion.clone(), &self.config)
            .identify(user_input, user_history)
            .await
    }

    /// Run the workflow with no event consumer
    pub async fn run(&self, user_input: &str, user_history: &str) -> Result<WorkflowState, OrchestrationError> {
        self.run_with(
            user_input,
            user_history,
            ProgressReporter::detached(),
            CancellationToken::new(),
        )
        .await
    }

    /// Run the workflow, reporting progress and honouring `cancel`
    ///
    /// Exactly one terminal event is sent through `reporter`: `end` on success,
    /// `server-error` otherwise.
    pub async fn run_with(
        &self,
        user_input: &str,
        user_history: &str,
        reporter: ProgressReporter,
        cancel: CancellationToken,
    ) -> Result<WorkflowState, OrchestrationError> {
        let ctx = RunContext::new(reporter.clone(), cancel);
        let span = info_span!("workflow", run_id = %ctx.run_id);

        async move {
            info!(provider = self.completion.name(), search = self.search.name(), "Workflow started");
            let result = self.execute(user_input, user_history, &ctx).await;
            match &result {
                Ok(state) => {
                    info!(
                        taxonomies = state.taxonomies.len(),
                        vetted = state.vetted_count(),
                        "Workflow complete"
                    );
                    reporter.finish(WORKFLOW, "Research complete").await;
                }
                Err(err) => {
                    warn!(error = %err, "Workflow failed");
                    reporter.fail(WORKFLOW, err.to_string()).await;
                }
            }
            result
        }
        .instrument(span)
        .await
    }

    /// Start a run in the background and stream its events
    pub fn spawn_streaming(
        self: &Arc<Self>,
        user_input: impl Into<String>,
        user_history: impl Into<String>,
    ) -> StreamingRun {
        let cancel = CancellationToken::new();
        let (reporter, events) = progress_channel(
            self.config.event_capacity,
            self.config.event_send_timeout,
            cancel.clone(),
        );

        let orchestrator = Arc::clone(self);
        let user_input = user_input.into();
        let user_history = user_history.into();
        let run_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            orchestrator
                .run_with(&user_input, &user_history, reporter, run_cancel)
                .await
        });

        StreamingRun {
            events,
            handle,
            cancel,
        }
    }

    async fn execute(
        &self,
        user_input: &str,
        user_history: &str,
        ctx: &RunContext,
    ) -> Result<WorkflowState, OrchestrationError> {
        let accumulator = OutputAccumulator::new();
        let graph = self.build_graph(accumulator.clone())?;

        let timed_out = Arc::new(AtomicBool::new(false));
        let watchdog = self.config.workflow_timeout.map(|after| {
            let cancel = ctx.cancel.clone();
            let timed_out = timed_out.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = tokio::time::sleep(after) => {
                        warn!(timeout_ms = after.as_millis() as u64, "Workflow deadline reached, cancelling");
                        timed_out.store(true, Ordering::Release);
                        cancel.cancel();
                    }
                    _ = cancel.cancelled() => {}
                }
            })
        });

        let outcome = graph
            .run(WorkflowState::new(user_input, user_history), ctx)
            .await;

        if let Some(watchdog) = watchdog {
            watchdog.abort();
        }

        match outcome {
            Ok(state) => Ok(state),
            Err(err) => Err(self
                .into_orchestration_error(err, &accumulator, timed_out.load(Ordering::Acquire))
                .await),
        }
    }

    async fn into_orchestration_error(
        &self,
        err: GraphRunError<WorkflowState>,
        accumulator: &OutputAccumulator,
        timed_out: bool,
    ) -> OrchestrationError {
        let GraphRunError { node, state, error } = err;
        match error {
            NodeError::Planning(source) => OrchestrationError::Planning(source),
            NodeError::Synthesis(source) => OrchestrationError::Synthesis {
                source,
                partial: state,
            },
            NodeError::Cancelled => {
                let mut partial = state;
                // Stopped inside the research node: keep branches that already merged
                if node.as_str() == RESEARCH && partial.research_outputs.is_empty() {
                    let (outputs, notes) = accumulator.snapshot().await;
                    partial = Box::new(
                        partial.apply_update(WorkflowUpdate::research_outputs(outputs).with_thoughts(notes)),
                    );
                }
                info!(
                    node = %node,
                    merged = partial.research_outputs.len(),
                    timed_out,
                    "Workflow stopped early"
                );
                match self.config.workflow_timeout {
                    Some(after) if timed_out => OrchestrationError::TimedOut { after, partial },
                    _ => OrchestrationError::Cancelled { partial },
                }
            }
            other @ NodeError::StepLimitExceeded(_) => OrchestrationError::Internal {
                node,
                message: other.to_string(),
                partial: state,
            },
        }
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("completion", &self.completion.name())
            .field("search", &self.search.name())
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CompletionError, SearchError};
    use crate::llm::CompletionRequest;
    use crate::search::{CorpusDocument, InMemorySearchBackend, SearchRequest};
    use async_trait::async_trait;

    struct Canned;

    #[async_trait]
    impl CompletionProvider for Canned {
        async fn complete(&self, request: &CompletionRequest) -> Result<String, CompletionError> {
            Ok(match request.output_schema.as_ref().map(|s| s.name) {
                Some("TaxonomyExtraction") => {
                    r#"{"taxonomies": ["group relief", "stamp duty"], "reasoning": "two regimes"}"#
                }
                Some("SearchQueryPlan") => r#"{"search_query": "group relief stamp duty"}"#,
                Some(_) => {
                    r#"{"thought_process": "ok", "valid_results": [0], "invalid_results": [], "decision": "finalize"}"#
                }
                None => "Both reliefs can apply.",
            }
            .to_string())
        }

        fn name(&self) -> &str {
            "canned"
        }
    }

    struct Unreachable;

    #[async_trait]
    impl SearchBackend for Unreachable {
        async fn search(&self, _request: &SearchRequest) -> Result<Vec<crate::state::SearchResult>, SearchError> {
            Err(SearchError::Connection("refused".into()))
        }

        fn name(&self) -> &str {
            "unreachable"
        }
    }

    fn corpus() -> Arc<dyn SearchBackend> {
        Arc::new(InMemorySearchBackend::new(vec![
            CorpusDocument::new("c1", "Group relief lets losses move within a group", "ctm.pdf"),
            CorpusDocument::new("c2", "Stamp duty group relief on transfers", "sdlt.pdf"),
        ]))
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = WorkflowConfig::default().with_max_attempts(0);
        let err = Orchestrator::new(Arc::new(Canned), corpus(), config).unwrap_err();
        assert!(matches!(err, OrchestrationError::Config(_)));
    }

    #[test]
    fn test_graph_shape() {
        let orchestrator = Orchestrator::new(Arc::new(Canned), corpus(), WorkflowConfig::default()).unwrap();
        let graph = orchestrator.build_graph(OutputAccumulator::new()).unwrap();
        let ids: Vec<_> = graph.node_ids().iter().map(|id| id.as_str().to_string()).collect();
        assert_eq!(
            ids,
            vec![IDENTIFY_TAXONOMIES, RESEARCH, CONSOLIDATE, FINAL_INFERENCE]
        );
        assert_eq!(graph.entry().as_str(), IDENTIFY_TAXONOMIES);
    }

    #[tokio::test]
    async fn test_run_end_to_end() {
        let orchestrator = Orchestrator::new(Arc::new(Canned), corpus(), WorkflowConfig::default()).unwrap();
        let state = orchestrator.run("Which reliefs apply?", "").await.unwrap();

        assert_eq!(state.final_answer.as_deref(), Some("Both reliefs can apply."));
        assert_eq!(state.taxonomies.len(), 2);
        assert_eq!(state.research_outputs.len(), 2);
        assert_eq!(state.research_results, state.research_outputs);

        let kinds: Vec<_> = state.thought_process.iter().map(|t| t.kind()).collect();
        assert_eq!(kinds.first(), Some(&"taxonomy_extraction"));
        assert_eq!(kinds.last(), Some(&"final_answer"));
        assert!(kinds.contains(&"consolidation"));
    }

    #[tokio::test]
    async fn test_search_outage_still_answers() {
        let orchestrator =
            Orchestrator::new(Arc::new(Canned), Arc::new(Unreachable), WorkflowConfig::default()).unwrap();
        let state = orchestrator.run("Which reliefs apply?", "").await.unwrap();

        assert!(state.final_answer.is_some());
        assert_eq!(state.vetted_count(), 0);
        let failures = state
            .thought_process
            .iter()
            .filter(|t| t.kind() == "branch_failure")
            .count();
        assert_eq!(failures, 2);
    }

    #[tokio::test]
    async fn test_identify_taxonomies_only() {
        let orchestrator = Orchestrator::new(Arc::new(Canned), corpus(), WorkflowConfig::default()).unwrap();
        let plan = orchestrator.identify_taxonomies("Which reliefs apply?", "").await.unwrap();
        assert_eq!(plan.taxonomies, vec!["group relief", "stamp duty"]);
    }
}
