//! Research sub-workflow
//!
//! One [`ResearchBranch`] run per taxonomy, driving a [`BranchState`] through
//! `GenerateQuery -> Review -> (GenerateQuery | Finalize)`. Termination is
//! guaranteed by the attempt bound, whatever the reviewer decides.
//!
//! Collaborator failures end the branch with no vetted results instead of
//! propagating. Output that arrives but cannot be used is not a failure: an
//! unusable query falls back to the taxonomy label and an unusable review
//! discards only the batch under review. Cancellation is checked before every collaborator call and
//! abandons a call that is in flight.

use std::future::Future;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::WorkflowConfig;
use crate::error::{BranchError, CompletionError};
use crate::graph::RunContext;
use crate::llm::{complete_structured, CompletionProvider, ReviewDecision, SearchQueryPlan};
use crate::prompts;
use crate::search::{SearchBackend, SearchRequest};
use crate::state::{BranchState, BranchStep, Decision, TaxonomyResult, ThoughtEntry};

/// Event source used by research branches
pub const RESEARCH_AGENT: &str = "Research Agent";

/// How a branch ended
#[derive(Debug)]
pub enum BranchStatus {
    Finalized,
    Failed(BranchError),
    Cancelled,
}

/// What a branch hands back to the orchestrator
#[derive(Debug)]
pub enum BranchOutcome {
    /// Branch finalized normally
    Completed {
        result: TaxonomyResult,
        attempts: usize,
        thoughts: Vec<ThoughtEntry>,
    },
    /// A collaborator failed; `result` has no vetted results
    Failed {
        result: TaxonomyResult,
        error: BranchError,
        thoughts: Vec<ThoughtEntry>,
    },
    /// The run was cancelled before the branch finalized
    Cancelled { taxonomy: String },
}

impl BranchOutcome {
    /// Result and audit entries to merge into the root state; `None` if cancelled
    pub fn into_merge(self) -> Option<(TaxonomyResult, Vec<ThoughtEntry>)> {
        match self {
            Self::Completed {
                result, thoughts, ..
            }
            | Self::Failed {
                result, thoughts, ..
            } => Some((result, thoughts)),
            Self::Cancelled { .. } => None,
        }
    }
}

enum Interrupt {
    Failed(BranchError),
    Cancelled,
}

/// Executes research branches against shared collaborators
#[derive(Clone)]
pub struct ResearchBranch {
    completion: Arc<dyn CompletionProvider>,
    search: Arc<dyn SearchBackend>,
    max_attempts: usize,
    num_search_results: usize,
    k_nearest_neighbors: usize,
}

impl ResearchBranch {
    pub fn new(
        completion: Arc<dyn CompletionProvider>,
        search: Arc<dyn SearchBackend>,
        config: &WorkflowConfig,
    ) -> Self {
        Self {
            completion,
            search,
            max_attempts: config.max_attempts.max(1),
            num_search_results: config.num_search_results,
            k_nearest_neighbors: config.k_nearest_neighbors,
        }
    }

    /// Run a branch to completion and keep only its result
    pub async fn run(&self, state: BranchState, ctx: &RunContext) -> BranchOutcome {
        let (mut state, status) = self.execute(state, ctx).await;
        match status {
            BranchStatus::Finalized => {
                let thoughts = std::mem::take(&mut state.thought_process);
                BranchOutcome::Completed {
                    attempts: state.attempts,
                    result: state.into_result(),
                    thoughts,
                }
            }
            BranchStatus::Failed(error) => {
                let mut thoughts = std::mem::take(&mut state.thought_process);
                thoughts.push(ThoughtEntry::BranchFailure {
                    taxonomy: state.taxonomy.clone(),
                    error: error.to_string(),
                });
                BranchOutcome::Failed {
                    result: TaxonomyResult::empty(state.taxonomy),
                    error,
                    thoughts,
                }
            }
            BranchStatus::Cancelled => BranchOutcome::Cancelled {
                taxonomy: state.taxonomy,
            },
        }
    }

    /// Run a branch to completion, returning its final state
    pub async fn execute(&self, mut state: BranchState, ctx: &RunContext) -> (BranchState, BranchStatus) {
        let mut step = BranchStep::GenerateQuery;

        loop {
            let next = match step {
                BranchStep::GenerateQuery => self
                    .generate_query(&mut state, ctx)
                    .await
                    .map(|_| BranchStep::Review),
                BranchStep::Review => self.review(&mut state, ctx).await,
                BranchStep::Finalize => {
                    ctx.reporter
                        .report(
                            RESEARCH_AGENT,
                            format!("Finalizing research for taxonomy: {}", state.taxonomy),
                        )
                        .await;
                    info!(
                        taxonomy = %state.taxonomy,
                        attempts = state.attempts,
                        vetted = state.vetted_results.len(),
                        "Branch finalized"
                    );
                    return (state, BranchStatus::Finalized);
                }
            };

            match next {
                Ok(next) => step = next,
                Err(Interrupt::Cancelled) => {
                    info!(taxonomy = %state.taxonomy, attempts = state.attempts, "Branch cancelled");
                    return (state, BranchStatus::Cancelled);
                }
                Err(Interrupt::Failed(error)) => {
                    warn!(taxonomy = %state.taxonomy, error = %error, "Branch failed");
                    ctx.reporter
                        .report(
                            RESEARCH_AGENT,
                            format!("Research failed for taxonomy: {}", state.taxonomy),
                        )
                        .await;
                    return (state, BranchStatus::Failed(error));
                }
            }
        }
    }

    async fn generate_query(&self, state: &mut BranchState, ctx: &RunContext) -> Result<(), Interrupt> {
        if ctx.is_cancelled() {
            return Err(Interrupt::Cancelled);
        }
        let attempt = state.begin_attempt();
        ctx.reporter
            .report(
                RESEARCH_AGENT,
                format!("Generating search query for taxonomy: {}", state.taxonomy),
            )
            .await;

        let plan: SearchQueryPlan = match guarded(
            ctx,
            complete_structured::<SearchQueryPlan>(
                self.completion.as_ref(),
                prompts::QUERY_SYSTEM_PROMPT,
                prompts::query_prompt(state),
            ),
        )
        .await?
        {
            Ok(plan) if !plan.search_query.trim().is_empty() => plan,
            Ok(_) | Err(CompletionError::MalformedOutput(_)) => {
                warn!(taxonomy = %state.taxonomy, attempt, "Unusable search query, searching for the taxonomy label");
                SearchQueryPlan {
                    search_query: state.taxonomy.clone(),
                    filter: None,
                }
            }
            Err(source) => {
                return Err(Interrupt::Failed(BranchError::QueryGeneration {
                    taxonomy: state.taxonomy.clone(),
                    source,
                }))
            }
        };

        let filter = plan.effective_filter();
        let request = SearchRequest::new(plan.search_query.clone(), self.num_search_results)
            .with_exclude_ids(state.processed_ids.clone())
            .with_filter(filter.clone())
            .with_k_nearest_neighbors(self.k_nearest_neighbors);

        let results = guarded(ctx, self.search.search(&request))
            .await?
            .map_err(|source| {
                Interrupt::Failed(BranchError::Search {
                    taxonomy: state.taxonomy.clone(),
                    source,
                })
            })?;

        let kept = state.record_search(plan.search_query, filter, results);
        info!(taxonomy = %state.taxonomy, attempt, results = kept, "Search completed");
        Ok(())
    }

    async fn review(&self, state: &mut BranchState, ctx: &RunContext) -> Result<BranchStep, Interrupt> {
        if ctx.is_cancelled() {
            return Err(Interrupt::Cancelled);
        }
        ctx.reporter
            .report(
                RESEARCH_AGENT,
                format!(
                    "Evaluating search attempt {} for taxonomy: {}",
                    state.attempts, state.taxonomy
                ),
            )
            .await;

        let review: ReviewDecision = match guarded(
            ctx,
            complete_structured(
                self.completion.as_ref(),
                prompts::REVIEW_SYSTEM_PROMPT,
                prompts::review_prompt(state),
            ),
        )
        .await?
        {
            Ok(review) => review,
            Err(CompletionError::MalformedOutput(message)) => {
                warn!(taxonomy = %state.taxonomy, error = %message, "Unparseable review, current batch discarded");
                ReviewDecision::default()
            }
            Err(source) => {
                return Err(Interrupt::Failed(BranchError::Review {
                    taxonomy: state.taxonomy.clone(),
                    source,
                }))
            }
        };
        for err in &review.malformed {
            warn!(taxonomy = %state.taxonomy, error = %err, "Ignoring malformed review field");
        }

        let outcome = state.apply_review(
            &review.valid_results,
            &review.invalid_results,
            review.thought_process,
            review.decision,
        );
        info!(
            taxonomy = %state.taxonomy,
            attempt = state.attempts,
            decision = %outcome.decision,
            vetted = outcome.vetted,
            discarded = outcome.discarded,
            "Review applied"
        );

        let next = state.next_step(self.max_attempts);
        if next.is_terminal() && outcome.decision == Decision::Retry {
            ctx.reporter
                .report(
                    RESEARCH_AGENT,
                    format!(
                        "Reached maximum attempts ({}) for taxonomy {}. Proceeding to finalize.",
                        self.max_attempts, state.taxonomy
                    ),
                )
                .await;
        }
        Ok(next)
    }
}

/// Await a collaborator call unless the run is cancelled first
async fn guarded<F, T>(ctx: &RunContext, call: F) -> Result<T, Interrupt>
where
    F: Future<Output = T>,
{
    if ctx.is_cancelled() {
        return Err(Interrupt::Cancelled);
    }
    tokio::select! {
        biased;
        _ = ctx.cancel.cancelled() => Err(Interrupt::Cancelled),
        out = call => Ok(out),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SearchError;
    use crate::events::{progress_channel, EventKind};
    use crate::llm::CompletionRequest;
    use crate::state::SearchResult;
    use async_trait::async_trait;
    use std::collections::{HashSet, VecDeque};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    /// Answers query requests with a fixed plan and review requests from a script
    struct ScriptedModel {
        reviews: Mutex<VecDeque<String>>,
        fallback_review: String,
        query_calls: AtomicUsize,
        review_calls: AtomicUsize,
        fail_reviews: bool,
        garbled_queries: bool,
    }

    impl ScriptedModel {
        fn always(review: &str) -> Self {
            Self {
                reviews: Mutex::new(VecDeque::new()),
                fallback_review: review.to_string(),
                query_calls: AtomicUsize::new(0),
                review_calls: AtomicUsize::new(0),
                fail_reviews: false,
                garbled_queries: false,
            }
        }

        fn scripted(reviews: &[&str], fallback: &str) -> Self {
            let model = Self::always(fallback);
            *model.reviews.lock().unwrap() = reviews.iter().map(|s| s.to_string()).collect();
            model
        }
    }

    #[async_trait]
    impl CompletionProvider for ScriptedModel {
        async fn complete(&self, request: &CompletionRequest) -> Result<String, CompletionError> {
            match request.output_schema.as_ref().map(|s| s.name) {
                Some("SearchQueryPlan") => {
                    let n = self.query_calls.fetch_add(1, Ordering::SeqCst) + 1;
                    if self.garbled_queries {
                        return Ok("Sorry, I could not come up with a query.".into());
                    }
                    Ok(format!(r#"{{"search_query": "query {n}", "filter": null}}"#))
                }
                Some("ReviewDecision") => {
                    self.review_calls.fetch_add(1, Ordering::SeqCst);
                    if self.fail_reviews {
                        return Err(CompletionError::Timeout);
                    }
                    let next = self.reviews.lock().unwrap().pop_front();
                    Ok(next.unwrap_or_else(|| self.fallback_review.clone()))
                }
                other => Err(CompletionError::malformed(format!("unexpected schema {other:?}"))),
            }
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    /// Returns fresh ids on every call, honouring the exclusion set
    struct FreshResults {
        per_call: usize,
        calls: AtomicUsize,
        seen_exclusions: Mutex<Vec<HashSet<String>>>,
        seen_queries: Mutex<Vec<String>>,
    }

    impl FreshResults {
        fn new(per_call: usize) -> Self {
            Self {
                per_call,
                calls: AtomicUsize::new(0),
                seen_exclusions: Mutex::new(Vec::new()),
                seen_queries: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl SearchBackend for FreshResults {
        async fn search(&self, request: &SearchRequest) -> Result<Vec<SearchResult>, SearchError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen_exclusions.lock().unwrap().push(request.exclude_ids.clone());
            self.seen_queries.lock().unwrap().push(request.query.clone());
            Ok((0..self.per_call)
                .map(|i| SearchResult::new(format!("r{call}-{i}"), "text", "doc.pdf", 0.5))
                .collect())
        }

        fn name(&self) -> &str {
            "fresh"
        }
    }

    struct FailingSearch;

    #[async_trait]
    impl SearchBackend for FailingSearch {
        async fn search(&self, _request: &SearchRequest) -> Result<Vec<SearchResult>, SearchError> {
            Err(SearchError::ServerError(503, "index unavailable".into()))
        }

        fn name(&self) -> &str {
            "failing"
        }
    }

    struct HangingSearch;

    #[async_trait]
    impl SearchBackend for HangingSearch {
        async fn search(&self, _request: &SearchRequest) -> Result<Vec<SearchResult>, SearchError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(Vec::new())
        }

        fn name(&self) -> &str {
            "hanging"
        }
    }

    const ALL_VALID_RETRY: &str =
        r#"{"thought_process": "keep going", "valid_results": [0, 1], "invalid_results": [], "decision": "retry"}"#;
    const ALL_VALID_FINALIZE: &str =
        r#"{"thought_process": "enough", "valid_results": [0, 1], "invalid_results": [], "decision": "finalize"}"#;

    fn branch(
        model: Arc<ScriptedModel>,
        search: Arc<dyn SearchBackend>,
        max_attempts: usize,
    ) -> ResearchBranch {
        let config = WorkflowConfig::default().with_max_attempts(max_attempts);
        ResearchBranch::new(model, search, &config)
    }

    fn fresh_state() -> BranchState {
        BranchState::new("Group relief", "Can losses be surrendered?", "")
    }

    #[tokio::test]
    async fn test_always_retry_stops_at_max_attempts() {
        let model = Arc::new(ScriptedModel::always(ALL_VALID_RETRY));
        let search = Arc::new(FreshResults::new(2));
        let runner = branch(model.clone(), search.clone(), 3);

        let (state, status) = runner.execute(fresh_state(), &RunContext::detached()).await;

        assert!(matches!(status, BranchStatus::Finalized));
        assert_eq!(state.attempts, 3);
        assert_eq!(model.query_calls.load(Ordering::SeqCst), 3);
        assert_eq!(model.review_calls.load(Ordering::SeqCst), 3);
        assert_eq!(state.vetted_results.len(), 6);
        assert_eq!(state.decisions, vec![Decision::Retry; 3]);
    }

    #[tokio::test]
    async fn test_explicit_finalize_exits_early() {
        let model = Arc::new(ScriptedModel::scripted(&[ALL_VALID_RETRY], ALL_VALID_FINALIZE));
        let search = Arc::new(FreshResults::new(2));
        let runner = branch(model.clone(), search, 5);

        let (state, status) = runner.execute(fresh_state(), &RunContext::detached()).await;

        assert!(matches!(status, BranchStatus::Finalized));
        assert_eq!(state.attempts, 2);
        assert_eq!(state.decisions.last(), Some(&Decision::Finalize));
    }

    #[tokio::test]
    async fn test_processed_ids_excluded_from_later_searches() {
        let model = Arc::new(ScriptedModel::always(
            r#"{"thought_process": "", "valid_results": [0], "invalid_results": [1], "decision": "retry"}"#,
        ));
        let search = Arc::new(FreshResults::new(2));
        let runner = branch(model, search.clone(), 3);

        let (state, _) = runner.execute(fresh_state(), &RunContext::detached()).await;

        let exclusions = search.seen_exclusions.lock().unwrap().clone();
        assert!(exclusions[0].is_empty());
        assert_eq!(exclusions[1].len(), 2);
        assert_eq!(exclusions[2].len(), 4);

        let all_seen: HashSet<String> = (0..3)
            .flat_map(|call| (0..2).map(move |i| format!("r{call}-{i}")))
            .collect();
        assert_eq!(state.processed_ids, all_seen);
        assert_eq!(state.vetted_results.len(), 3);
        assert_eq!(state.discarded_results.len(), 3);
    }

    #[tokio::test]
    async fn test_out_of_range_indices_do_not_crash() {
        let model = Arc::new(ScriptedModel::always(
            r#"{"thought_process": "", "valid_results": [0, 17], "invalid_results": [-3], "decision": "finalize"}"#,
        ));
        let runner = branch(model, Arc::new(FreshResults::new(1)), 3);

        let outcome = runner.run(fresh_state(), &RunContext::detached()).await;
        match outcome {
            BranchOutcome::Completed { result, attempts, thoughts } => {
                assert_eq!(attempts, 1);
                assert_eq!(thoughts.len(), 2);
                assert_eq!(result.vetted_results.len(), 1);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_search_failure_finalizes_empty() {
        let model = Arc::new(ScriptedModel::always(ALL_VALID_FINALIZE));
        let runner = branch(model.clone(), Arc::new(FailingSearch), 3);

        let outcome = runner.run(fresh_state(), &RunContext::detached()).await;
        match outcome {
            BranchOutcome::Failed { result, error, thoughts } => {
                assert_eq!(result.taxonomy, "Group relief");
                assert!(result.vetted_results.is_empty());
                assert!(matches!(error, BranchError::Search { .. }));
                assert_eq!(thoughts.last().map(ThoughtEntry::kind), Some("branch_failure"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(model.review_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_review_failure_discards_partial_vetting() {
        let mut model = ScriptedModel::always(ALL_VALID_RETRY);
        model.fail_reviews = true;
        let runner = branch(Arc::new(model), Arc::new(FreshResults::new(2)), 3);

        let outcome = runner.run(fresh_state(), &RunContext::detached()).await;
        assert!(matches!(
            outcome,
            BranchOutcome::Failed { error: BranchError::Review { .. }, .. }
        ));
    }

    #[tokio::test]
    async fn test_malformed_review_fields_keep_earlier_vetting() {
        let model = Arc::new(ScriptedModel::scripted(
            &[ALL_VALID_RETRY],
            r#"{"thought_process": "done", "valid_results": ["0", "x"], "invalid_results": [], "decision": "Finalize"}"#,
        ));
        let runner = branch(model, Arc::new(FreshResults::new(2)), 3);

        let outcome = runner.run(fresh_state(), &RunContext::detached()).await;
        match outcome {
            BranchOutcome::Completed { result, attempts, .. } => {
                assert_eq!(attempts, 2);
                let ids: Vec<_> = result.vetted_results.iter().map(|r| r.id.as_str()).collect();
                assert_eq!(ids, vec!["r0-0", "r0-1", "r1-0"]);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unparseable_review_discards_only_current_batch() {
        let model = Arc::new(ScriptedModel::scripted(
            &[ALL_VALID_RETRY],
            "These results look mixed, hard to say.",
        ));
        let runner = branch(model, Arc::new(FreshResults::new(2)), 2);

        let (state, status) = runner.execute(fresh_state(), &RunContext::detached()).await;

        assert!(matches!(status, BranchStatus::Finalized));
        assert_eq!(state.attempts, 2);
        assert_eq!(state.vetted_results.len(), 2);
        assert_eq!(state.discarded_results.len(), 2);
    }

    #[tokio::test]
    async fn test_unparseable_query_searches_taxonomy_label() {
        let mut model = ScriptedModel::always(ALL_VALID_FINALIZE);
        model.garbled_queries = true;
        let search = Arc::new(FreshResults::new(1));
        let runner = branch(Arc::new(model), search.clone(), 3);

        let outcome = runner.run(fresh_state(), &RunContext::detached()).await;

        assert!(matches!(outcome, BranchOutcome::Completed { .. }));
        assert_eq!(*search.seen_queries.lock().unwrap(), vec!["Group relief".to_string()]);
    }

    #[tokio::test]
    async fn test_cancellation_abandons_in_flight_search() {
        let model = Arc::new(ScriptedModel::always(ALL_VALID_FINALIZE));
        let runner = branch(model, Arc::new(HangingSearch), 3);
        let ctx = RunContext::detached();

        let cancel = ctx.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel.cancel();
        });

        let outcome = tokio::time::timeout(Duration::from_secs(5), runner.run(fresh_state(), &ctx))
            .await
            .expect("branch should stop promptly after cancellation");
        assert!(matches!(outcome, BranchOutcome::Cancelled { .. }));
    }

    #[tokio::test]
    async fn test_progress_events_per_cycle() {
        let model = Arc::new(ScriptedModel::always(ALL_VALID_RETRY));
        let runner = branch(model, Arc::new(FreshResults::new(1)), 2);
        let (reporter, mut receiver) =
            progress_channel(64, Duration::from_secs(1), CancellationToken::new());
        let ctx = RunContext::new(reporter.clone(), CancellationToken::new());

        runner.run(fresh_state(), &ctx).await;
        reporter.finish("test", "done").await;

        let mut messages = Vec::new();
        while let Some(event) = receiver.recv().await {
            if event.kind == EventKind::Update {
                assert_eq!(event.source, RESEARCH_AGENT);
                messages.push(event.message);
            }
        }

        assert_eq!(
            messages,
            vec![
                "Generating search query for taxonomy: Group relief",
                "Evaluating search attempt 1 for taxonomy: Group relief",
                "Generating search query for taxonomy: Group relief",
                "Evaluating search attempt 2 for taxonomy: Group relief",
                "Reached maximum attempts (2) for taxonomy Group relief. Proceeding to finalize.",
                "Finalizing research for taxonomy: Group relief",
            ]
        );
    }
}
