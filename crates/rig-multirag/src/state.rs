//! Workflow state definitions
//!
//! Three explicit state records flow through a run:
//!
//! - [`WorkflowState`]: one per request, updated by the root graph through [`WorkflowUpdate`]s
//! - [`BranchState`]: one per taxonomy, owned by a single research branch
//! - [`TaxonomyResult`]: the only thing a branch hands back to the root

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use tracing::{debug, warn};

use crate::error::MalformedOutputError;
use crate::graph::GraphState;

/// A document chunk returned by the search collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    /// Unique id of the chunk in the corpus
    pub id: String,
    pub content: String,
    pub source_file: String,
    pub score: f64,
}

impl SearchResult {
    pub fn new(
        id: impl Into<String>,
        content: impl Into<String>,
        source_file: impl Into<String>,
        score: f64,
    ) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            source_file: source_file.into(),
            score,
        }
    }
}

/// Vetted evidence for one taxonomy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaxonomyResult {
    pub taxonomy: String,
    pub vetted_results: Vec<SearchResult>,
}

impl TaxonomyResult {
    pub fn new(taxonomy: impl Into<String>, vetted_results: Vec<SearchResult>) -> Self {
        Self {
            taxonomy: taxonomy.into(),
            vetted_results,
        }
    }

    /// Result of a branch that failed before vetting anything
    pub fn empty(taxonomy: impl Into<String>) -> Self {
        Self::new(taxonomy, Vec::new())
    }
}

/// Review verdict for a research branch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Retry,
    Finalize,
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Decision::Retry => write!(f, "retry"),
            Decision::Finalize => write!(f, "finalize"),
        }
    }
}

/// One issued search: the query and optional filter expression
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchRecord {
    pub query: String,
    pub filter: Option<String>,
}

/// Append-only audit entry describing a decision made during a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ThoughtEntry {
    TaxonomyExtraction {
        taxonomies: Vec<String>,
        reasoning: String,
    },
    SearchQuery {
        taxonomy: String,
        attempt: usize,
        query: String,
        filter: Option<String>,
        num_results: usize,
    },
    Review {
        taxonomy: String,
        attempt: usize,
        thought_process: String,
        decision: Decision,
        valid_results: usize,
        invalid_results: usize,
    },
    Consolidation {
        num_taxonomies: usize,
        results_per_taxonomy: BTreeMap<String, usize>,
    },
    FinalAnswer {
        final_answer: String,
    },
    BranchFailure {
        taxonomy: String,
        error: String,
    },
}

impl ThoughtEntry {
    /// Stable name of the entry kind, matching its serialized tag
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TaxonomyExtraction { .. } => "taxonomy_extraction",
            Self::SearchQuery { .. } => "search_query",
            Self::Review { .. } => "review",
            Self::Consolidation { .. } => "consolidation",
            Self::FinalAnswer { .. } => "final_answer",
            Self::BranchFailure { .. } => "branch_failure",
        }
    }
}

/// Step of the research sub-workflow state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BranchStep {
    GenerateQuery,
    Review,
    Finalize,
}

impl BranchStep {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finalize)
    }
}

/// Outcome of applying one review to a branch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewOutcome {
    /// Decision recorded for this cycle (model decision or the default)
    pub decision: Decision,
    pub vetted: usize,
    pub discarded: usize,
    /// Results the review did not mention; they are discarded as well
    pub unreviewed: usize,
    /// Portions of the review that were ignored
    pub malformed: Vec<MalformedOutputError>,
}

/// Private state of one research branch
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BranchState {
    pub taxonomy: String,
    pub user_input: String,
    pub user_history: String,
    /// Results of the latest search, replaced on every query
    pub current_results: Vec<SearchResult>,
    pub vetted_results: Vec<SearchResult>,
    pub discarded_results: Vec<SearchResult>,
    /// Ids excluded from subsequent searches; never shrinks
    pub processed_ids: HashSet<String>,
    pub reviews: Vec<String>,
    pub decisions: Vec<Decision>,
    pub attempts: usize,
    pub search_history: Vec<SearchRecord>,
    pub thought_process: Vec<ThoughtEntry>,
}

impl BranchState {
    pub fn new(
        taxonomy: impl Into<String>,
        user_input: impl Into<String>,
        user_history: impl Into<String>,
    ) -> Self {
        Self {
            taxonomy: taxonomy.into(),
            user_input: user_input.into(),
            user_history: user_history.into(),
            ..Default::default()
        }
    }

    /// Start a new generate-query cycle, returning the attempt number
    pub fn begin_attempt(&mut self) -> usize {
        self.attempts += 1;
        self.attempts
    }

    /// Store a fresh search batch as the current results
    ///
    /// Results already processed by an earlier review, or repeated within the batch,
    /// are dropped. Returns the number of results kept.
    pub fn record_search(
        &mut self,
        query: impl Into<String>,
        filter: Option<String>,
        results: Vec<SearchResult>,
    ) -> usize {
        let query = query.into();
        let mut seen = HashSet::new();
        let received = results.len();

        self.current_results = results
            .into_iter()
            .filter(|r| !self.processed_ids.contains(&r.id) && seen.insert(r.id.clone()))
            .collect();

        if self.current_results.len() < received {
            debug!(
                taxonomy = %self.taxonomy,
                dropped = received - self.current_results.len(),
                "Dropped already processed search results"
            );
        }

        self.thought_process.push(ThoughtEntry::SearchQuery {
            taxonomy: self.taxonomy.clone(),
            attempt: self.attempts,
            query: query.clone(),
            filter: filter.clone(),
            num_results: self.current_results.len(),
        });
        self.search_history.push(SearchRecord { query, filter });

        self.current_results.len()
    }

    /// Partition the current results according to a review
    ///
    /// `valid` and `invalid` are indices into `current_results`. Out-of-range indices are
    /// ignored, an index listed as both counts as valid, and results not mentioned at all
    /// are discarded. When `requested` is `None` the decision defaults to finalize if the
    /// search came back empty, retry otherwise.
    pub fn apply_review(
        &mut self,
        valid: &[i64],
        invalid: &[i64],
        reasoning: impl Into<String>,
        requested: Option<Decision>,
    ) -> ReviewOutcome {
        let reasoning = reasoning.into();
        let len = self.current_results.len();
        let mut malformed = Vec::new();

        let mut in_range = |indices: &[i64]| -> BTreeSet<usize> {
            indices
                .iter()
                .filter_map(|&index| match usize::try_from(index) {
                    Ok(i) if i < len => Some(i),
                    _ => {
                        malformed.push(MalformedOutputError::IndexOutOfRange { index, len });
                        None
                    }
                })
                .collect()
        };
        let valid = in_range(valid);
        let invalid: BTreeSet<usize> = in_range(invalid).difference(&valid).copied().collect();

        for err in &malformed {
            warn!(taxonomy = %self.taxonomy, error = %err, "Ignoring malformed review index");
        }

        let decision = requested.unwrap_or({
            if len == 0 && self.attempts >= 1 {
                Decision::Finalize
            } else {
                Decision::Retry
            }
        });

        let mut outcome = ReviewOutcome {
            decision,
            vetted: 0,
            discarded: 0,
            unreviewed: 0,
            malformed,
        };

        for (index, result) in std::mem::take(&mut self.current_results).into_iter().enumerate() {
            if !self.processed_ids.insert(result.id.clone()) {
                continue;
            }
            if valid.contains(&index) {
                outcome.vetted += 1;
                self.vetted_results.push(result);
            } else {
                if !invalid.contains(&index) {
                    outcome.unreviewed += 1;
                }
                outcome.discarded += 1;
                self.discarded_results.push(result);
            }
        }

        self.thought_process.push(ThoughtEntry::Review {
            taxonomy: self.taxonomy.clone(),
            attempt: self.attempts,
            thought_process: reasoning.clone(),
            decision,
            valid_results: outcome.vetted,
            invalid_results: outcome.discarded,
        });
        self.reviews.push(reasoning);
        self.decisions.push(decision);

        outcome
    }

    /// Step following a completed review
    ///
    /// Attempt exhaustion takes precedence over the recorded decision.
    pub fn next_step(&self, max_attempts: usize) -> BranchStep {
        if self.attempts >= max_attempts || self.decisions.last() == Some(&Decision::Finalize) {
            BranchStep::Finalize
        } else {
            BranchStep::GenerateQuery
        }
    }

    /// Consume the branch, keeping only its vetted results
    pub fn into_result(self) -> TaxonomyResult {
        TaxonomyResult::new(self.taxonomy, self.vetted_results)
    }
}

/// Top-level state of one run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    pub user_input: String,
    pub user_history: String,
    pub taxonomies: Vec<String>,
    /// Accumulator of branch outputs (append-only, order not significant)
    pub research_outputs: Vec<TaxonomyResult>,
    /// Snapshot of `research_outputs` taken at consolidation
    pub research_results: Vec<TaxonomyResult>,
    pub final_answer: Option<String>,
    pub thought_process: Vec<ThoughtEntry>,
}

impl WorkflowState {
    pub fn new(user_input: impl Into<String>, user_history: impl Into<String>) -> Self {
        Self {
            user_input: user_input.into(),
            user_history: user_history.into(),
            ..Default::default()
        }
    }

    /// Merged output for a taxonomy, if its branch has finished
    pub fn research_output(&self, taxonomy: &str) -> Option<&TaxonomyResult> {
        self.research_outputs.iter().find(|r| r.taxonomy == taxonomy)
    }

    /// Total number of vetted results across all taxonomies
    pub fn vetted_count(&self) -> usize {
        self.research_outputs
            .iter()
            .map(|r| r.vetted_results.len())
            .sum()
    }
}

/// Update produced by a node of the root graph
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkflowUpdate {
    pub taxonomies: Option<Vec<String>>,
    pub research_outputs: Vec<TaxonomyResult>,
    pub research_results: Option<Vec<TaxonomyResult>>,
    pub final_answer: Option<String>,
    pub thoughts: Vec<ThoughtEntry>,
}

impl WorkflowUpdate {
    pub fn taxonomies(taxonomies: Vec<String>) -> Self {
        Self {
            taxonomies: Some(taxonomies),
            ..Default::default()
        }
    }

    pub fn research_outputs(outputs: Vec<TaxonomyResult>) -> Self {
        Self {
            research_outputs: outputs,
            ..Default::default()
        }
    }

    pub fn research_results(results: Vec<TaxonomyResult>) -> Self {
        Self {
            research_results: Some(results),
            ..Default::default()
        }
    }

    pub fn final_answer(answer: impl Into<String>) -> Self {
        Self {
            final_answer: Some(answer.into()),
            ..Default::default()
        }
    }

    pub fn with_thought(mut self, thought: ThoughtEntry) -> Self {
        self.thoughts.push(thought);
        self
    }

    pub fn with_thoughts(mut self, thoughts: impl IntoIterator<Item = ThoughtEntry>) -> Self {
        self.thoughts.extend(thoughts);
        self
    }
}


impl GraphState for WorkflowState {
    type Update = WorkflowUpdate;

    fn apply_update(&self, update: Self::Update) -> Self {
        let mut new = self.clone();

        if let Some(taxonomies) = update.taxonomies {
            new.taxonomies = taxonomies;
        }
        new.research_outputs.extend(update.research_outputs);
        if let Some(results) = update.research_results {
            new.research_results = results;
        }
        if let Some(answer) = update.final_answer {
            if new.final_answer.is_some() {
                warn!("Final answer already set, ignoring second answer");
            } else {
                new.final_answer = Some(answer);
            }
        }
        new.thought_process.extend(update.thoughts);

        new
    }

    fn is_terminal(&self) -> bool {
        self.final_answer.is_some()
    }
}
