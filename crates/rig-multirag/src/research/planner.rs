//! Taxonomy identification

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

use super::{until_cancelled, IDENTIFY_TAXONOMIES};
use crate::config::WorkflowConfig;
use crate::error::{MalformedOutputError, NodeError, PlanningError};
use crate::graph::{Node, NodeId, RunContext};
use crate::llm::{complete_structured, CompletionProvider, TaxonomyExtraction};
use crate::prompts;
use crate::state::{ThoughtEntry, WorkflowState, WorkflowUpdate};

/// Event source used by the planning step
pub const PLANNER: &str = "Planner";

/// Taxonomies accepted for a question
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaxonomyPlan {
    pub taxonomies: Vec<String>,
    pub reasoning: String,
}

/// Trim labels, drop blanks and duplicates, cap the count
///
/// Returns the usable labels in their original order together with the labels
/// that were rejected.
pub fn normalize_taxonomies(
    raw: Vec<String>,
    max_taxonomies: usize,
) -> (Vec<String>, Vec<MalformedOutputError>) {
    let mut seen = HashSet::new();
    let mut rejected = Vec::new();
    let mut taxonomies = Vec::new();

    for label in raw {
        let trimmed = label.trim();
        if trimmed.is_empty() || !seen.insert(trimmed.to_lowercase()) {
            rejected.push(MalformedOutputError::InvalidTaxonomy(label));
            continue;
        }
        taxonomies.push(trimmed.to_string());
    }

    if taxonomies.len() > max_taxonomies {
        warn!(
            identified = taxonomies.len(),
            max_taxonomies, "Too many taxonomies, truncating"
        );
        taxonomies.truncate(max_taxonomies);
    }

    (taxonomies, rejected)
}

/// Splits a question into research taxonomies
#[derive(Clone)]
pub struct TaxonomyPlanner {
    completion: Arc<dyn CompletionProvider>,
    max_taxonomies: usize,
}

impl TaxonomyPlanner {
    pub fn new(completion: Arc<dyn CompletionProvider>, config: &WorkflowConfig) -> Self {
        Self {
            completion,
            max_taxonomies: config.max_taxonomies.max(1),
        }
    }

    pub async fn identify(&self, question: &str, history: &str) -> Result<TaxonomyPlan, PlanningError> {
        let extraction: TaxonomyExtraction = complete_structured(
            self.completion.as_ref(),
            prompts::TAXONOMY_SYSTEM_PROMPT,
            prompts::taxonomy_prompt(question, history, self.max_taxonomies),
        )
        .await?;

        let (taxonomies, rejected) = normalize_taxonomies(extraction.taxonomies, self.max_taxonomies);
        for err in &rejected {
            warn!(error = %err, "Dropping taxonomy label");
        }
        if taxonomies.is_empty() {
            return Err(PlanningError::NoTaxonomies);
        }

        Ok(TaxonomyPlan {
            taxonomies,
            reasoning: extraction.reasoning,
        })
    }
}

/// Root node: question -> taxonomies
pub struct IdentifyTaxonomiesNode {
    planner: TaxonomyPlanner,
}

impl IdentifyTaxonomiesNode {
    pub fn new(planner: TaxonomyPlanner) -> Self {
        Self { planner }
    }
}

#[async_trait]
impl Node<WorkflowState> for IdentifyTaxonomiesNode {
    fn id(&self) -> NodeId {
        NodeId::from(IDENTIFY_TAXONOMIES)
    }

    async fn run(&self, state: &WorkflowState, ctx: &RunContext) -> Result<WorkflowUpdate, NodeError> {
        ctx.reporter
            .report(PLANNER, "Identifying research taxonomies for the question")
            .await;

        let plan = until_cancelled(
            ctx,
            self.planner.identify(&state.user_input, &state.user_history),
        )
        .await??;

        info!(taxonomies = ?plan.taxonomies, "Taxonomies identified");
        ctx.reporter
            .report(
                PLANNER,
                format!(
                    "Identified {} taxonomies: {}",
                    plan.taxonomies.len(),
                    plan.taxonomies.join(", ")
                ),
            )
            .await;

        let thought = ThoughtEntry::TaxonomyExtraction {
            taxonomies: plan.taxonomies.clone(),
            reasoning: plan.reasoning,
        };
        Ok(WorkflowUpdate::taxonomies(plan.taxonomies).with_thought(thought))
    }
}
