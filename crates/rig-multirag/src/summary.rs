//! Presentation summary of a finished run

use serde::{Deserialize, Serialize};

use crate::state::{SearchResult, ThoughtEntry, WorkflowState};

/// Shown for a taxonomy with no vetted evidence
pub const NO_INFORMATION: &str = "No relevant information found.";

/// One vetted result, trimmed for display
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snippet {
    pub snippet: String,
    pub source: String,
    /// Search score as a whole-number percentage
    pub confidence: u32,
}

impl From<&SearchResult> for Snippet {
    fn from(result: &SearchResult) -> Self {
        Self {
            snippet: result.content.trim().to_string(),
            source: result.source_file.clone(),
            confidence: confidence_percent(result.score),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxonomySummary {
    pub taxonomy: String,
    pub results: Vec<Snippet>,
}

impl TaxonomySummary {
    pub fn has_results(&self) -> bool {
        !self.results.is_empty()
    }
}

/// UI-facing view of a [`WorkflowState`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowSummary {
    pub user_query: String,
    pub final_answer: String,
    pub taxonomy_summary: Vec<TaxonomySummary>,
    pub thought_process: Vec<String>,
}

impl WorkflowSummary {
    pub fn from_state(state: &WorkflowState) -> Self {
        // Partial states may stop before consolidation
        let results = if state.research_results.is_empty() {
            &state.research_outputs
        } else {
            &state.research_results
        };

        Self {
            user_query: state.user_input.clone(),
            final_answer: state.final_answer.clone().unwrap_or_default(),
            taxonomy_summary: results
                .iter()
                .map(|output| TaxonomySummary {
                    taxonomy: output.taxonomy.clone(),
                    results: output.vetted_results.iter().map(Snippet::from).collect(),
                })
                .collect(),
            thought_process: state.thought_process.iter().map(describe_thought).collect(),
        }
    }

    /// Plain-text rendering for terminals
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("Question: {}\n\n", self.user_query));
        out.push_str(&format!("Answer:\n{}\n", self.final_answer));

        for summary in &self.taxonomy_summary {
            out.push_str(&format!("\n[{}]\n", summary.taxonomy));
            if !summary.has_results() {
                out.push_str(&format!("  {}\n", NO_INFORMATION));
            }
            for snippet in &summary.results {
                out.push_str(&format!(
                    "  - ({}, {}%) {}\n",
                    snippet.source, snippet.confidence, snippet.snippet
                ));
            }
        }

        if !self.thought_process.is_empty() {
            out.push_str("\nThought process:\n");
            for (i, line) in self.thought_process.iter().enumerate() {
                out.push_str(&format!("  {}. {}\n", i + 1, line));
            }
        }
        out
    }
}

fn confidence_percent(score: f64) -> u32 {
    if !score.is_finite() {
        return 0;
    }
    (score * 100.0).round().clamp(0.0, 100.0) as u32
}

/// One human-readable line per thought entry
pub fn describe_thought(thought: &ThoughtEntry) -> String {
    match thought {
        ThoughtEntry::TaxonomyExtraction { taxonomies, .. } => {
            format!("Identified taxonomies: {}.", taxonomies.join(", "))
        }
        ThoughtEntry::SearchQuery {
            taxonomy,
            attempt,
            query,
            num_results,
            ..
        } => format!(
            "Searched for \"{}\" on {} (attempt {}), {} new results.",
            query, taxonomy, attempt, num_results
        ),
        ThoughtEntry::Review {
            taxonomy,
            attempt,
            decision,
            valid_results,
            invalid_results,
            ..
        } => format!(
            "Reviewed attempt {} for {}: {} kept, {} discarded, decided to {}.",
            attempt, taxonomy, valid_results, invalid_results, decision
        ),
        ThoughtEntry::Consolidation { num_taxonomies, .. } => {
            format!("Consolidated results across {} taxonomies.", num_taxonomies)
        }
        ThoughtEntry::FinalAnswer { final_answer } => {
            format!("Synthesized final answer: {}", final_answer)
        }
        ThoughtEntry::BranchFailure { taxonomy, error } => {
            format!("Research for {} failed: {}", taxonomy, error)
        }
    }
}
