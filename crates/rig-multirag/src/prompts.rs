//! Prompt construction
//!
//! System prompts are short and generic; the user prompts carry the state a
//! step needs, rendered by the `format_*` helpers.

use crate::state::{BranchState, SearchResult, TaxonomyResult};

pub const TAXONOMY_SYSTEM_PROMPT: &str = "You are a research planner. Split the user's question into \
independent research taxonomies: sub-topics that can each be researched on their own against a \
document corpus. Use short, specific labels.";

pub const QUERY_SYSTEM_PROMPT: &str = "You write search queries for a hybrid keyword and vector \
document index. Produce one focused query for the given taxonomy and, only when it clearly helps, \
a filter expression. Learn from previous attempts instead of repeating them.";

pub const REVIEW_SYSTEM_PROMPT: &str = "You review search results for one research taxonomy. \
Mark each result index as valid (relevant to the taxonomy and the question) or invalid, explain \
your reasoning, and decide whether to retry with a new query or finalize.";

pub const SYNTHESIS_SYSTEM_PROMPT: &str = "You answer the user's question using only the vetted \
research results provided. Integrate the taxonomies into one coherent answer, cite sources where \
useful, and do not describe the research process.";

/// Message used when a taxonomy has no vetted results
pub const NO_RESULTS_MESSAGE: &str = "No relevant results found for this taxonomy.";

fn history_block(history: &str) -> String {
    if history.trim().is_empty() {
        String::new()
    } else {
        format!("Conversation so far:\n{}\n\n", history.trim())
    }
}

pub fn taxonomy_prompt(question: &str, history: &str, max_taxonomies: usize) -> String {
    format!(
        "{}User Question: {}\n\nIdentify between 2 and {} taxonomies.",
        history_block(history),
        question,
        max_taxonomies.max(2)
    )
}

pub fn query_prompt(branch: &BranchState) -> String {
    format!(
        "{}User Question: {}\nTaxonomy: {}\n\nPrevious Search Attempts:\n{}",
        history_block(&branch.user_history),
        branch.user_input,
        branch.taxonomy,
        format_search_history(branch)
    )
}

pub fn review_prompt(branch: &BranchState) -> String {
    format!(
        "User Question: {}\nTaxonomy: {}\n\nCurrent Search Results:\n{}\n\nPreviously Vetted Results:\n{}\n\nSearch History:\n{}",
        branch.user_input,
        branch.taxonomy,
        format_search_results(&branch.current_results),
        format_search_results(&branch.vetted_results),
        format_search_history(branch)
    )
}

pub fn synthesis_prompt(question: &str, history: &str, outputs: &[TaxonomyResult]) -> String {
    format!(
        "{}User Question: {}\n\nResearch Results:\n{}",
        history_block(history),
        question,
        format_research_results(outputs)
    )
}

/// Render results with their indices for review
pub fn format_search_results(results: &[SearchResult]) -> String {
    if results.is_empty() {
        return "None".to_string();
    }
    results
        .iter()
        .enumerate()
        .map(|(i, r)| {
            format!(
                "Result #{}\nID: {}\nSource File: {}\nContent: {}\n",
                i, r.id, r.source_file, r.content
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Render prior attempts as `(query, filter, review)` triples
pub fn format_search_history(branch: &BranchState) -> String {
    if branch.search_history.is_empty() {
        return "None".to_string();
    }
    branch
        .search_history
        .iter()
        .enumerate()
        .map(|(i, record)| {
            let review = branch.reviews.get(i).map(String::as_str).unwrap_or("Pending");
            format!(
                "<Attempt {}>\nQuery: {}\nFilter: {}\nReview: {}\n</Attempt {}>",
                i + 1,
                record.query,
                record.filter.as_deref().unwrap_or("None"),
                review,
                i + 1
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Render vetted results grouped by taxonomy for synthesis
pub fn format_research_results(outputs: &[TaxonomyResult]) -> String {
    outputs
        .iter()
        .map(|output| {
            let body = if output.vetted_results.is_empty() {
                NO_RESULTS_MESSAGE.to_string()
            } else {
                output
                    .vetted_results
                    .iter()
                    .enumerate()
                    .map(|(i, r)| format!("Result {} ({}): {}", i + 1, r.source_file, r.content))
                    .collect::<Vec<_>>()
                    .join("\n")
            };
            format!("=== Taxonomy: {} ===\n{}\n", output.taxonomy, body)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Decision;

    fn branch_with_history() -> BranchState {
        let mut branch = BranchState::new("Group relief", "Can losses be surrendered?", "");
        branch.begin_attempt();
        branch.record_search(
            "group relief losses",
            Some("source_file eq 'ctm.pdf'".into()),
            vec![SearchResult::new("c1", "Losses may be surrendered.", "ctm.pdf", 0.9)],
        );
        branch
    }

    #[test]
    fn test_format_search_results() {
        let branch = branch_with_history();
        let text = format_search_results(&branch.current_results);
        assert!(text.starts_with("Result #0\nID: c1\nSource File: ctm.pdf"));
        assert_eq!(format_search_results(&[]), "None");
    }

    #[test]
    fn test_format_search_history_pending_then_reviewed() {
        let mut branch = branch_with_history();
        assert!(format_search_history(&branch).contains("Review: Pending"));

        branch.apply_review(&[0], &[], "Directly relevant", Some(Decision::Finalize));
        let text = format_search_history(&branch);
        assert!(text.contains("<Attempt 1>"));
        assert!(text.contains("Filter: source_file eq 'ctm.pdf'"));
        assert!(text.contains("Review: Directly relevant"));
    }

    #[test]
    fn test_format_research_results() {
        let outputs = vec![
            TaxonomyResult::new(
                "A",
                vec![SearchResult::new("x1", "alpha", "a.pdf", 1.0)],
            ),
            TaxonomyResult::empty("B"),
        ];
        let text = format_research_results(&outputs);
        assert!(text.contains("=== Taxonomy: A ===\nResult 1 (a.pdf): alpha"));
        assert!(text.contains("=== Taxonomy: B ===\nNo relevant results found for this taxonomy."));
    }

    #[test]
    fn test_prompts_include_history_only_when_present() {
        assert!(!taxonomy_prompt("q", "  ", 5).contains("Conversation so far"));
        let prompt = taxonomy_prompt("q", "user: hi", 5);
        assert!(prompt.starts_with("Conversation so far:\nuser: hi"));
        assert!(prompt.contains("between 2 and 5"));
    }

    #[test]
    fn test_review_prompt_lists_current_and_vetted() {
        let branch = branch_with_history();
        let prompt = review_prompt(&branch);
        assert!(prompt.contains("Current Search Results:\nResult #0"));
        assert!(prompt.contains("Previously Vetted Results:\nNone"));
    }
}
