//! Scripted collaborators shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rig_multirag::{
    CompletionError, CompletionProvider, CompletionRequest, Orchestrator, SearchBackend,
    SearchError, SearchRequest, SearchResult, WorkflowConfig,
};

/// Taxonomy named on the `Taxonomy: X` line of a branch prompt
pub fn prompt_taxonomy(prompt: &str) -> Option<String> {
    prompt
        .lines()
        .find_map(|line| line.strip_prefix("Taxonomy: "))
        .map(|t| t.trim().to_string())
}

/// Completion collaborator answering by requested schema
pub struct ScriptedCompletion {
    taxonomies: Vec<String>,
    decision: &'static str,
    fail_synthesis: bool,
    query_calls: Mutex<HashMap<String, usize>>,
    review_calls: AtomicUsize,
}

impl ScriptedCompletion {
    pub fn new(taxonomies: &[&str]) -> Self {
        Self {
            taxonomies: taxonomies.iter().map(|t| t.to_string()).collect(),
            decision: "finalize",
            fail_synthesis: false,
            query_calls: Mutex::new(HashMap::new()),
            review_calls: AtomicUsize::new(0),
        }
    }

    /// Reviewer always asks to retry
    pub fn always_retry(mut self) -> Self {
        self.decision = "retry";
        self
    }

    pub fn failing_synthesis(mut self) -> Self {
        self.fail_synthesis = true;
        self
    }

    /// GenerateQuery calls issued for a taxonomy
    pub fn query_calls(&self, taxonomy: &str) -> usize {
        self.query_calls
            .lock()
            .unwrap()
            .get(taxonomy)
            .copied()
            .unwrap_or(0)
    }

    pub fn review_calls(&self) -> usize {
        self.review_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompletionProvider for ScriptedCompletion {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, CompletionError> {
        match request.output_schema.as_ref().map(|s| s.name) {
            Some("TaxonomyExtraction") => Ok(serde_json::json!({
                "taxonomies": self.taxonomies,
                "reasoning": "scripted split",
            })
            .to_string()),
            Some("SearchQueryPlan") => {
                let taxonomy = prompt_taxonomy(&request.user_prompt).unwrap_or_default();
                let attempt = {
                    let mut calls = self.query_calls.lock().unwrap();
                    let count = calls.entry(taxonomy.clone()).or_insert(0);
                    *count += 1;
                    *count
                };
                Ok(serde_json::json!({
                    "search_query": format!("{taxonomy}|{attempt}"),
                    "filter": null,
                })
                .to_string())
            }
            Some("ReviewDecision") => {
                self.review_calls.fetch_add(1, Ordering::SeqCst);
                Ok(serde_json::json!({
                    "thought_process": "first hit is relevant",
                    "valid_results": [0],
                    "invalid_results": [1],
                    "decision": self.decision,
                })
                .to_string())
            }
            Some(other) => Err(CompletionError::malformed(format!("unexpected schema {other}"))),
            None if self.fail_synthesis => Err(CompletionError::Quota("tokens exhausted".into())),
            None => Ok("Synthesized answer.".to_string()),
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// What the search collaborator does for a taxonomy
#[derive(Debug, Clone, Copy)]
pub enum SearchBehavior {
    /// Return this many fresh results per call
    Results(usize),
    /// Return the same single result on every call
    Fixed(&'static str),
    Fail,
    /// Never answer
    Hang,
}

/// Search collaborator keyed by the taxonomy encoded in the query
pub struct ScriptedSearch {
    behaviors: HashMap<String, SearchBehavior>,
    calls: AtomicUsize,
}

impl ScriptedSearch {
    pub fn new(behaviors: &[(&str, SearchBehavior)]) -> Self {
        Self {
            behaviors: behaviors
                .iter()
                .map(|(t, b)| (t.to_string(), *b))
                .collect(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SearchBackend for ScriptedSearch {
    async fn search(&self, request: &SearchRequest) -> Result<Vec<SearchResult>, SearchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let (taxonomy, attempt) = request
            .query
            .split_once('|')
            .unwrap_or((request.query.as_str(), "0"));

        match self
            .behaviors
            .get(taxonomy)
            .copied()
            .unwrap_or(SearchBehavior::Results(2))
        {
            SearchBehavior::Results(n) => Ok((0..n)
                .map(|i| format!("{taxonomy}-{attempt}-{i}"))
                .filter(|id| !request.exclude_ids.contains(id))
                .map(|id| SearchResult::new(id, format!("evidence for {taxonomy}"), "corpus.pdf", 0.75))
                .collect()),
            SearchBehavior::Fixed(id) => Ok(if request.exclude_ids.contains(id) {
                Vec::new()
            } else {
                vec![SearchResult::new(id, "shared evidence", "corpus.pdf", 0.9)]
            }),
            SearchBehavior::Fail => Err(SearchError::ServerError(503, "index offline".into())),
            SearchBehavior::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(Vec::new())
            }
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

pub fn orchestrator(
    completion: Arc<ScriptedCompletion>,
    search: Arc<ScriptedSearch>,
    config: WorkflowConfig,
) -> Arc<Orchestrator> {
    Arc::new(Orchestrator::new(completion, search, config).expect("valid config"))
}
