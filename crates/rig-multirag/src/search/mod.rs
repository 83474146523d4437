//! Search collaborators
//!
//! A [`SearchBackend`] returns scored document chunks for a query, never
//! returning ids from the caller's exclusion set.

pub mod azure;
pub mod memory;

use async_trait::async_trait;
use std::collections::HashSet;

use crate::error::SearchError;
use crate::state::SearchResult;

pub use azure::AzureSearchBackend;
pub use memory::{CorpusDocument, InMemorySearchBackend};

/// One search call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    pub query: String,
    /// Ids the backend must not return
    pub exclude_ids: HashSet<String>,
    /// Optional structured filter expression
    pub filter: Option<String>,
    /// Maximum number of results
    pub top_k: usize,
    /// Neighbours considered by the vector part of a hybrid search
    pub k_nearest_neighbors: usize,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>, top_k: usize) -> Self {
        Self {
            query: query.into(),
            exclude_ids: HashSet::new(),
            filter: None,
            top_k,
            k_nearest_neighbors: top_k,
        }
    }

    pub fn with_exclude_ids(mut self, ids: HashSet<String>) -> Self {
        self.exclude_ids = ids;
        self
    }

    pub fn with_filter(mut self, filter: Option<String>) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_k_nearest_neighbors(mut self, k: usize) -> Self {
        self.k_nearest_neighbors = k;
        self
    }
}

/// Document search collaborator
#[async_trait]
pub trait SearchBackend: Send + Sync {
    async fn search(&self, request: &SearchRequest) -> Result<Vec<SearchResult>, SearchError>;

    /// Backend name for logging
    fn name(&self) -> &str;
}
