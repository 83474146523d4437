//! Append-only accumulator for branch outputs
//!
//! Branches merge their [`TaxonomyResult`] the moment they finish, in whatever
//! order they finish. Each append happens under one lock acquisition, so a
//! result is never interleaved with another branch's.

use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

use crate::state::{TaxonomyResult, ThoughtEntry};

/// A second result for a taxonomy that already merged
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Taxonomy {0:?} already merged")]
pub struct DuplicateTaxonomy(pub String);

#[derive(Debug, Default)]
struct Entries {
    outputs: Vec<TaxonomyResult>,
    notes: Vec<ThoughtEntry>,
    merged: HashSet<String>,
}

/// Shared, append-only collection of [`TaxonomyResult`]s for one fan-out
///
/// Clones share the same storage.
#[derive(Debug, Clone, Default)]
pub struct OutputAccumulator {
    entries: Arc<Mutex<Entries>>,
}

impl OutputAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a branch result
    pub async fn append(&self, result: TaxonomyResult) -> Result<usize, DuplicateTaxonomy> {
        self.append_with_notes(result, Vec::new()).await
    }

    /// Append a branch result together with its audit entries, atomically
    pub async fn append_with_notes(
        &self,
        result: TaxonomyResult,
        notes: Vec<ThoughtEntry>,
    ) -> Result<usize, DuplicateTaxonomy> {
        let mut entries = self.entries.lock().await;
        if !entries.merged.insert(result.taxonomy.clone()) {
            return Err(DuplicateTaxonomy(result.taxonomy));
        }
        debug!(
            taxonomy = %result.taxonomy,
            vetted = result.vetted_results.len(),
            "Merged branch output"
        );
        entries.outputs.push(result);
        entries.notes.extend(notes);
        Ok(entries.outputs.len())
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.outputs.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn contains(&self, taxonomy: &str) -> bool {
        self.entries.lock().await.merged.contains(taxonomy)
    }

    /// Copy of everything merged so far, in merge order
    pub async fn snapshot(&self) -> (Vec<TaxonomyResult>, Vec<ThoughtEntry>) {
        let entries = self.entries.lock().await;
        (entries.outputs.clone(), entries.notes.clone())
    }
}
