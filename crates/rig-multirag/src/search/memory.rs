//! In-memory keyword search backend
//!
//! Scores documents by the share of query terms they contain. Useful for
//! local runs against a small JSON corpus and for tests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tracing::debug;

use super::{SearchBackend, SearchRequest};
use crate::error::SearchError;
use crate::state::SearchResult;

/// A chunk of the corpus
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorpusDocument {
    pub id: String,
    pub content: String,
    pub source_file: String,
}

impl CorpusDocument {
    pub fn new(
        id: impl Into<String>,
        content: impl Into<String>,
        source_file: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            source_file: source_file.into(),
        }
    }
}

/// Keyword search over documents held in memory
#[derive(Debug, Clone, Default)]
pub struct InMemorySearchBackend {
    documents: Vec<CorpusDocument>,
}

/// One `field eq 'value'` clause
#[derive(Debug, Clone, PartialEq, Eq)]
struct Clause {
    field: String,
    value: String,
}

impl InMemorySearchBackend {
    pub fn new(documents: Vec<CorpusDocument>) -> Self {
        Self { documents }
    }

    /// Load a JSON array of [`CorpusDocument`]s
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, SearchError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| SearchError::backend(format!("cannot read {}: {}", path.display(), e)))?;
        let documents: Vec<CorpusDocument> = serde_json::from_str(&raw)
            .map_err(|e| SearchError::ParseError(format!("{}: {}", path.display(), e)))?;
        debug!(path = %path.display(), documents = documents.len(), "Loaded corpus");
        Ok(Self::new(documents))
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    fn matches(doc: &CorpusDocument, clauses: &[Clause]) -> bool {
        clauses.iter().all(|clause| match clause.field.as_str() {
            "source_file" => doc.source_file == clause.value,
            "id" => doc.id == clause.value,
            _ => false,
        })
    }
}

/// Parse `field eq 'value' [and field eq 'value' ...]`
///
/// Values are OData string literals (`''` escapes a quote); bare values are
/// read up to the next space or parenthesis.
fn parse_filter(filter: &str) -> Result<Vec<Clause>, SearchError> {
    let unsupported = || SearchError::BadRequest(format!("unsupported filter: {filter}"));
    let mut clauses = Vec::new();
    let mut rest = filter;

    loop {
        rest = rest.trim_start().trim_start_matches('(').trim_start();
        let (field, after) = rest.split_once(" eq ").ok_or_else(unsupported)?;
        let field = field.trim();
        if field != "source_file" && field != "id" {
            return Err(SearchError::BadRequest(format!("unknown filter field: {field}")));
        }

        let (value, remainder) = parse_value(after.trim_start()).ok_or_else(unsupported)?;
        clauses.push(Clause {
            field: field.to_string(),
            value,
        });

        let remainder = remainder.trim_start().trim_start_matches(')').trim_start();
        if remainder.is_empty() {
            return Ok(clauses);
        }
        rest = match remainder.get(..4) {
            Some(keyword) if keyword.eq_ignore_ascii_case("and ") => &remainder[4..],
            _ => return Err(unsupported()),
        };
    }
}

/// Leading value of `text` and whatever follows it
fn parse_value(text: &str) -> Option<(String, &str)> {
    let Some(body) = text.strip_prefix('\'') else {
        let end = text
            .find(|c: char| c.is_whitespace() || c == ')')
            .unwrap_or(text.len());
        return (end > 0).then(|| (text[..end].to_string(), &text[end..]));
    };

    let mut value = String::new();
    let mut chars = body.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if c != '\'' {
            value.push(c);
        } else if matches!(chars.peek(), Some((_, '\''))) {
            chars.next();
            value.push('\'');
        } else {
            return Some((value, &body[i + 1..]));
        }
    }
    None
}

fn terms(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 1)
        .map(str::to_lowercase)
        .collect()
}

#[async_trait]
impl SearchBackend for InMemorySearchBackend {
    async fn search(&self, request: &SearchRequest) -> Result<Vec<SearchResult>, SearchError> {
        let clauses = match &request.filter {
            Some(filter) => parse_filter(filter)?,
            None => Vec::new(),
        };

        let query_terms = terms(&request.query);
        if query_terms.is_empty() {
            return Ok(Vec::new());
        }

        let mut scored: Vec<SearchResult> = self
            .documents
            .iter()
            .filter(|doc| !request.exclude_ids.contains(&doc.id))
            .filter(|doc| Self::matches(doc, &clauses))
            .filter_map(|doc| {
                let doc_terms = terms(&doc.content);
                let hits = query_terms.intersection(&doc_terms).count();
                (hits > 0).then(|| {
                    SearchResult::new(
                        doc.id.clone(),
                        doc.content.clone(),
                        doc.source_file.clone(),
                        hits as f64 / query_terms.len() as f64,
                    )
                })
            })
            .collect();

        scored.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
        scored.truncate(request.top_k);
        Ok(scored)
    }

    fn name(&self) -> &str {
        "memory"
    }
}
