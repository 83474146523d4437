//! Structured outputs
//!
//! Each typed response the workflow asks for implements [`StructuredOutput`],
//! which supplies the JSON schema sent with the request. Responses are parsed
//! leniently: code fences and prose around the JSON object are tolerated.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::provider::{CompletionProvider, CompletionRequest, OutputSchema};
use crate::error::{CompletionError, MalformedOutputError};
use crate::state::Decision;

/// A response type with a JSON schema
pub trait StructuredOutput: DeserializeOwned + Send {
    const NAME: &'static str;

    fn schema() -> Value;

    fn output_schema() -> OutputSchema {
        OutputSchema {
            name: Self::NAME,
            schema: Self::schema(),
        }
    }
}

/// Taxonomies identified for a question
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaxonomyExtraction {
    pub taxonomies: Vec<String>,
    #[serde(default)]
    pub reasoning: String,
}

impl StructuredOutput for TaxonomyExtraction {
    const NAME: &'static str = "TaxonomyExtraction";

    fn schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "taxonomies": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Research sub-topics the question refers to"
                },
                "reasoning": { "type": "string" }
            },
            "required": ["taxonomies", "reasoning"]
        })
    }
}

/// Search query for one research attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchQueryPlan {
    pub search_query: String,
    #[serde(default)]
    pub filter: Option<String>,
}

impl SearchQueryPlan {
    /// Filter expression, treating blank strings as no filter
    pub fn effective_filter(&self) -> Option<String> {
        self.filter
            .as_deref()
            .map(str::trim)
            .filter(|f| !f.is_empty() && !f.eq_ignore_ascii_case("none"))
            .map(str::to_string)
    }
}

impl StructuredOutput for SearchQueryPlan {
    const NAME: &'static str = "SearchQueryPlan";

    fn schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "search_query": { "type": "string" },
                "filter": {
                    "type": ["string", "null"],
                    "description": "Optional filter expression over document fields"
                }
            },
            "required": ["search_query"]
        })
    }
}

/// Review of one batch of search results
///
/// Deserialization never fails on a bad field: indices that are not integers
/// and unknown decisions are dropped and kept in `malformed` for logging.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawReviewDecision")]
pub struct ReviewDecision {
    pub thought_process: String,
    /// Indices of relevant results
    pub valid_results: Vec<i64>,
    /// Indices of irrelevant results
    pub invalid_results: Vec<i64>,
    pub decision: Option<Decision>,
    #[serde(skip)]
    pub malformed: Vec<MalformedOutputError>,
}

#[derive(Deserialize)]
struct RawReviewDecision {
    #[serde(default)]
    thought_process: Value,
    #[serde(default)]
    valid_results: Value,
    #[serde(default)]
    invalid_results: Value,
    #[serde(default)]
    decision: Value,
}

impl From<RawReviewDecision> for ReviewDecision {
    fn from(raw: RawReviewDecision) -> Self {
        let mut malformed = Vec::new();
        let valid_results = lenient_indices(raw.valid_results, &mut malformed);
        let invalid_results = lenient_indices(raw.invalid_results, &mut malformed);
        let decision = lenient_decision(raw.decision, &mut malformed);
        let thought_process = match raw.thought_process {
            Value::String(text) => text,
            Value::Null => String::new(),
            other => other.to_string(),
        };

        Self {
            thought_process,
            valid_results,
            invalid_results,
            decision,
            malformed,
        }
    }
}

/// Integers, integral floats and numeric strings; a bare scalar counts as a list of one
fn lenient_indices(value: Value, malformed: &mut Vec<MalformedOutputError>) -> Vec<i64> {
    let items = match value {
        Value::Null => return Vec::new(),
        Value::Array(items) => items,
        single => vec![single],
    };

    items
        .into_iter()
        .filter_map(|item| {
            let index = match &item {
                Value::Number(n) => n
                    .as_i64()
                    .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
                Value::String(text) => text.trim().parse().ok(),
                _ => None,
            };
            if index.is_none() {
                malformed.push(MalformedOutputError::InvalidIndex(item.to_string()));
            }
            index
        })
        .collect()
}

fn lenient_decision(value: Value, malformed: &mut Vec<MalformedOutputError>) -> Option<Decision> {
    let text = match value {
        Value::Null => return None,
        Value::String(text) => text,
        other => other.to_string(),
    };
    match text.trim().to_lowercase().as_str() {
        "retry" => Some(Decision::Retry),
        "finalize" | "finalise" => Some(Decision::Finalize),
        _ => {
            malformed.push(MalformedOutputError::UnknownDecision(text));
            None
        }
    }
}

impl StructuredOutput for ReviewDecision {
    const NAME: &'static str = "ReviewDecision";

    fn schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "thought_process": { "type": "string" },
                "valid_results": { "type": "array", "items": { "type": "integer" } },
                "invalid_results": { "type": "array", "items": { "type": "integer" } },
                "decision": { "type": "string", "enum": ["retry", "finalize"] }
            },
            "required": ["thought_process", "valid_results", "invalid_results", "decision"]
        })
    }
}

/// Call the provider and parse its answer as `T`
pub async fn complete_structured<T: StructuredOutput>(
    provider: &dyn CompletionProvider,
    system_prompt: impl Into<String>,
    user_prompt: impl Into<String>,
) -> Result<T, CompletionError> {
    let request = CompletionRequest::new(system_prompt, user_prompt).with_schema(T::output_schema());
    let text = provider.complete(&request).await?;
    parse_structured(&text)
}

/// Parse a structured response, tolerating code fences and surrounding prose
pub fn parse_structured<T: StructuredOutput>(text: &str) -> Result<T, CompletionError> {
    let candidate = extract_json_object(text).ok_or_else(|| {
        CompletionError::malformed(format!("{}: no JSON object in response", T::NAME))
    })?;
    serde_json::from_str(candidate)
        .map_err(|e| CompletionError::malformed(format!("{}: {}", T::NAME, e)))
}

fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (start < end).then(|| &text[start..=end])
}
