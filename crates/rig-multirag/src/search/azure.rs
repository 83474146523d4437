//! Azure AI Search backend
//!
//! Hybrid (keyword + vector) search against an Azure AI Search index over REST.
//!
//! # Production Features
//!
//! - Exclusion of already-processed chunk ids through the OData filter
//! - Integrated vectorization (`text` vector query on `content_vector`)
//! - HTTP timeout and retry with exponential backoff for transient failures

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use super::{SearchBackend, SearchRequest};
use crate::error::SearchError;
use crate::state::SearchResult;

/// Default timeout for search requests
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Retries for transient failures
const MAX_RETRIES: u32 = 2;

/// Base delay for exponential backoff (milliseconds)
const RETRY_BASE_DELAY_MS: u64 = 500;

/// REST API version
const API_VERSION: &str = "2024-07-01";

/// Fields returned for every hit
const SELECT_FIELDS: &str = "id,content,source_file";

/// Vector field holding chunk embeddings
const VECTOR_FIELD: &str = "content_vector";

/// Azure AI Search client for one index
pub struct AzureSearchBackend {
    endpoint: String,
    index: String,
    api_key: String,
    client: Client,
    timeout: Duration,
    max_retries: u32,
}

impl AzureSearchBackend {
    pub fn new(
        endpoint: impl Into<String>,
        index: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            index: index.into(),
            api_key: api_key.into(),
            client: Client::new(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_retries: MAX_RETRIES,
        }
    }

    /// Create from AZURE_SEARCH_ENDPOINT, AZURE_SEARCH_INDEX and AZURE_SEARCH_API_KEY
    pub fn from_env() -> Result<Self, SearchError> {
        let var = |name: &str| {
            std::env::var(name)
                .map_err(|_| SearchError::backend(format!("{name} environment variable not set")))
        };
        Ok(Self::new(
            var("AZURE_SEARCH_ENDPOINT")?,
            var("AZURE_SEARCH_INDEX")?,
            var("AZURE_SEARCH_API_KEY")?,
        ))
    }

    /// Set custom timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set custom max retries
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    fn url(&self) -> String {
        format!(
            "{}/indexes/{}/docs/search?api-version={}",
            self.endpoint, self.index, API_VERSION
        )
    }

    /// Execute HTTP request with retry and backoff
    async fn execute_with_retry(&self, body: &AzureSearchBody) -> Result<AzureSearchResponse, SearchError> {
        let mut last_error = SearchError::backend("No attempts made");

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_millis(RETRY_BASE_DELAY_MS * 2u64.pow(attempt - 1));
                debug!(attempt, delay_ms = delay.as_millis() as u64, "Retrying search request");
                tokio::time::sleep(delay).await;
            }

            match self.execute_single_request(body).await {
                Ok(response) => return Ok(response),
                Err(e) => {
                    if !e.is_retryable() {
                        return Err(e);
                    }
                    warn!(attempt, error = %e, "Search request failed, will retry");
                    last_error = e;
                }
            }
        }

        Err(last_error)
    }

    async fn execute_single_request(&self, body: &AzureSearchBody) -> Result<AzureSearchResponse, SearchError> {
        let response = self
            .client
            .post(self.url())
            .header("api-key", &self.api_key)
            .header("Content-Type", "application/json")
            .timeout(self.timeout)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SearchError::Timeout
                } else if e.is_connect() {
                    SearchError::Connection(e.to_string())
                } else {
                    SearchError::Network(e.to_string())
                }
            })?;

        let status = response.status();

        if status.is_success() {
            return response
                .json()
                .await
                .map_err(|e| SearchError::ParseError(e.to_string()));
        }

        let error_text = response.text().await.unwrap_or_default();

        match status.as_u16() {
            401 | 403 => Err(SearchError::Unauthorized),
            429 => Err(SearchError::RateLimited),
            400 => Err(SearchError::BadRequest(error_text)),
            500..=599 => Err(SearchError::ServerError(status.as_u16(), error_text)),
            _ => Err(SearchError::HttpError(status.as_u16(), error_text)),
        }
    }
}

/// OData filter excluding processed ids, combined with the caller's filter
pub fn build_filter(request: &SearchRequest) -> Option<String> {
    let mut parts = Vec::new();

    if !request.exclude_ids.is_empty() {
        let mut ids: Vec<&str> = request.exclude_ids.iter().map(String::as_str).collect();
        ids.sort_unstable();
        parts.push(exclusion_filter(&ids));
    }
    if let Some(filter) = request.filter.as_deref().filter(|f| !f.trim().is_empty()) {
        parts.push(format!("({})", filter.trim()));
    }

    (!parts.is_empty()).then(|| parts.join(" and "))
}

/// Delimiters tried for `search.in`, in order; `,` is the service default
const ID_DELIMITERS: [char; 5] = [',', '|', ';', '~', '^'];

/// Quote a value as an OData string literal
fn odata_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Filter clause rejecting every id in `ids`
///
/// Uses `search.in` with the first delimiter no id contains, and falls back
/// to explicit comparisons when every delimiter is taken.
fn exclusion_filter(ids: &[&str]) -> String {
    let delimiter = ID_DELIMITERS
        .iter()
        .find(|d| ids.iter().all(|id| !id.contains(**d)))
        .copied();

    match delimiter {
        Some(',') => format!("not search.in(id, {})", odata_literal(&ids.join(","))),
        Some(d) => {
            let d = d.to_string();
            format!(
                "not search.in(id, {}, {})",
                odata_literal(&ids.join(d.as_str())),
                odata_literal(&d)
            )
        }
        None => ids
            .iter()
            .map(|id| format!("id ne {}", odata_literal(id)))
            .collect::<Vec<_>>()
            .join(" and "),
    }
}

/// Request body for the search endpoint
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AzureSearchBody {
    search: String,
    top: usize,
    select: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    filter: Option<String>,
    vector_queries: Vec<VectorQuery>,
}

#[derive(Debug, Serialize)]
struct VectorQuery {
    kind: &'static str,
    text: String,
    k: usize,
    fields: &'static str,
}

impl AzureSearchBody {
    fn from_request(request: &SearchRequest) -> Self {
        Self {
            search: request.query.clone(),
            top: request.top_k,
            select: SELECT_FIELDS,
            filter: build_filter(request),
            vector_queries: vec![VectorQuery {
                kind: "text",
                text: request.query.clone(),
                k: request.k_nearest_neighbors,
                fields: VECTOR_FIELD,
            }],
        }
    }
}

#[derive(Debug, Deserialize)]
struct AzureSearchResponse {
    value: Vec<AzureSearchHit>,
}

#[derive(Debug, Deserialize)]
struct AzureSearchHit {
    id: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    source_file: String,
    #[serde(rename = "@search.score", default)]
    score: f64,
}

impl From<AzureSearchHit> for SearchResult {
    fn from(hit: AzureSearchHit) -> Self {
        SearchResult::new(hit.id, hit.content, hit.source_file, hit.score)
    }
}

#[async_trait]
impl SearchBackend for AzureSearchBackend {
    async fn search(&self, request: &SearchRequest) -> Result<Vec<SearchResult>, SearchError> {
        let body = AzureSearchBody::from_request(request);
        debug!(
            index = %self.index,
            query = %request.query,
            filter = ?body.filter,
            top = request.top_k,
            "Azure search"
        );

        let response = self.execute_with_retry(&body).await?;
        Ok(response
            .value
            .into_iter()
            .map(SearchResult::from)
            .filter(|r| !request.exclude_ids.contains(&r.id))
            .take(request.top_k)
            .collect())
    }

    fn name(&self) -> &str {
        "azure"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn ids(values: &[&str]) -> HashSet<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    fn sample_response() -> serde_json::Value {
        serde_json::json!({
            "value": [
                {
                    "@search.score": 0.03,
                    "id": "chunk-1",
                    "content": "Group relief allows losses to be surrendered.",
                    "source_file": "ctm.pdf"
                },
                {
                    "@search.score": 0.02,
                    "id": "chunk-2",
                    "content": "Consortium relief conditions.",
                    "source_file": "ctm.pdf"
                }
            ]
        })
    }

    fn backend(server: &MockServer) -> AzureSearchBackend {
        AzureSearchBackend::new(server.uri(), "tax-docs", "test-key").with_max_retries(1)
    }

    #[test]
    fn test_build_filter() {
        let request = SearchRequest::new("q", 5);
        assert_eq!(build_filter(&request), None);

        let request = SearchRequest::new("q", 5).with_exclude_ids(ids(&["b", "a"]));
        assert_eq!(build_filter(&request).as_deref(), Some("not search.in(id, 'a,b')"));

        let request = SearchRequest::new("q", 5)
            .with_exclude_ids(ids(&["a"]))
            .with_filter(Some("source_file eq 'x.pdf'".into()));
        assert_eq!(
            build_filter(&request).as_deref(),
            Some("not search.in(id, 'a') and (source_file eq 'x.pdf')")
        );

        let request = SearchRequest::new("q", 5).with_filter(Some("  ".into()));
        assert_eq!(build_filter(&request), None);
    }

    #[test]
    fn test_exclusion_filter_escapes_ids() {
        assert_eq!(exclusion_filter(&["o'neil", "b"]), "not search.in(id, 'o''neil,b')");
        assert_eq!(
            exclusion_filter(&["a,1", "b"]),
            "not search.in(id, 'a,1|b', '|')"
        );
        assert_eq!(
            exclusion_filter(&["a,|;~^", "b"]),
            "id ne 'a,|;~^' and id ne 'b'"
        );
    }

    #[test]
    fn test_body_serialization() {
        let request = SearchRequest::new("group relief", 5).with_k_nearest_neighbors(50);
        let body = serde_json::to_value(AzureSearchBody::from_request(&request)).unwrap();

        assert_eq!(body["search"], "group relief");
        assert_eq!(body["top"], 5);
        assert_eq!(body["select"], "id,content,source_file");
        assert!(body.get("filter").is_none());
        assert_eq!(body["vectorQueries"][0]["kind"], "text");
        assert_eq!(body["vectorQueries"][0]["k"], 50);
        assert_eq!(body["vectorQueries"][0]["fields"], "content_vector");
    }

    #[tokio::test]
    async fn test_http_successful_search() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/indexes/tax-docs/docs/search"))
            .and(query_param("api-version", API_VERSION))
            .and(header("api-key", "test-key"))
            .and(body_partial_json(serde_json::json!({
                "filter": "not search.in(id, 'chunk-0')"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(sample_response()))
            .mount(&mock_server)
            .await;

        let request = SearchRequest::new("group relief", 5).with_exclude_ids(ids(&["chunk-0"]));
        let results = backend(&mock_server).search(&request).await.unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].id, "chunk-1");
        assert_eq!(results[0].source_file, "ctm.pdf");
        assert!((results[0].score - 0.03).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_http_excluded_ids_dropped_even_if_returned() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(sample_response()))
            .mount(&mock_server)
            .await;

        let request = SearchRequest::new("q", 5).with_exclude_ids(ids(&["chunk-1"]));
        let results = backend(&mock_server).search(&request).await.unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "chunk-2");
    }

    #[tokio::test]
    async fn test_http_unauthorized_error() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403))
            .expect(1)
            .mount(&mock_server)
            .await;

        let err = backend(&mock_server)
            .search(&SearchRequest::new("q", 5))
            .await
            .unwrap_err();
        assert!(matches!(err, SearchError::Unauthorized));
    }

    #[tokio::test]
    async fn test_http_bad_request() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("Invalid expression"))
            .mount(&mock_server)
            .await;

        let err = backend(&mock_server)
            .search(&SearchRequest::new("q", 5))
            .await
            .unwrap_err();
        match err {
            SearchError::BadRequest(msg) => assert!(msg.contains("Invalid expression")),
            other => panic!("Wrong error type: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_http_retry_on_server_error() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
            .up_to_n_times(1)
            .mount(&mock_server)
            .await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(sample_response()))
            .mount(&mock_server)
            .await;

        let results = backend(&mock_server)
            .search(&SearchRequest::new("q", 5))
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
    }

    #[tokio::test]
    async fn test_http_server_error_exhausts_retries() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("down"))
            .expect(2)
            .mount(&mock_server)
            .await;

        let err = backend(&mock_server)
            .search(&SearchRequest::new("q", 5))
            .await
            .unwrap_err();
        assert!(matches!(err, SearchError::ServerError(500, _)));
    }

    #[tokio::test]
    async fn test_http_malformed_response() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&mock_server)
            .await;

        let err = backend(&mock_server)
            .search(&SearchRequest::new("q", 5))
            .await
            .unwrap_err();
        assert!(matches!(err, SearchError::ParseError(_)));
    }

    #[test]
    fn test_from_env_missing_variables() {
        std::env::remove_var("AZURE_SEARCH_ENDPOINT");
        let err = AzureSearchBackend::from_env().err().unwrap();
        assert!(err.to_string().contains("AZURE_SEARCH_ENDPOINT"));
    }
}
