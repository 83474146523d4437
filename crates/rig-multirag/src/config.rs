//! Workflow configuration
//!
//! Bounds and breadth parameters for a run: research attempts per taxonomy,
//! search breadth, fan-out limits, and progress channel sizing.

use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

/// Configuration consumed by the orchestrator and research branches
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Generate/search/review cycles allowed per taxonomy
    pub max_attempts: usize,

    /// Results requested from the search backend per query
    pub num_search_results: usize,

    /// Nearest neighbours considered by vector search
    pub k_nearest_neighbors: usize,

    /// Upper bound on taxonomies researched; extra labels are dropped
    pub max_taxonomies: usize,

    /// Branches allowed to run at once (0 = unbounded)
    pub branch_concurrency: usize,

    /// Capacity of the per-run progress channel
    pub event_capacity: usize,

    /// How long a progress send may wait on a full channel
    #[serde(with = "humantime_serde")]
    pub event_send_timeout: Duration,

    /// Deadline for the whole run
    #[serde(default, with = "humantime_serde")]
    pub workflow_timeout: Option<Duration>,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            num_search_results: 5,
            k_nearest_neighbors: 50,
            max_taxonomies: 5,
            branch_concurrency: 8,
            event_capacity: 256,
            event_send_timeout: Duration::from_secs(30),
            workflow_timeout: None,
        }
    }
}

impl WorkflowConfig {
    /// Create a new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by `MAX_ATTEMPTS`, `NUM_SEARCH_RESULTS`,
    /// `K_NEAREST_NEIGHBORS`, `MAX_TAXONOMIES`, `BRANCH_CONCURRENCY`
    /// and `WORKFLOW_TIMEOUT_SECS`
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(v) = parse_var("MAX_ATTEMPTS", "max_attempts")? {
            config.max_attempts = v;
        }
        if let Some(v) = parse_var("NUM_SEARCH_RESULTS", "num_search_results")? {
            config.num_search_results = v;
        }
        if let Some(v) = parse_var("K_NEAREST_NEIGHBORS", "k_nearest_neighbors")? {
            config.k_nearest_neighbors = v;
        }
        if let Some(v) = parse_var("MAX_TAXONOMIES", "max_taxonomies")? {
            config.max_taxonomies = v;
        }
        if let Some(v) = parse_var("BRANCH_CONCURRENCY", "branch_concurrency")? {
            config.branch_concurrency = v;
        }
        if let Some(secs) = parse_var::<u64>("WORKFLOW_TIMEOUT_SECS", "workflow_timeout")? {
            config.workflow_timeout = Some(Duration::from_secs(secs));
        }

        config.validate()?;
        Ok(config)
    }

    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_num_search_results(mut self, n: usize) -> Self {
        self.num_search_results = n;
        self
    }

    pub fn with_k_nearest_neighbors(mut self, k: usize) -> Self {
        self.k_nearest_neighbors = k;
        self
    }

    pub fn with_max_taxonomies(mut self, max: usize) -> Self {
        self.max_taxonomies = max;
        self
    }

    pub fn with_branch_concurrency(mut self, limit: usize) -> Self {
        self.branch_concurrency = limit;
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    pub fn with_event_send_timeout(mut self, timeout: Duration) -> Self {
        self.event_send_timeout = timeout;
        self
    }

    /// Set workflow timeout
    pub fn with_workflow_timeout(mut self, timeout: Duration) -> Self {
        self.workflow_timeout = Some(timeout);
        self
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::new("max_attempts", "must be at least 1"));
        }
        if self.num_search_results == 0 {
            return Err(ConfigError::new("num_search_results", "must be at least 1"));
        }
        if self.k_nearest_neighbors < self.num_search_results {
            return Err(ConfigError::new(
                "k_nearest_neighbors",
                format!(
                    "must be at least num_search_results ({})",
                    self.num_search_results
                ),
            ));
        }
        if self.max_taxonomies == 0 {
            return Err(ConfigError::new("max_taxonomies", "must be at least 1"));
        }
        if self.event_capacity == 0 {
            return Err(ConfigError::new("event_capacity", "must be at least 1"));
        }
        if self.workflow_timeout == Some(Duration::ZERO) {
            return Err(ConfigError::new("workflow_timeout", "must be positive"));
        }
        Ok(())
    }
}

fn parse_var<T: FromStr>(name: &str, field: &'static str) -> Result<Option<T>, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::new(field, format!("{name}={raw:?} is not a valid number"))),
        Err(_) => Ok(None),
    }
}
