//! Core request types shared across the agent.

use crate::error::AgentError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Identifier of a registered backend (e.g. `relational`, `warehouse`)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BackendId(String);

impl BackendId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BackendId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for BackendId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for BackendId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Correlates every span and the unified result of one request
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TraceId(String);

impl TraceId {
    /// Generate a fresh random trace id.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Per-request overrides of the agent's default execution policy
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionOptions {
    /// Per-backend wall-clock budget, including retries
    pub timeout: Option<Duration>,
    /// Retries allowed after a connection failure
    pub max_retries: Option<u32>,
    /// Row cap per backend result
    pub max_rows: Option<usize>,
    /// Approximate byte cap per backend result
    pub max_bytes: Option<usize>,
}

impl ExecutionOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn with_max_rows(mut self, max_rows: usize) -> Self {
        self.max_rows = Some(max_rows);
        self
    }

    pub fn with_max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = Some(max_bytes);
        self
    }
}

/// One logical query as submitted by a caller. Immutable once built.
#[derive(Debug, Clone)]
pub struct QueryRequest {
    text: String,
    targets: Option<Vec<BackendId>>,
    options: ExecutionOptions,
}

impl QueryRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            targets: None,
            options: ExecutionOptions::default(),
        }
    }

    /// Restrict execution to the given backends. The set must not be empty.
    pub fn with_targets<I, B>(mut self, targets: I) -> Result<Self, AgentError>
    where
        I: IntoIterator<Item = B>,
        B: Into<BackendId>,
    {
        let mut collected: Vec<BackendId> = Vec::new();
        for target in targets {
            let target = target.into();
            if !collected.contains(&target) {
                collected.push(target);
            }
        }
        if collected.is_empty() {
            return Err(AgentError::InvalidRequest(
                "target backend set must not be empty".to_string(),
            ));
        }
        self.targets = Some(collected);
        Ok(self)
    }

    pub fn with_options(mut self, options: ExecutionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Explicit target set, in the order the caller gave it
    pub fn targets(&self) -> Option<&[BackendId]> {
        self.targets.as_deref()
    }

    pub fn options(&self) -> &ExecutionOptions {
        &self.options
    }

    /// Whether the request allows execution on `backend`.
    pub fn allows(&self, backend: &BackendId) -> bool {
        self.targets
            .as_ref()
            .map_or(true, |targets| targets.contains(backend))
    }
}
