//! Per-backend outcomes and the unified result returned to callers.

use crate::error::{BackendError, BackendErrorKind};
use crate::types::{BackendId, TraceId};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

/// Column description reported by a backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    /// Backend-native type name (e.g. `INT8`, `FLOAT64`)
    pub data_type: String,
}

impl Column {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
        }
    }
}

/// Rows plus schema as returned by one backend. Opaque to the coordinator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultSet {
    pub columns: Vec<Column>,
    pub rows: Vec<Vec<Value>>,
}

impl ResultSet {
    pub fn new(columns: Vec<Column>, rows: Vec<Vec<Value>>) -> Self {
        Self { columns, rows }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Rows as column-name → value records.
    pub fn records(&self) -> Vec<Map<String, Value>> {
        self.rows
            .iter()
            .map(|row| {
                self.columns
                    .iter()
                    .zip(row.iter())
                    .map(|(column, value)| (column.name.clone(), value.clone()))
                    .collect()
            })
            .collect()
    }

    /// Rough in-memory size of the row data, used for byte caps.
    pub fn approximate_bytes(&self) -> usize {
        self.rows.iter().map(|row| approximate_row_bytes(row)).sum()
    }
}

/// Rough in-memory size of one decoded row, on the same scale as
/// [`ResultSet::approximate_bytes`].
pub fn approximate_row_bytes(row: &[Value]) -> usize {
    row.iter().map(approximate_value_bytes).sum()
}

fn approximate_value_bytes(value: &Value) -> usize {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 8,
        Value::String(s) => s.len(),
        Value::Array(items) => items.iter().map(approximate_value_bytes).sum(),
        Value::Object(map) => map
            .iter()
            .map(|(key, item)| key.len() + approximate_value_bytes(item))
            .sum(),
    }
}

/// Status of one backend's execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Success,
    Failure,
    Timeout,
}

impl OutcomeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OutcomeStatus::Success => "success",
            OutcomeStatus::Failure => "failure",
            OutcomeStatus::Timeout => "timeout",
        }
    }
}

/// Result or error of executing the plan against one backend. Immutable.
#[derive(Debug, Clone, Serialize)]
pub struct BackendOutcome {
    backend: BackendId,
    engine: String,
    query: String,
    status: OutcomeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    payload: Option<ResultSet>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<BackendError>,
    latency_ms: u64,
    row_count: usize,
    retries: u32,
}

impl BackendOutcome {
    /// Build an outcome from a finished execution.
    ///
    /// Timeouts reported by the adapter itself map to [`OutcomeStatus::Timeout`],
    /// every other error to [`OutcomeStatus::Failure`].
    pub fn from_result(
        backend: BackendId,
        engine: impl Into<String>,
        query: impl Into<String>,
        result: Result<ResultSet, BackendError>,
        latency: Duration,
        retries: u32,
    ) -> Self {
        let latency_ms = latency.as_millis() as u64;
        let (status, payload, error, row_count) = match result {
            Ok(result_set) => {
                let rows = result_set.row_count();
                (OutcomeStatus::Success, Some(result_set), None, rows)
            }
            Err(err) => {
                let status = if err.kind == BackendErrorKind::ExecutionTimeout {
                    OutcomeStatus::Timeout
                } else {
                    OutcomeStatus::Failure
                };
                (status, None, Some(err), 0)
            }
        };
        Self {
            backend,
            engine: engine.into(),
            query: query.into(),
            status,
            payload,
            error,
            latency_ms,
            row_count,
            retries,
        }
    }

    pub fn backend(&self) -> &BackendId {
        &self.backend
    }

    /// Engine label of the adapter that ran the query (e.g. `postgres`, `bigquery`)
    pub fn engine(&self) -> &str {
        &self.engine
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn status(&self) -> OutcomeStatus {
        self.status
    }

    pub fn is_success(&self) -> bool {
        self.status == OutcomeStatus::Success
    }

    pub fn payload(&self) -> Option<&ResultSet> {
        self.payload.as_ref()
    }

    pub fn error(&self) -> Option<&BackendError> {
        self.error.as_ref()
    }

    pub fn error_kind(&self) -> Option<BackendErrorKind> {
        self.error.as_ref().map(|err| err.kind)
    }

    pub fn latency(&self) -> Duration {
        Duration::from_millis(self.latency_ms)
    }

    pub fn row_count(&self) -> usize {
        self.row_count
    }

    /// Retries performed after the first attempt
    pub fn retries(&self) -> u32 {
        self.retries
    }
}

/// Overall status of a request across all planned backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallStatus {
    /// Every backend succeeded
    Success,
    /// At least one backend succeeded and at least one did not
    Partial,
    /// No backend succeeded
    Failure,
}

impl OverallStatus {
    /// Fold per-backend statuses. An empty set carries no usable data and folds to `Failure`.
    pub fn from_statuses<I>(statuses: I) -> Self
    where
        I: IntoIterator<Item = OutcomeStatus>,
    {
        let (mut succeeded, mut failed) = (0usize, 0usize);
        for status in statuses {
            match status {
                OutcomeStatus::Success => succeeded += 1,
                OutcomeStatus::Failure | OutcomeStatus::Timeout => failed += 1,
            }
        }
        match (succeeded, failed) {
            (0, _) => OverallStatus::Failure,
            (_, 0) => OverallStatus::Success,
            _ => OverallStatus::Partial,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OverallStatus::Success => "success",
            OverallStatus::Partial => "partial",
            OverallStatus::Failure => "failure",
        }
    }
}

/// Aggregated, ordered, status-tagged response for one request
#[derive(Debug, Clone, Serialize)]
pub struct UnifiedResult {
    trace_id: TraceId,
    status: OverallStatus,
    outcomes: Vec<BackendOutcome>,
    total_latency_ms: u64,
}

impl UnifiedResult {
    /// Fold outcomes (already in plan order) into a unified result.
    pub fn fold(trace_id: TraceId, outcomes: Vec<BackendOutcome>, total_latency: Duration) -> Self {
        let status = OverallStatus::from_statuses(outcomes.iter().map(|o| o.status()));
        Self {
            trace_id,
            status,
            outcomes,
            total_latency_ms: total_latency.as_millis() as u64,
        }
    }

    pub fn trace_id(&self) -> &TraceId {
        &self.trace_id
    }

    pub fn status(&self) -> OverallStatus {
        self.status
    }

    /// Outcomes in plan order
    pub fn outcomes(&self) -> &[BackendOutcome] {
        &self.outcomes
    }

    pub fn outcome(&self, backend: &BackendId) -> Option<&BackendOutcome> {
        self.outcomes.iter().find(|o| o.backend() == backend)
    }

    pub fn total_latency(&self) -> Duration {
        Duration::from_millis(self.total_latency_ms)
    }

    /// Whether at least one backend produced data
    pub fn is_usable(&self) -> bool {
        self.status != OverallStatus::Failure
    }

    pub fn into_outcomes(self) -> Vec<BackendOutcome> {
        self.outcomes
    }
}
