//! Event schema for telemetry emitted to sinks.

use crate::error::BackendErrorKind;
use crate::telemetry::metrics::MetricsSnapshot;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Format a timestamp as RFC 3339 with millisecond precision.
pub fn rfc3339_millis(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// One finished span of work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanRecord {
    pub name: String,
    pub trace_id: String,
    pub service: String,
    pub service_version: String,
    pub environment: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,
    pub started_at: String,
    pub ended_at: String,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<BackendErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempt: Option<u32>,
}

/// Anything a sink may receive
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum TelemetryEvent {
    Span(SpanRecord),
    Metrics(MetricsSnapshot),
}

impl TelemetryEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            TelemetryEvent::Span(_) => "span",
            TelemetryEvent::Metrics(_) => "metrics",
        }
    }

    pub fn as_span(&self) -> Option<&SpanRecord> {
        match self {
            TelemetryEvent::Span(span) => Some(span),
            TelemetryEvent::Metrics(_) => None,
        }
    }
}
