//! Observability wrapper around the facade, coordinator stages and adapter calls.
//!
//! Every stage opens an [`ActiveSpan`]: a `tracing` span for log correlation plus a
//! [`SpanRecord`] delivered to the injected sink when the stage finishes. Sink
//! failures (errors or panics) are logged and dropped so instrumentation can never
//! change control flow or outcomes.

use crate::error::{BackendError, BackendErrorKind};
use crate::outcome::{BackendOutcome, ResultSet, UnifiedResult};
use crate::telemetry::events::{rfc3339_millis, SpanRecord, TelemetryEvent};
use crate::telemetry::metrics::AgentMetrics;
use crate::telemetry::sinks::TelemetrySink;
use crate::types::{BackendId, TraceId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;
use tracing::{field, info_span, warn, Span};

/// Service identity attached to every span
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_service_name")]
    pub name: String,

    #[serde(default = "default_service_version")]
    pub version: String,

    /// Deployment environment, e.g. development, staging, production
    #[serde(default = "default_environment")]
    pub environment: String,
}

fn default_service_name() -> String {
    "skyroute".to_string()
}

fn default_service_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

fn default_environment() -> String {
    "development".to_string()
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            version: default_service_version(),
            environment: default_environment(),
        }
    }
}

impl ServiceConfig {
    pub fn new(name: impl Into<String>, environment: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            environment: environment.into(),
            ..Self::default()
        }
    }
}

/// What a finished stage reports
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpanOutcome {
    pub status: Option<String>,
    pub row_count: Option<usize>,
    pub error_kind: Option<BackendErrorKind>,
    pub attempt: Option<u32>,
}

impl SpanOutcome {
    pub fn status(status: impl Into<String>) -> Self {
        Self {
            status: Some(status.into()),
            ..Self::default()
        }
    }

    pub fn from_attempt(result: &Result<ResultSet, BackendError>, attempt: u32) -> Self {
        let mut outcome = match result {
            Ok(result_set) => Self {
                status: Some("success".to_string()),
                row_count: Some(result_set.row_count()),
                ..Self::default()
            },
            Err(err) => Self {
                status: Some("failure".to_string()),
                error_kind: Some(err.kind),
                ..Self::default()
            },
        };
        outcome.attempt = Some(attempt);
        outcome
    }

    pub fn from_outcome(outcome: &BackendOutcome) -> Self {
        Self {
            status: Some(outcome.status().as_str().to_string()),
            row_count: Some(outcome.row_count()),
            error_kind: outcome.error_kind(),
            attempt: None,
        }
    }

    pub fn from_result(result: &UnifiedResult) -> Self {
        Self {
            status: Some(result.status().as_str().to_string()),
            row_count: Some(result.outcomes().iter().map(|o| o.row_count()).sum()),
            ..Self::default()
        }
    }
}

/// A stage in progress
pub struct ActiveSpan {
    name: &'static str,
    trace_id: String,
    backend: Option<String>,
    started: Instant,
    started_at: DateTime<Utc>,
    span: Span,
}

impl ActiveSpan {
    /// The `tracing` span to instrument futures with
    pub fn tracing_span(&self) -> &Span {
        &self.span
    }
}

/// Shared handle to the sink, counters and service identity of one agent
#[derive(Clone)]
pub struct Instrumentation {
    service: Arc<ServiceConfig>,
    sink: Arc<dyn TelemetrySink>,
    metrics: Arc<AgentMetrics>,
}

impl Instrumentation {
    pub fn new(service: ServiceConfig, sink: Arc<dyn TelemetrySink>) -> Self {
        Self {
            service: Arc::new(service),
            sink,
            metrics: Arc::new(AgentMetrics::new()),
        }
    }

    pub fn service(&self) -> &ServiceConfig {
        &self.service
    }

    pub fn metrics(&self) -> &AgentMetrics {
        &self.metrics
    }

    pub fn start(
        &self,
        trace_id: &TraceId,
        name: &'static str,
        backend: Option<&BackendId>,
    ) -> ActiveSpan {
        let span = info_span!(
            target: "skyroute",
            "stage",
            stage = name,
            trace_id = %trace_id,
            backend = field::Empty,
            status = field::Empty,
            row_count = field::Empty,
            error_kind = field::Empty,
        );
        if let Some(backend) = backend {
            span.record("backend", backend.as_str());
        }
        ActiveSpan {
            name,
            trace_id: trace_id.to_string(),
            backend: backend.map(|b| b.to_string()),
            started: Instant::now(),
            started_at: Utc::now(),
            span,
        }
    }

    pub fn finish(&self, active: ActiveSpan, outcome: SpanOutcome) {
        if let Some(status) = &outcome.status {
            active.span.record("status", status.as_str());
        }
        if let Some(rows) = outcome.row_count {
            active.span.record("row_count", rows as u64);
        }
        if let Some(kind) = outcome.error_kind {
            active.span.record("error_kind", kind.as_str());
        }

        let record = SpanRecord {
            name: active.name.to_string(),
            trace_id: active.trace_id,
            service: self.service.name.clone(),
            service_version: self.service.version.clone(),
            environment: self.service.environment.clone(),
            backend: active.backend,
            started_at: rfc3339_millis(active.started_at),
            ended_at: rfc3339_millis(Utc::now()),
            duration_ms: active.started.elapsed().as_millis() as u64,
            status: outcome.status,
            row_count: outcome.row_count,
            error_kind: outcome.error_kind,
            attempt: outcome.attempt,
        };
        self.emit(TelemetryEvent::Span(record));
    }

    /// Emit the current counters as a metrics event.
    pub fn emit_metrics(&self) {
        self.emit(TelemetryEvent::Metrics(self.metrics.snapshot()));
    }

    /// Deliver an event to the sink. Best-effort; logs on failure.
    pub fn emit(&self, event: TelemetryEvent) {
        let delivered = catch_unwind(AssertUnwindSafe(|| self.sink.emit(&event)));
        match delivered {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(
                event_type = event.event_type(),
                error = %err,
                "failed to emit telemetry event"
            ),
            Err(_) => warn!(
                event_type = event.event_type(),
                "telemetry sink panicked while emitting event"
            ),
        }
    }
}
