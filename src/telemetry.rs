//! Telemetry domain: span events, sinks, counters, and the instrumentation wrapper.

pub mod events;
pub mod instrument;
pub mod metrics;
pub mod sinks;

pub use events::{SpanRecord, TelemetryEvent};
pub use instrument::{ActiveSpan, Instrumentation, ServiceConfig, SpanOutcome};
pub use metrics::{AgentMetrics, BackendCountsSnapshot, HistogramSnapshot, MetricsSnapshot};
pub use sinks::{MemorySink, NoopSink, TelemetrySink, TracingSink};
