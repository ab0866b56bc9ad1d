//! Telemetry sinks: where spans and metric snapshots are delivered.

use crate::error::TelemetryError;
use crate::telemetry::events::TelemetryEvent;
use parking_lot::Mutex;
use tracing::info;

/// Destination for telemetry events. Implementations may fail; callers treat
/// every emission as best-effort.
pub trait TelemetrySink: Send + Sync {
    fn emit(&self, event: &TelemetryEvent) -> Result<(), TelemetryError>;
}

/// Discards everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl TelemetrySink for NoopSink {
    fn emit(&self, _event: &TelemetryEvent) -> Result<(), TelemetryError> {
        Ok(())
    }
}

/// Writes each event as one structured `tracing` line under the `skyroute::telemetry` target
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl TelemetrySink for TracingSink {
    fn emit(&self, event: &TelemetryEvent) -> Result<(), TelemetryError> {
        let payload =
            serde_json::to_string(event).map_err(|e| TelemetryError::Encoding(e.to_string()))?;
        info!(
            target: "skyroute::telemetry",
            event_type = event.event_type(),
            payload = %payload,
            "telemetry"
        );
        Ok(())
    }
}

/// Buffers events in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<TelemetryEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<TelemetryEvent> {
        self.events.lock().clone()
    }

    /// Names of recorded spans, in emission order
    pub fn span_names(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| event.as_span().map(|span| span.name.clone()))
            .collect()
    }

    pub fn drain(&self) -> Vec<TelemetryEvent> {
        std::mem::take(&mut *self.events.lock())
    }
}

impl TelemetrySink for MemorySink {
    fn emit(&self, event: &TelemetryEvent) -> Result<(), TelemetryError> {
        self.events.lock().push(event.clone());
        Ok(())
    }
}
