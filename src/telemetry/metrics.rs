//! In-process counters and the end-to-end latency histogram.

use crate::outcome::{BackendOutcome, OutcomeStatus};
use crate::types::BackendId;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Upper bounds (inclusive, milliseconds) of the latency buckets. A final
/// overflow bucket catches everything slower.
pub const LATENCY_BUCKETS_MS: [u64; 11] = [5, 10, 25, 50, 100, 250, 500, 1_000, 2_500, 5_000, 10_000];

#[derive(Debug, Default)]
struct BackendCounters {
    success: AtomicU64,
    failure: AtomicU64,
    timeout: AtomicU64,
    retries: AtomicU64,
}

#[derive(Debug)]
struct LatencyHistogram {
    buckets: Vec<AtomicU64>,
    count: AtomicU64,
    sum_ms: AtomicU64,
}

impl Default for LatencyHistogram {
    fn default() -> Self {
        Self {
            buckets: (0..=LATENCY_BUCKETS_MS.len())
                .map(|_| AtomicU64::new(0))
                .collect(),
            count: AtomicU64::new(0),
            sum_ms: AtomicU64::new(0),
        }
    }
}

impl LatencyHistogram {
    fn observe(&self, latency: Duration) {
        let ms = latency.as_millis() as u64;
        let index = LATENCY_BUCKETS_MS
            .iter()
            .position(|bound| ms <= *bound)
            .unwrap_or(LATENCY_BUCKETS_MS.len());
        self.buckets[index].fetch_add(1, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum_ms.fetch_add(ms, Ordering::Relaxed);
    }

    fn snapshot(&self) -> HistogramSnapshot {
        HistogramSnapshot {
            bounds_ms: LATENCY_BUCKETS_MS.to_vec(),
            counts: self
                .buckets
                .iter()
                .map(|bucket| bucket.load(Ordering::Relaxed))
                .collect(),
            count: self.count.load(Ordering::Relaxed),
            sum_ms: self.sum_ms.load(Ordering::Relaxed),
        }
    }
}

/// Agent-wide counters. Shared by the facade and coordinator of one agent.
#[derive(Debug, Default)]
pub struct AgentMetrics {
    requests_total: AtomicU64,
    backends: RwLock<BTreeMap<BackendId, BackendCounters>>,
    latency: LatencyHistogram,
}

impl AgentMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_outcome(&self, outcome: &BackendOutcome) {
        self.with_backend(outcome.backend(), |counters| {
            let counter = match outcome.status() {
                OutcomeStatus::Success => &counters.success,
                OutcomeStatus::Failure => &counters.failure,
                OutcomeStatus::Timeout => &counters.timeout,
            };
            counter.fetch_add(1, Ordering::Relaxed);
        });
    }

    pub fn record_retry(&self, backend: &BackendId) {
        self.with_backend(backend, |counters| {
            counters.retries.fetch_add(1, Ordering::Relaxed);
        });
    }

    pub fn observe_latency(&self, latency: Duration) {
        self.latency.observe(latency);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let backends = self
            .backends
            .read()
            .iter()
            .map(|(id, counters)| {
                (
                    id.to_string(),
                    BackendCountsSnapshot {
                        success: counters.success.load(Ordering::Relaxed),
                        failure: counters.failure.load(Ordering::Relaxed),
                        timeout: counters.timeout.load(Ordering::Relaxed),
                        retries: counters.retries.load(Ordering::Relaxed),
                    },
                )
            })
            .collect();
        MetricsSnapshot {
            requests_total: self.requests_total.load(Ordering::Relaxed),
            backends,
            latency: self.latency.snapshot(),
        }
    }

    fn with_backend(&self, backend: &BackendId, apply: impl FnOnce(&BackendCounters)) {
        {
            let backends = self.backends.read();
            if let Some(counters) = backends.get(backend) {
                apply(counters);
                return;
            }
        }
        let mut backends = self.backends.write();
        apply(backends.entry(backend.clone()).or_default());
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendCountsSnapshot {
    pub success: u64,
    pub failure: u64,
    pub timeout: u64,
    pub retries: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistogramSnapshot {
    pub bounds_ms: Vec<u64>,
    /// One count per bound plus a trailing overflow bucket
    pub counts: Vec<u64>,
    pub count: u64,
    pub sum_ms: u64,
}

/// Point-in-time copy of every counter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub requests_total: u64,
    pub backends: BTreeMap<String, BackendCountsSnapshot>,
    pub latency: HistogramSnapshot,
}

impl MetricsSnapshot {
    pub fn backend(&self, backend: &str) -> BackendCountsSnapshot {
        self.backends.get(backend).cloned().unwrap_or_default()
    }
}
