//! Execution Coordinator
//!
//! Fans a [`QueryPlan`] out to the matching adapters concurrently, bounds each
//! backend's wall-clock time, retries connection failures, and folds the settled
//! outcomes into a [`UnifiedResult`] in plan order.

use crate::adapter::{AdapterRegistry, BackendAdapter, ResultLimits};
use crate::error::BackendError;
use crate::outcome::{BackendOutcome, ResultSet, UnifiedResult};
use crate::plan::QueryPlan;
use crate::telemetry::{Instrumentation, SpanOutcome};
use crate::types::{BackendId, ExecutionOptions, TraceId};
use futures::future::join_all;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

pub mod retry;

pub use retry::RetryPolicy;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Fully resolved execution settings for one request
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExecutionPolicy {
    /// Per-backend budget covering every attempt and backoff sleep
    pub timeout: Duration,
    pub retry: RetryPolicy,
    pub limits: ResultLimits,
}

impl Default for ExecutionPolicy {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            retry: RetryPolicy::default(),
            limits: ResultLimits::default(),
        }
    }
}

impl ExecutionPolicy {
    /// Apply a request's overrides on top of this policy.
    pub fn with_overrides(&self, options: &ExecutionOptions) -> Self {
        let mut policy = *self;
        if let Some(timeout) = options.timeout {
            policy.timeout = timeout;
        }
        if let Some(max_retries) = options.max_retries {
            policy.retry.max_retries = max_retries;
        }
        if let Some(max_rows) = options.max_rows {
            policy.limits.max_rows = max_rows;
        }
        if let Some(max_bytes) = options.max_bytes {
            policy.limits.max_bytes = max_bytes;
        }
        policy
    }
}

/// Runs plans against registered adapters
#[derive(Clone)]
pub struct ExecutionCoordinator {
    registry: Arc<AdapterRegistry>,
    instrumentation: Instrumentation,
}

impl ExecutionCoordinator {
    pub fn new(registry: Arc<AdapterRegistry>, instrumentation: Instrumentation) -> Self {
        Self {
            registry,
            instrumentation,
        }
    }

    pub fn registry(&self) -> &AdapterRegistry {
        &self.registry
    }

    /// Execute every entry of `plan` concurrently and fold the outcomes.
    ///
    /// Backend failures never escape as errors; they are recorded in the outcomes.
    /// Plan entries without a registered adapter are reported as connection failures;
    /// the facade rejects such plans before dispatch.
    pub async fn execute(
        &self,
        trace_id: &TraceId,
        plan: &QueryPlan,
        policy: &ExecutionPolicy,
        cancel: &CancellationToken,
    ) -> UnifiedResult {
        let started = Instant::now();
        let dispatch = self
            .instrumentation
            .start(trace_id, "coordinator.dispatch", None);
        info!(
            trace_id = %trace_id,
            backends = plan.len(),
            timeout_ms = policy.timeout.as_millis() as u64,
            max_retries = policy.retry.max_retries,
            "Dispatching query plan"
        );

        let branches = plan
            .iter()
            .map(|(backend, query)| self.run_backend(trace_id, backend, query, policy, cancel));
        let outcomes = join_all(branches)
            .instrument(dispatch.tracing_span().clone())
            .await;
        self.instrumentation
            .finish(dispatch, SpanOutcome::status("settled"));

        let fold = self.instrumentation.start(trace_id, "coordinator.fold", None);
        let result = UnifiedResult::fold(trace_id.clone(), outcomes, started.elapsed());
        self.instrumentation
            .finish(fold, SpanOutcome::from_result(&result));
        debug!(
            trace_id = %trace_id,
            status = result.status().as_str(),
            "Plan outcomes folded"
        );
        result
    }

    /// One backend's branch: attempts, retries, timeout and cancellation.
    async fn run_backend(
        &self,
        trace_id: &TraceId,
        backend: &BackendId,
        query: &str,
        policy: &ExecutionPolicy,
        cancel: &CancellationToken,
    ) -> BackendOutcome {
        let span = self
            .instrumentation
            .start(trace_id, "backend.execute", Some(backend));
        let started = Instant::now();
        let retries = AtomicU32::new(0);

        let (engine, result) = match self.registry.get(backend) {
            Some(adapter) => {
                let attempts = self.attempt_with_retries(
                    trace_id,
                    backend,
                    adapter.as_ref(),
                    query,
                    policy,
                    &retries,
                );
                let bounded = async {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => Err(BackendError::cancelled()),
                        settled = timeout(policy.timeout, attempts) => settled.unwrap_or_else(|_| {
                            Err(BackendError::timeout(format!(
                                "no result within {} ms",
                                policy.timeout.as_millis()
                            )))
                        }),
                    }
                };
                let result = bounded.instrument(span.tracing_span().clone()).await;
                (adapter.engine().to_string(), result)
            }
            None => (
                "unregistered".to_string(),
                Err(BackendError::connection(format!(
                    "no adapter registered for backend {}",
                    backend
                ))),
            ),
        };

        let outcome = BackendOutcome::from_result(
            backend.clone(),
            engine,
            query,
            result,
            started.elapsed(),
            retries.load(Ordering::Relaxed),
        );
        match outcome.error() {
            None => info!(
                trace_id = %trace_id,
                backend = %backend,
                rows = outcome.row_count(),
                latency_ms = outcome.latency().as_millis() as u64,
                retries = outcome.retries(),
                "Backend query succeeded"
            ),
            Some(err) => warn!(
                trace_id = %trace_id,
                backend = %backend,
                error_kind = err.kind.as_str(),
                error = %err.message,
                retries = outcome.retries(),
                "Backend query failed"
            ),
        }
        self.instrumentation.metrics().record_outcome(&outcome);
        self.instrumentation
            .finish(span, SpanOutcome::from_outcome(&outcome));
        outcome
    }

    async fn attempt_with_retries(
        &self,
        trace_id: &TraceId,
        backend: &BackendId,
        adapter: &dyn BackendAdapter,
        query: &str,
        policy: &ExecutionPolicy,
        retries: &AtomicU32,
    ) -> Result<ResultSet, BackendError> {
        let mut attempt: u32 = 1;
        loop {
            let span = self
                .instrumentation
                .start(trace_id, "adapter.attempt", Some(backend));
            let result = adapter
                .execute(query, policy)
                .instrument(span.tracing_span().clone())
                .await;
            self.instrumentation
                .finish(span, SpanOutcome::from_attempt(&result, attempt));

            let err = match result {
                Ok(result_set) => return Ok(result_set),
                Err(err) => err,
            };
            let done = retries.load(Ordering::Relaxed);
            if !err.kind.is_retryable() || done >= policy.retry.max_retries {
                return Err(err);
            }

            let retry = done + 1;
            retries.store(retry, Ordering::Relaxed);
            self.instrumentation.metrics().record_retry(backend);
            let delay = policy.retry.delay_for(retry).min(policy.timeout);
            debug!(
                trace_id = %trace_id,
                backend = %backend,
                retry,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Retrying backend after connection failure"
            );
            sleep(delay).await;
            attempt += 1;
        }
    }
}
