//! Agent Facade
//!
//! The single entry point: validate the request, translate it into a plan, check
//! the plan against the registered backends, run it through the coordinator and
//! hand back the unified result. Backend failures come back inside the result;
//! only request-level problems are returned as `Err`.

use crate::adapter::{AdapterRegistry, BackendAdapter};
use crate::coordinator::{ExecutionCoordinator, ExecutionPolicy};
use crate::error::{AgentError, TranslationError};
use crate::outcome::UnifiedResult;
use crate::plan::QueryPlan;
use crate::telemetry::{
    Instrumentation, MetricsSnapshot, NoopSink, ServiceConfig, SpanOutcome, TelemetrySink,
};
use crate::translator::{PassthroughTranslator, QueryTranslator};
use crate::types::{BackendId, QueryRequest, TraceId};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Instrument};

pub mod bootstrap;

pub use bootstrap::{build_agent, required_credentials};

/// Routes logical queries to cloud backends
pub struct QueryAgent {
    translator: Arc<dyn QueryTranslator>,
    coordinator: ExecutionCoordinator,
    instrumentation: Instrumentation,
    policy: ExecutionPolicy,
}

impl std::fmt::Debug for QueryAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryAgent")
            .field("translator", &self.translator.name())
            .field("backends", &self.backends())
            .field("policy", &self.policy)
            .finish()
    }
}

impl QueryAgent {
    pub fn builder(service: ServiceConfig) -> QueryAgentBuilder {
        QueryAgentBuilder::new(service)
    }

    /// Run one request with a fresh cancellation token.
    pub async fn execute_query(&self, request: QueryRequest) -> Result<UnifiedResult, AgentError> {
        self.execute_query_with_cancel(request, &CancellationToken::new())
            .await
    }

    /// Run one request. Cancelling `cancel` stops in-flight backend calls and pending
    /// retries; the affected outcomes are reported as cancelled failures.
    pub async fn execute_query_with_cancel(
        &self,
        request: QueryRequest,
        cancel: &CancellationToken,
    ) -> Result<UnifiedResult, AgentError> {
        let trace_id = TraceId::generate();
        let started = Instant::now();
        let metrics = self.instrumentation.metrics();
        metrics.record_request();

        let span = self
            .instrumentation
            .start(&trace_id, "agent.execute_query", None);
        let result = self
            .run(&trace_id, &request, cancel)
            .instrument(span.tracing_span().clone())
            .await;

        metrics.observe_latency(started.elapsed());
        match &result {
            Ok(unified) => {
                info!(
                    trace_id = %trace_id,
                    status = unified.status().as_str(),
                    backends = unified.outcomes().len(),
                    total_latency_ms = unified.total_latency().as_millis() as u64,
                    "Query completed"
                );
                self.instrumentation
                    .finish(span, SpanOutcome::from_result(unified));
            }
            Err(err) => {
                warn!(trace_id = %trace_id, error = %err, "Query rejected");
                self.instrumentation
                    .finish(span, SpanOutcome::status("rejected"));
            }
        }
        self.instrumentation.emit_metrics();
        result
    }

    async fn run(
        &self,
        trace_id: &TraceId,
        request: &QueryRequest,
        cancel: &CancellationToken,
    ) -> Result<UnifiedResult, AgentError> {
        self.validate_request(request)?;
        let policy = self.policy.with_overrides(request.options());

        let plan = self.translate(trace_id, request).await?;
        self.validate_plan(request, &plan)?;

        Ok(self
            .coordinator
            .execute(trace_id, &plan, &policy, cancel)
            .await)
    }

    async fn translate(
        &self,
        trace_id: &TraceId,
        request: &QueryRequest,
    ) -> Result<QueryPlan, AgentError> {
        let span = self.instrumentation.start(trace_id, "agent.translate", None);
        let translated = self
            .translator
            .translate(request)
            .instrument(span.tracing_span().clone())
            .await;
        match translated {
            Ok(plan) => {
                self.instrumentation.finish(
                    span,
                    SpanOutcome::status(if plan.is_empty() { "empty" } else { "success" }),
                );
                Ok(plan)
            }
            Err(err) => {
                self.instrumentation
                    .finish(span, SpanOutcome::status("failure"));
                Err(err.into())
            }
        }
    }

    fn validate_request(&self, request: &QueryRequest) -> Result<(), AgentError> {
        if request.text().trim().is_empty() {
            return Err(AgentError::InvalidRequest(
                "query text must not be blank".to_string(),
            ));
        }
        if request.options().timeout == Some(Duration::ZERO) {
            return Err(AgentError::InvalidRequest(
                "timeout must be positive".to_string(),
            ));
        }
        if let Some(targets) = request.targets() {
            for target in targets {
                self.coordinator.registry().get_or_error(target)?;
            }
        }
        Ok(())
    }

    fn validate_plan(&self, request: &QueryRequest, plan: &QueryPlan) -> Result<(), AgentError> {
        if plan.is_empty() {
            return Err(TranslationError::EmptyPlan.into());
        }
        for backend in plan.backends() {
            self.coordinator.registry().get_or_error(backend)?;
            if !request.allows(backend) {
                return Err(TranslationError::UntargetedBackend(backend.clone()).into());
            }
        }
        Ok(())
    }

    /// Registered backends in registration order
    pub fn backends(&self) -> Vec<BackendId> {
        self.coordinator.registry().backends()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.instrumentation.metrics().snapshot()
    }

    pub fn policy(&self) -> &ExecutionPolicy {
        &self.policy
    }

    pub fn service(&self) -> &ServiceConfig {
        self.instrumentation.service()
    }
}

/// Assembles a [`QueryAgent`]. Adapters are registered in call order.
pub struct QueryAgentBuilder {
    service: ServiceConfig,
    translator: Option<Arc<dyn QueryTranslator>>,
    adapters: Vec<(BackendId, Arc<dyn BackendAdapter>)>,
    policy: ExecutionPolicy,
    sink: Arc<dyn TelemetrySink>,
}

impl QueryAgentBuilder {
    pub fn new(service: ServiceConfig) -> Self {
        Self {
            service,
            translator: None,
            adapters: Vec::new(),
            policy: ExecutionPolicy::default(),
            sink: Arc::new(NoopSink),
        }
    }

    /// Defaults to a [`PassthroughTranslator`] over the registered backends.
    pub fn translator(mut self, translator: Arc<dyn QueryTranslator>) -> Self {
        self.translator = Some(translator);
        self
    }

    pub fn adapter(mut self, backend: impl Into<BackendId>, adapter: Arc<dyn BackendAdapter>) -> Self {
        self.adapters.push((backend.into(), adapter));
        self
    }

    pub fn policy(mut self, policy: ExecutionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn sink(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn build(self) -> Result<QueryAgent, AgentError> {
        let mut registry = AdapterRegistry::new();
        for (backend, adapter) in self.adapters {
            registry.register(backend, adapter)?;
        }
        let translator = match self.translator {
            Some(translator) => translator,
            None => Arc::new(PassthroughTranslator::new(registry.backends())),
        };
        let instrumentation = Instrumentation::new(self.service, self.sink);
        let coordinator = ExecutionCoordinator::new(Arc::new(registry), instrumentation.clone());

        Ok(QueryAgent {
            translator,
            coordinator,
            instrumentation,
            policy: self.policy,
        })
    }
}
