//! Skyroute: Multi-Cloud Query Agent
//!
//! Routes one logical query to several cloud databases at once. A translator turns
//! the request into backend-native queries, the coordinator fans them out with
//! per-backend timeouts and retries, and the outcomes are folded into a single
//! [`UnifiedResult`] whose status tells the caller whether every backend answered.

pub mod adapter;
pub mod agent;
pub mod config;
pub mod coordinator;
pub mod credentials;
pub mod error;
pub mod logging;
pub mod outcome;
pub mod plan;
pub mod provider;
pub mod telemetry;
pub mod translator;
pub mod types;

pub use adapter::{AdapterRegistry, BackendAdapter, ResultLimits};
pub use agent::{build_agent, QueryAgent, QueryAgentBuilder};
pub use config::{AgentConfig, ConfigLoader};
pub use coordinator::{ExecutionCoordinator, ExecutionPolicy, RetryPolicy};
pub use error::{AgentError, BackendError, BackendErrorKind, TranslationError};
pub use outcome::{BackendOutcome, Column, OutcomeStatus, OverallStatus, ResultSet, UnifiedResult};
pub use plan::QueryPlan;
pub use translator::QueryTranslator;
pub use types::{BackendId, ExecutionOptions, QueryRequest, TraceId};
