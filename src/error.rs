//! Error types for the multi-cloud query agent.
//!
//! Only request-level problems surface as `Err` from the facade. Backend execution
//! failures are captured as [`BackendError`] values inside outcomes.

use crate::types::BackendId;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors returned to callers of the agent facade
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Unknown backend: {0}")]
    UnknownBackend(BackendId),

    #[error("Translation failed: {0}")]
    Translation(#[from] TranslationError),

    #[error("Credential error: {0}")]
    Credential(#[from] CredentialError),

    #[error("Adapter setup failed for {backend}: {message}")]
    AdapterSetup { backend: BackendId, message: String },

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl From<config::ConfigError> for AgentError {
    fn from(err: config::ConfigError) -> Self {
        AgentError::ConfigError(err.to_string())
    }
}

/// The translator could not produce a usable plan
#[derive(Debug, Error)]
pub enum TranslationError {
    #[error("Translator produced an empty plan")]
    EmptyPlan,

    #[error("Request cannot be mapped to any backend query: {0}")]
    NoMapping(String),

    #[error("Empty query for backend {0}")]
    EmptyQuery(BackendId),

    #[error("Backend {0} appears more than once in the plan")]
    DuplicateBackend(BackendId),

    #[error("Plan references backend {0} which the request did not target")]
    UntargetedBackend(BackendId),

    #[error("Translator output could not be parsed: {0}")]
    MalformedOutput(String),

    #[error("Model provider failed: {0}")]
    Provider(#[from] ProviderError),
}

/// Classification of a single backend failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendErrorKind {
    /// Backend unreachable or credentials rejected
    Connection,
    /// Backend rejected the query text
    QuerySyntax,
    /// Execution exceeded the configured timeout
    ExecutionTimeout,
    /// Row or byte cap exceeded
    ResultTooLarge,
    /// Query accepted but failed while running
    Execution,
    /// The caller cancelled the request
    Cancelled,
}

impl BackendErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BackendErrorKind::Connection => "connection",
            BackendErrorKind::QuerySyntax => "query_syntax",
            BackendErrorKind::ExecutionTimeout => "execution_timeout",
            BackendErrorKind::ResultTooLarge => "result_too_large",
            BackendErrorKind::Execution => "execution",
            BackendErrorKind::Cancelled => "cancelled",
        }
    }

    /// Only transient connection failures are worth another attempt.
    pub fn is_retryable(self) -> bool {
        matches!(self, BackendErrorKind::Connection)
    }
}

impl fmt::Display for BackendErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured backend failure carried inside a `BackendOutcome`
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct BackendError {
    pub kind: BackendErrorKind,
    pub message: String,
}

impl BackendError {
    pub fn new(kind: BackendErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::Connection, message)
    }

    pub fn syntax(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::QuerySyntax, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::ExecutionTimeout, message)
    }

    pub fn too_large(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::ResultTooLarge, message)
    }

    pub fn execution(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::Execution, message)
    }

    pub fn cancelled() -> Self {
        Self::new(BackendErrorKind::Cancelled, "request cancelled by caller")
    }
}

/// Language model provider errors (used by the LLM translator)
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Provider request failed: {0}")]
    RequestFailed(String),

    #[error("Provider authentication failed: {0}")]
    AuthFailed(String),

    #[error("Provider rate limit exceeded: {0}")]
    RateLimit(String),

    #[error("Provider model not found: {0}")]
    ModelNotFound(String),

    #[error("Provider error: {0}")]
    Other(String),
}

/// Credential lookup errors
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("Missing credential: {0}")]
    Missing(String),

    #[error("Invalid credential {key}: {reason}")]
    Invalid { key: String, reason: String },
}

/// Telemetry sink failures. Never propagated past the instrumentation layer.
#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("Telemetry sink unavailable: {0}")]
    SinkUnavailable(String),

    #[error("Telemetry encoding failed: {0}")]
    Encoding(String),
}
