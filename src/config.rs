//! Configuration System
//!
//! Layered configuration with increasing precedence: built-in defaults, the global
//! file, workspace files (`config/skyroute.toml`, `config/{SKYROUTE_ENV}.toml`) and
//! `SKYROUTE__*` environment variables. Secrets never live here: backends and the
//! translator name the credential keys a [`CredentialProvider`](crate::credentials::CredentialProvider)
//! resolves at bootstrap.

use crate::adapter::limits::{DEFAULT_MAX_BYTES, DEFAULT_MAX_ROWS};
use crate::adapter::{RelationalSettings, ResultLimits, WarehouseSettings};
use crate::coordinator::{ExecutionPolicy, RetryPolicy};
use crate::error::AgentError;
use crate::logging::LoggingConfig;
use crate::telemetry::ServiceConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

mod merge;
mod sources;

pub use sources::global_file::global_config_path;
pub use sources::workspace_file::environment_name;

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Service identity attached to telemetry
    #[serde(default)]
    pub service: ServiceConfig,

    /// Default execution policy
    #[serde(default)]
    pub execution: ExecutionConfig,

    /// Backends in registration order
    #[serde(default)]
    pub backends: Vec<BackendConfig>,

    #[serde(default)]
    pub translator: TranslatorConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Default timeout, retry and size limits applied to every request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Per-backend budget covering every attempt
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Relative jitter applied to each backoff delay, in [0, 1)
    #[serde(default = "default_backoff_jitter")]
    pub backoff_jitter: f64,

    #[serde(default = "default_max_rows")]
    pub max_rows: usize,

    #[serde(default = "default_max_bytes")]
    pub max_bytes: usize,
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_max_retries() -> u32 {
    2
}

fn default_backoff_base_ms() -> u64 {
    100
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_backoff_jitter() -> f64 {
    0.2
}

fn default_max_rows() -> usize {
    DEFAULT_MAX_ROWS
}

fn default_max_bytes() -> usize {
    DEFAULT_MAX_BYTES
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            backoff_jitter: default_backoff_jitter(),
            max_rows: default_max_rows(),
            max_bytes: default_max_bytes(),
        }
    }
}

impl ExecutionConfig {
    pub fn policy(&self) -> ExecutionPolicy {
        ExecutionPolicy {
            timeout: Duration::from_millis(self.timeout_ms),
            retry: RetryPolicy {
                max_retries: self.max_retries,
                base_delay: Duration::from_millis(self.backoff_base_ms),
                multiplier: self.backoff_multiplier,
                jitter: self.backoff_jitter,
            },
            limits: ResultLimits {
                max_rows: self.max_rows,
                max_bytes: self.max_bytes,
            },
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.timeout_ms == 0 {
            return Err("timeout_ms must be positive".to_string());
        }
        if !(0.0..1.0).contains(&self.backoff_jitter) {
            return Err(format!(
                "backoff_jitter must be in [0, 1), got {}",
                self.backoff_jitter
            ));
        }
        if !(self.backoff_multiplier.is_finite() && self.backoff_multiplier >= 1.0) {
            return Err(format!(
                "backoff_multiplier must be finite and at least 1, got {}",
                self.backoff_multiplier
            ));
        }
        if self.max_rows == 0 || self.max_bytes == 0 {
            return Err("max_rows and max_bytes must be positive".to_string());
        }
        Ok(())
    }
}

/// Database engine behind a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Engine {
    /// Postgres wire protocol (Azure Database for PostgreSQL, Cloud SQL, RDS)
    Postgres,
    /// BigQuery REST API
    Bigquery,
}

impl Engine {
    /// Dialect named to the translator when the backend does not override it
    pub fn default_dialect(self) -> &'static str {
        match self {
            Engine::Postgres => "PostgreSQL",
            Engine::Bigquery => "BigQuery Standard SQL",
        }
    }
}

/// One `[[backends]]` entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendConfig {
    pub id: String,

    pub engine: Engine,

    /// Credential key: the connection URL for postgres, the OAuth access token for bigquery
    pub credential: String,

    /// SQL dialect described to the translator
    #[serde(default)]
    pub dialect: Option<String>,

    /// Pool settings (postgres)
    #[serde(default)]
    pub relational: RelationalSettings,

    /// Project and API settings (bigquery)
    #[serde(default)]
    pub warehouse: Option<WarehouseSettings>,
}

impl BackendConfig {
    pub fn dialect(&self) -> &str {
        self.dialect
            .as_deref()
            .unwrap_or_else(|| self.engine.default_dialect())
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.id.trim().is_empty() {
            return Err("id cannot be empty".to_string());
        }
        if self.credential.trim().is_empty() {
            return Err("credential key cannot be empty".to_string());
        }
        match self.engine {
            Engine::Postgres => {
                if self.relational.max_connections == 0 {
                    return Err("relational.max_connections must be positive".to_string());
                }
            }
            Engine::Bigquery => match &self.warehouse {
                None => return Err("bigquery backends need a [warehouse] section".to_string()),
                Some(w) if w.project.trim().is_empty() => {
                    return Err("warehouse.project cannot be empty".to_string())
                }
                Some(_) => {}
            },
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranslatorKind {
    /// Send the request text unchanged to every backend
    #[default]
    Passthrough,
    /// Ask a language model for per-backend queries
    Llm,
}

/// Language model used by the LLM translator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderConfig {
    #[serde(rename = "openai")]
    OpenAI {
        model: String,
        #[serde(default = "default_openai_key")]
        api_key_credential: String,
        #[serde(default)]
        base_url: Option<String>,
    },
    #[serde(rename = "azure_openai")]
    AzureOpenAI {
        #[serde(default = "default_azure_endpoint_key")]
        endpoint_credential: String,
        #[serde(default = "default_azure_deployment_key")]
        deployment_credential: String,
        #[serde(default = "default_azure_key")]
        api_key_credential: String,
        #[serde(default)]
        api_version: Option<String>,
    },
}

fn default_openai_key() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_azure_endpoint_key() -> String {
    "AZURE_OPENAI_ENDPOINT".to_string()
}

fn default_azure_deployment_key() -> String {
    "AZURE_OPENAI_DEPLOYMENT_NAME".to_string()
}

fn default_azure_key() -> String {
    "AZURE_OPENAI_API_KEY".to_string()
}

impl ProviderConfig {
    /// Credential keys this provider needs
    pub fn credential_keys(&self) -> Vec<&str> {
        match self {
            ProviderConfig::OpenAI {
                api_key_credential, ..
            } => vec![api_key_credential.as_str()],
            ProviderConfig::AzureOpenAI {
                endpoint_credential,
                deployment_credential,
                api_key_credential,
                ..
            } => vec![
                endpoint_credential.as_str(),
                deployment_credential.as_str(),
                api_key_credential.as_str(),
            ],
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TranslatorConfig {
    #[serde(default)]
    pub kind: TranslatorKind,

    #[serde(default)]
    pub provider: Option<ProviderConfig>,
}

impl TranslatorConfig {
    pub fn validate(&self) -> Result<(), String> {
        match (&self.kind, &self.provider) {
            (TranslatorKind::Llm, None) => {
                Err("the llm translator needs a [translator.provider] section".to_string())
            }
            (_, Some(provider)) if provider.credential_keys().iter().any(|k| k.trim().is_empty()) => {
                Err("provider credential keys cannot be empty".to_string())
            }
            (_, Some(ProviderConfig::OpenAI { model, .. })) if model.trim().is_empty() => {
                Err("provider model cannot be empty".to_string())
            }
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkKind {
    /// Structured log lines through `tracing`
    #[default]
    Tracing,
    /// Discard spans; counters are still kept
    None,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default)]
    pub sink: SinkKind,
}

/// Configuration validation errors
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    Backend(String, String),
    Execution(String),
    Translator(String),
    Logging(String),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::Backend(id, msg) => write!(f, "Backend '{}': {}", id, msg),
            ValidationError::Execution(msg) => write!(f, "Execution: {}", msg),
            ValidationError::Translator(msg) => write!(f, "Translator: {}", msg),
            ValidationError::Logging(msg) => write!(f, "Logging: {}", msg),
        }
    }
}

impl std::error::Error for ValidationError {}

impl AgentConfig {
    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if let Err(e) = self.execution.validate() {
            errors.push(ValidationError::Execution(e));
        }

        let mut seen = HashSet::new();
        for backend in &self.backends {
            if let Err(e) = backend.validate() {
                errors.push(ValidationError::Backend(backend.id.clone(), e));
            }
            if !seen.insert(backend.id.as_str()) {
                errors.push(ValidationError::Backend(
                    backend.id.clone(),
                    "duplicate backend id".to_string(),
                ));
            }
        }

        if let Err(e) = self.translator.validate() {
            errors.push(ValidationError::Translator(e));
        }

        if let Err(e) = crate::logging::validate(&self.logging) {
            errors.push(ValidationError::Logging(e));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Validate and fold all problems into one error
    pub fn validated(self) -> Result<Self, AgentError> {
        self.validate().map_err(|errors| {
            let error_msgs: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
            AgentError::ConfigError(format!(
                "Configuration validation failed:\n{}",
                error_msgs.join("\n")
            ))
        })?;
        Ok(self)
    }
}

/// Loads [`AgentConfig`] from the configured sources
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load defaults, global file, workspace files under `workspace_root` and environment.
    pub fn load(workspace_root: &Path) -> Result<AgentConfig, AgentError> {
        let builder = merge::merge_policy::builder_with_defaults()?;
        let builder = sources::global_file::add_to_builder(builder)?;
        let builder = sources::workspace_file::add_to_builder(builder, workspace_root)?;
        let config = builder
            .add_source(merge::merge_policy::environment_source())
            .build()?;
        Ok(config.try_deserialize()?)
    }

    /// Load defaults plus a single file, ignoring every other source.
    pub fn load_from_file(path: &Path) -> Result<AgentConfig, AgentError> {
        let config = merge::merge_policy::builder_with_defaults()?
            .add_source(config::File::from(path))
            .build()?;
        Ok(config.try_deserialize()?)
    }
}
