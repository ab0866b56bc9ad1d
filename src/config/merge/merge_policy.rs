//! Merge rules: defaults, override order, conflict handling.

use crate::adapter::limits::{DEFAULT_MAX_BYTES, DEFAULT_MAX_ROWS};
use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError, Environment};

/// Create a Config builder with merge policy defaults applied.
pub fn builder_with_defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    Config::builder()
        .set_default("service.name", "skyroute")?
        .set_default("service.environment", "development")?
        .set_default("execution.timeout_ms", 30_000)?
        .set_default("execution.max_retries", 2)?
        .set_default("execution.backoff_base_ms", 100)?
        .set_default("execution.backoff_multiplier", 2.0)?
        .set_default("execution.backoff_jitter", 0.2)?
        .set_default("execution.max_rows", DEFAULT_MAX_ROWS as u64)?
        .set_default("execution.max_bytes", DEFAULT_MAX_BYTES as u64)
}

/// Environment overrides, highest precedence: `SKYROUTE__EXECUTION__TIMEOUT_MS=5000`.
pub fn environment_source() -> Environment {
    Environment::with_prefix("SKYROUTE")
        .prefix_separator("__")
        .separator("__")
        .try_parsing(true)
}
