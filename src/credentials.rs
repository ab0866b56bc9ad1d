//! Credential / secret providers.
//!
//! Adapters receive secrets at construction time; the coordinator and facade never
//! read them.

use crate::error::CredentialError;
use std::collections::HashMap;
use std::fmt;

/// A secret value whose `Debug` output is redacted
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

/// Supplies connection credentials by key
pub trait CredentialProvider: Send + Sync {
    fn secret(&self, key: &str) -> Result<Secret, CredentialError>;
}

/// Reads secrets from environment variables; the key is the variable name.
#[derive(Debug, Clone, Default)]
pub struct EnvCredentialProvider;

impl EnvCredentialProvider {
    pub fn new() -> Self {
        Self
    }

    /// Names of the given variables that are unset or empty.
    pub fn missing<'a>(&self, keys: &[&'a str]) -> Vec<&'a str> {
        keys.iter()
            .copied()
            .filter(|key| self.secret(key).is_err())
            .collect()
    }
}

impl CredentialProvider for EnvCredentialProvider {
    fn secret(&self, key: &str) -> Result<Secret, CredentialError> {
        match std::env::var(key) {
            Ok(value) if !value.trim().is_empty() => Ok(Secret::new(value)),
            Ok(_) => Err(CredentialError::Invalid {
                key: key.to_string(),
                reason: "value is empty".to_string(),
            }),
            Err(_) => Err(CredentialError::Missing(key.to_string())),
        }
    }
}

/// In-memory secrets, for embedding callers that already hold credentials
#[derive(Debug, Clone, Default)]
pub struct StaticCredentialProvider {
    secrets: HashMap<String, Secret>,
}

impl StaticCredentialProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.secrets.insert(key.into(), Secret::new(value));
        self
    }
}

impl CredentialProvider for StaticCredentialProvider {
    fn secret(&self, key: &str) -> Result<Secret, CredentialError> {
        self.secrets
            .get(key)
            .cloned()
            .ok_or_else(|| CredentialError::Missing(key.to_string()))
    }
}
