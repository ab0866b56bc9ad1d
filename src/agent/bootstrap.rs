//! Building a [`QueryAgent`] from [`AgentConfig`].
//!
//! Every credential is resolved up front so a misconfigured deployment reports all
//! missing keys at once instead of failing on the first query.

use crate::adapter::{BackendAdapter, RelationalAdapter, WarehouseAdapter};
use crate::agent::QueryAgent;
use crate::config::{AgentConfig, BackendConfig, Engine, ProviderConfig, SinkKind, TranslatorKind};
use crate::credentials::{CredentialProvider, Secret};
use crate::error::{AgentError, CredentialError};
use crate::provider::{ModelProvider, ProviderFactory};
use crate::telemetry::{NoopSink, TelemetrySink, TracingSink};
use crate::translator::{BackendDialect, LlmTranslator};
use crate::types::BackendId;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Credential keys the configuration needs, in first-use order without repeats.
pub fn required_credentials(config: &AgentConfig) -> Vec<&str> {
    let mut keys: Vec<&str> = Vec::new();
    let backend_keys = config.backends.iter().map(|b| b.credential.as_str());
    let provider_keys = match (&config.translator.kind, &config.translator.provider) {
        (TranslatorKind::Llm, Some(provider)) => provider.credential_keys(),
        _ => Vec::new(),
    };
    for key in backend_keys.chain(provider_keys) {
        if !keys.contains(&key) {
            keys.push(key);
        }
    }
    keys
}

fn resolve_credentials<'a>(
    config: &'a AgentConfig,
    credentials: &dyn CredentialProvider,
) -> Result<HashMap<&'a str, Secret>, AgentError> {
    let mut resolved = HashMap::new();
    let mut missing: Vec<String> = Vec::new();
    let mut invalid = Vec::new();
    for key in required_credentials(config) {
        match credentials.secret(key) {
            Ok(secret) => {
                resolved.insert(key, secret);
            }
            Err(CredentialError::Missing(_)) => missing.push(key.to_string()),
            Err(err) => invalid.push(err),
        }
    }
    if missing.is_empty() && invalid.len() == 1 {
        if let Some(err) = invalid.pop() {
            return Err(err.into());
        }
    }
    // Unusable keys are reported next to the absent ones, with their reason.
    missing.extend(invalid.iter().map(|err| match err {
        CredentialError::Invalid { key, reason } => format!("{} ({})", key, reason),
        other => other.to_string(),
    }));
    if !missing.is_empty() {
        return Err(CredentialError::Missing(missing.join(", ")).into());
    }
    Ok(resolved)
}

fn secret_for<'a>(secrets: &'a HashMap<&str, Secret>, key: &str) -> Result<&'a Secret, AgentError> {
    secrets
        .get(key)
        .ok_or_else(|| CredentialError::Missing(key.to_string()).into())
}

fn build_adapter(
    backend: &BackendConfig,
    secret: &Secret,
) -> Result<Arc<dyn BackendAdapter>, AgentError> {
    let setup_error = |message: String| AgentError::AdapterSetup {
        backend: BackendId::new(backend.id.as_str()),
        message,
    };
    match backend.engine {
        Engine::Postgres => {
            let adapter = RelationalAdapter::connect_lazy(&backend.relational, secret)
                .map_err(|e| setup_error(e.to_string()))?;
            Ok(Arc::new(adapter))
        }
        Engine::Bigquery => {
            let settings = backend
                .warehouse
                .clone()
                .ok_or_else(|| setup_error("missing [warehouse] settings".to_string()))?;
            let adapter = WarehouseAdapter::new(settings, secret.clone())
                .map_err(|e| setup_error(e.to_string()))?;
            Ok(Arc::new(adapter))
        }
    }
}

fn model_provider(
    provider: &ProviderConfig,
    secrets: &HashMap<&str, Secret>,
) -> Result<ModelProvider, AgentError> {
    Ok(match provider {
        ProviderConfig::OpenAI {
            model,
            api_key_credential,
            base_url,
        } => ModelProvider::OpenAI {
            model: model.clone(),
            api_key: secret_for(secrets, api_key_credential)?.clone(),
            base_url: base_url.clone(),
        },
        ProviderConfig::AzureOpenAI {
            endpoint_credential,
            deployment_credential,
            api_key_credential,
            api_version,
        } => ModelProvider::AzureOpenAI {
            endpoint: secret_for(secrets, endpoint_credential)?.expose().to_string(),
            deployment: secret_for(secrets, deployment_credential)?.expose().to_string(),
            api_key: secret_for(secrets, api_key_credential)?.clone(),
            api_version: api_version.clone(),
        },
    })
}

/// Validate `config`, resolve its credentials and assemble the agent.
///
/// Relational pools are created lazily, so this needs a Tokio runtime but no
/// network access.
pub fn build_agent(
    config: &AgentConfig,
    credentials: &dyn CredentialProvider,
) -> Result<QueryAgent, AgentError> {
    let config = config.clone().validated()?;
    let secrets = resolve_credentials(&config, credentials)?;

    let sink: Arc<dyn TelemetrySink> = match config.telemetry.sink {
        SinkKind::Tracing => Arc::new(TracingSink),
        SinkKind::None => Arc::new(NoopSink),
    };
    let mut builder = QueryAgent::builder(config.service.clone())
        .policy(config.execution.policy())
        .sink(sink);

    for backend in &config.backends {
        let secret = secret_for(&secrets, &backend.credential)?;
        builder = builder.adapter(backend.id.as_str(), build_adapter(backend, secret)?);
    }

    if let (TranslatorKind::Llm, Some(provider)) = (config.translator.kind, &config.translator.provider) {
        let client = ProviderFactory::create_client(&model_provider(provider, &secrets)?)
            .map_err(|e| AgentError::ConfigError(format!("Model provider setup failed: {}", e)))?;
        let dialects = config
            .backends
            .iter()
            .map(|b| BackendDialect::new(b.id.as_str(), b.dialect()))
            .collect();
        builder = builder.translator(Arc::new(LlmTranslator::new(Arc::from(client), dialects)));
    }

    let agent = builder.build()?;
    info!(
        service = %config.service.name,
        environment = %config.service.environment,
        backends = config.backends.len(),
        translator = ?config.translator.kind,
        "Query agent ready"
    );
    Ok(agent)
}
