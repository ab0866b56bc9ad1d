//! Language-model translator.
//!
//! Asks a chat model for one backend-native query per backend, returned as a JSON
//! object keyed by backend id. The model output is untrusted: it is parsed, checked
//! against the backends in scope and turned into a plan in target order.

use crate::error::TranslationError;
use crate::plan::QueryPlan;
use crate::provider::{ChatMessage, CompletionOptions, ModelProviderClient};
use crate::translator::QueryTranslator;
use crate::types::{BackendId, QueryRequest};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, warn};

/// SQL dialect spoken by one backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendDialect {
    pub backend: BackendId,
    /// e.g. `PostgreSQL` or `BigQuery Standard SQL`
    pub dialect: String,
}

impl BackendDialect {
    pub fn new(backend: impl Into<BackendId>, dialect: impl Into<String>) -> Self {
        Self {
            backend: backend.into(),
            dialect: dialect.into(),
        }
    }
}

pub struct LlmTranslator {
    client: Arc<dyn ModelProviderClient>,
    dialects: Vec<BackendDialect>,
    options: CompletionOptions,
}

impl LlmTranslator {
    pub fn new(client: Arc<dyn ModelProviderClient>, dialects: Vec<BackendDialect>) -> Self {
        Self {
            client,
            dialects,
            options: CompletionOptions {
                json_mode: true,
                ..CompletionOptions::default()
            },
        }
    }

    pub fn with_options(mut self, options: CompletionOptions) -> Self {
        self.options = options;
        self
    }

    fn scope<'a>(&'a self, request: &QueryRequest) -> Result<Vec<&'a BackendDialect>, TranslationError> {
        match request.targets() {
            None => Ok(self.dialects.iter().collect()),
            Some(targets) => targets
                .iter()
                .map(|target| {
                    self.dialects
                        .iter()
                        .find(|d| &d.backend == target)
                        .ok_or_else(|| {
                            TranslationError::NoMapping(format!(
                                "no dialect configured for backend {}",
                                target
                            ))
                        })
                })
                .collect(),
        }
    }
}

fn system_prompt(scope: &[&BackendDialect]) -> String {
    let mut prompt = String::from(
        "You are a specialized SQL query assistant for a multi-cloud data platform. \
         Translate the user's request into one query per backend listed below, each \
         written in that backend's dialect and following its best practices. Only \
         produce read-only queries.\n\nBackends:\n",
    );
    for dialect in scope {
        prompt.push_str(&format!("- \"{}\": {}\n", dialect.backend, dialect.dialect));
    }
    prompt.push_str(
        "\nRespond with a single JSON object whose keys are backend ids and whose \
         values are the query strings. Omit a backend when the request cannot be \
         answered there. Respond with {} when no backend applies.",
    );
    prompt
}

/// Drop a surrounding markdown code fence, with or without a language tag.
pub(crate) fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = match rest.split_once('\n') {
        Some((_, body)) => body,
        None => rest,
    };
    let body = body.trim_end();
    body.strip_suffix("```").unwrap_or(body).trim()
}

fn parse_plan(output: &str, scope: &[&BackendDialect]) -> Result<QueryPlan, TranslationError> {
    let object: Map<String, Value> = serde_json::from_str(strip_code_fences(output))
        .map_err(|e| TranslationError::MalformedOutput(format!("expected a JSON object: {}", e)))?;

    for key in object.keys() {
        if !scope.iter().any(|d| d.backend.as_str() == key) {
            debug!(backend = %key, "Ignoring translation for backend outside scope");
        }
    }

    let mut plan = QueryPlan::new();
    for dialect in scope {
        match object.get(dialect.backend.as_str()) {
            None | Some(Value::Null) => {}
            Some(Value::String(query)) => plan.insert(dialect.backend.clone(), query.trim())?,
            Some(other) => {
                return Err(TranslationError::MalformedOutput(format!(
                    "query for {} is not a string: {}",
                    dialect.backend, other
                )))
            }
        }
    }
    Ok(plan)
}

#[async_trait]
impl QueryTranslator for LlmTranslator {
    async fn translate(&self, request: &QueryRequest) -> Result<QueryPlan, TranslationError> {
        if request.text().trim().is_empty() {
            return Err(TranslationError::NoMapping("request text is blank".to_string()));
        }
        let scope = self.scope(request)?;
        if scope.is_empty() {
            return Err(TranslationError::NoMapping(
                "no backend dialects configured".to_string(),
            ));
        }

        let messages = vec![
            ChatMessage::system(system_prompt(&scope)),
            ChatMessage::user(request.text()),
        ];
        let response = self.client.complete(messages, self.options.clone()).await?;
        debug!(
            provider = self.client.provider_name(),
            model = %response.model,
            total_tokens = response.usage.total_tokens,
            "Translation completed"
        );

        parse_plan(&response.content, &scope).map_err(|err| {
            warn!(provider = self.client.provider_name(), error = %err, "Unusable translation output");
            err
        })
    }

    fn name(&self) -> &str {
        "llm"
    }
}
