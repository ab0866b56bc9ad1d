//! Query Translator
//!
//! Turns a [`QueryRequest`] into a [`QueryPlan`]. The facade treats whatever comes
//! back purely as data: it validates the plan and never retries a translation.

use crate::error::TranslationError;
use crate::plan::QueryPlan;
use crate::types::{BackendId, QueryRequest};
use async_trait::async_trait;

pub mod llm;

pub use llm::{BackendDialect, LlmTranslator};

#[async_trait]
pub trait QueryTranslator: Send + Sync {
    async fn translate(&self, request: &QueryRequest) -> Result<QueryPlan, TranslationError>;

    /// Short label for logs and spans
    fn name(&self) -> &str;
}

/// Sends the request text unchanged to every targeted backend, or to every known
/// backend (in configuration order) when the request names no targets.
#[derive(Debug, Clone)]
pub struct PassthroughTranslator {
    backends: Vec<BackendId>,
}

impl PassthroughTranslator {
    pub fn new<I, B>(backends: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: Into<BackendId>,
    {
        Self {
            backends: backends.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl QueryTranslator for PassthroughTranslator {
    async fn translate(&self, request: &QueryRequest) -> Result<QueryPlan, TranslationError> {
        let text = request.text().trim();
        if text.is_empty() {
            return Err(TranslationError::NoMapping("request text is blank".to_string()));
        }
        let targets = request.targets().unwrap_or(self.backends.as_slice());
        let mut plan = QueryPlan::new();
        for backend in targets {
            plan.insert(backend.clone(), text)?;
        }
        Ok(plan)
    }

    fn name(&self) -> &str {
        "passthrough"
    }
}
