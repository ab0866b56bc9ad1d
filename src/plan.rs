//! Query plans: the ordered per-backend queries produced by a translator.

use crate::error::TranslationError;
use crate::types::BackendId;

/// Ordered mapping from backend id to a backend-native query string.
///
/// Insertion order is the plan order; outcomes are reported in this order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryPlan {
    entries: Vec<(BackendId, String)>,
}

impl QueryPlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a plan from `(backend, query)` pairs, validating each entry.
    pub fn from_pairs<I, B, Q>(pairs: I) -> Result<Self, TranslationError>
    where
        I: IntoIterator<Item = (B, Q)>,
        B: Into<BackendId>,
        Q: Into<String>,
    {
        let mut plan = Self::new();
        for (backend, query) in pairs {
            plan.insert(backend, query)?;
        }
        Ok(plan)
    }

    /// Append an entry. Blank queries and repeated backends are rejected.
    pub fn insert(
        &mut self,
        backend: impl Into<BackendId>,
        query: impl Into<String>,
    ) -> Result<(), TranslationError> {
        let backend = backend.into();
        let query = query.into();
        if query.trim().is_empty() {
            return Err(TranslationError::EmptyQuery(backend));
        }
        if self.contains(&backend) {
            return Err(TranslationError::DuplicateBackend(backend));
        }
        self.entries.push((backend, query));
        Ok(())
    }

    pub fn contains(&self, backend: &BackendId) -> bool {
        self.entries.iter().any(|(id, _)| id == backend)
    }

    pub fn query_for(&self, backend: &BackendId) -> Option<&str> {
        self.entries
            .iter()
            .find(|(id, _)| id == backend)
            .map(|(_, query)| query.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn backends(&self) -> impl Iterator<Item = &BackendId> {
        self.entries.iter().map(|(id, _)| id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&BackendId, &str)> {
        self.entries.iter().map(|(id, query)| (id, query.as_str()))
    }
}
