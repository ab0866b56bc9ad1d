//! Backend Client Adapters
//!
//! One capability interface over every cloud database driver. The coordinator only
//! ever talks to [`BackendAdapter`]; it never branches on the concrete backend and
//! never touches connections, which stay inside each adapter's own pool.

use crate::coordinator::ExecutionPolicy;
use crate::error::{AgentError, BackendError};
use crate::outcome::ResultSet;
use crate::types::BackendId;
use async_trait::async_trait;
use std::sync::Arc;

pub mod limits;
pub mod relational;
pub mod warehouse;

pub use limits::ResultLimits;
pub use relational::{RelationalAdapter, RelationalSettings};
pub use warehouse::{WarehouseAdapter, WarehouseSettings};

/// A single cloud database behind a uniform execute capability
#[async_trait]
pub trait BackendAdapter: Send + Sync {
    /// Engine label for diagnostics (e.g. `postgres`, `bigquery`)
    fn engine(&self) -> &str;

    /// Run one backend-native query.
    ///
    /// Failures must come back classified as a [`BackendError`]; the adapter
    /// enforces `policy.timeout` per attempt and `policy.limits` on the result.
    async fn execute(&self, query: &str, policy: &ExecutionPolicy)
        -> Result<ResultSet, BackendError>;
}

/// Adapters keyed by backend id, in registration order
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: Vec<(BackendId, Arc<dyn BackendAdapter>)>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter. Ids must be unique.
    pub fn register(
        &mut self,
        backend: impl Into<BackendId>,
        adapter: Arc<dyn BackendAdapter>,
    ) -> Result<(), AgentError> {
        let backend = backend.into();
        if self.contains(&backend) {
            return Err(AgentError::AdapterSetup {
                backend,
                message: "backend id registered twice".to_string(),
            });
        }
        self.adapters.push((backend, adapter));
        Ok(())
    }

    pub fn get(&self, backend: &BackendId) -> Option<&Arc<dyn BackendAdapter>> {
        self.adapters
            .iter()
            .find(|(id, _)| id == backend)
            .map(|(_, adapter)| adapter)
    }

    pub fn get_or_error(&self, backend: &BackendId) -> Result<&Arc<dyn BackendAdapter>, AgentError> {
        self.get(backend)
            .ok_or_else(|| AgentError::UnknownBackend(backend.clone()))
    }

    pub fn contains(&self, backend: &BackendId) -> bool {
        self.get(backend).is_some()
    }

    /// Registered ids in registration order
    pub fn backends(&self) -> Vec<BackendId> {
        self.adapters.iter().map(|(id, _)| id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}
