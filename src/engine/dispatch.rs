// ABOUTME: Dispatch boundary between the scheduler and the worker roles executing thunks
// ABOUTME: Contains the worker role trait, the role registry, and the acknowledging default worker

use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use super::error::{ExecutionError, Result};
use super::thunk::Thunk;

/// A worker role that executes thunks addressed to it.
///
/// The thunk's timeout is advisory; enforcing it is up to the worker.
#[async_trait]
pub trait WorkerRole: Send + Sync {
    fn role(&self) -> &str;

    async fn execute(&self, thunk: &Thunk) -> anyhow::Result<serde_json::Value>;
}

/// Acknowledges every thunk without doing any work.
pub struct AcknowledgingWorker;

#[async_trait]
impl WorkerRole for AcknowledgingWorker {
    fn role(&self) -> &str {
        "*"
    }

    async fn execute(&self, thunk: &Thunk) -> anyhow::Result<serde_json::Value> {
        Ok(json!({
            "status": "executed",
            "thunk_id": thunk.id,
            "kind": thunk.kind,
            "target_role": thunk.target_role,
        }))
    }
}

pub struct Dispatcher {
    workers: HashMap<String, Arc<dyn WorkerRole>>,
    fallback: Option<Arc<dyn WorkerRole>>,
}

impl Dispatcher {
    /// A dispatcher that acknowledges thunks for roles without a worker.
    pub fn new() -> Self {
        Self {
            workers: HashMap::new(),
            fallback: Some(Arc::new(AcknowledgingWorker)),
        }
    }

    /// A dispatcher that fails thunks addressed to unregistered roles.
    pub fn strict() -> Self {
        Self {
            workers: HashMap::new(),
            fallback: None,
        }
    }

    pub fn register(&mut self, worker: Arc<dyn WorkerRole>) -> Result<()> {
        let role = worker.role().to_string();
        if self.workers.contains_key(&role) {
            return Err(ExecutionError::DuplicateRole { role });
        }
        self.workers.insert(role, worker);
        Ok(())
    }

    pub fn with_worker(mut self, worker: Arc<dyn WorkerRole>) -> Result<Self> {
        self.register(worker)?;
        Ok(self)
    }

    pub fn is_strict(&self) -> bool {
        self.fallback.is_none()
    }

    pub fn roles(&self) -> Vec<&str> {
        let mut roles: Vec<&str> = self.workers.keys().map(|k| k.as_str()).collect();
        roles.sort_unstable();
        roles
    }

    /// Hand a thunk to its target role and return the worker's output.
    pub async fn dispatch(&self, thunk: &Thunk) -> Result<serde_json::Value> {
        let worker = self
            .workers
            .get(&thunk.target_role)
            .or(self.fallback.as_ref())
            .ok_or_else(|| ExecutionError::Dispatch {
                thunk_id: thunk.id.clone(),
                role: thunk.target_role.clone(),
                message: "no worker registered for role".to_string(),
            })?;

        debug!(
            "Dispatching thunk {} ({}) to role {}",
            thunk.id, thunk.kind, thunk.target_role
        );

        worker
            .execute(thunk)
            .await
            .map_err(|e| ExecutionError::Dispatch {
                thunk_id: thunk.id.clone(),
                role: thunk.target_role.clone(),
                message: e.to_string(),
            })
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::thunk::ThunkKind;

    struct Doubler;

    #[async_trait]
    impl WorkerRole for Doubler {
        fn role(&self) -> &str {
            "doubler"
        }

        async fn execute(&self, thunk: &Thunk) -> anyhow::Result<serde_json::Value> {
            let value = thunk
                .operation
                .get("value")
                .and_then(|v| v.as_i64())
                .ok_or_else(|| anyhow::anyhow!("missing value"))?;
            Ok(json!(value * 2))
        }
    }

    #[tokio::test]
    async fn test_dispatch_to_registered_role() {
        let dispatcher = Dispatcher::new().with_worker(Arc::new(Doubler)).unwrap();
        let thunk = Thunk::new(ThunkKind::Compute, "doubler").with_operation("value", json!(21));

        assert_eq!(dispatcher.dispatch(&thunk).await.unwrap(), json!(42));
    }

    #[tokio::test]
    async fn test_worker_error_becomes_dispatch_error() {
        let dispatcher = Dispatcher::new().with_worker(Arc::new(Doubler)).unwrap();
        let thunk = Thunk::new(ThunkKind::Compute, "doubler");

        let err = dispatcher.dispatch(&thunk).await.unwrap_err();
        assert!(matches!(err, ExecutionError::Dispatch { ref role, .. } if role == "doubler"));
    }

    #[tokio::test]
    async fn test_fallback_and_strict_modes() {
        let thunk = Thunk::new(ThunkKind::Effect, "unknown");

        let output = Dispatcher::new().dispatch(&thunk).await.unwrap();
        assert_eq!(output["status"], "executed");

        assert!(Dispatcher::strict().dispatch(&thunk).await.is_err());
    }

    #[test]
    fn test_duplicate_role_registration() {
        let mut dispatcher = Dispatcher::new();
        dispatcher.register(Arc::new(Doubler)).unwrap();
        assert!(matches!(
            dispatcher.register(Arc::new(Doubler)),
            Err(ExecutionError::DuplicateRole { .. })
        ));
        assert_eq!(dispatcher.roles(), vec!["doubler"]);
    }
}
