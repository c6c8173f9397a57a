//! Process-wide entry point to a single workflow manager.
//!
//! A `Controller` is meant to live in a `static`. `init` builds the manager
//! once; later calls return the same instance. Every other operation goes
//! through `ensure_initialized` and fails with `NotInitialized` before then.

use std::sync::{Arc, RwLock};

use keelson_types::error::WorkflowError;

use super::manager::{EngineOptions, WorkflowManager};
use crate::repository::checkpoint::CheckpointStore;

pub struct Controller<S: CheckpointStore> {
    init_lock: tokio::sync::Mutex<()>,
    slot: RwLock<Option<Arc<WorkflowManager<S>>>>,
}

impl<S: CheckpointStore + 'static> Controller<S> {
    pub const fn new() -> Self {
        Self {
            init_lock: tokio::sync::Mutex::const_new(()),
            slot: RwLock::new(None),
        }
    }

    /// Start the manager on first call. Later calls ignore their arguments
    /// and return the existing manager.
    pub async fn init(
        &self,
        store: S,
        options: EngineOptions,
    ) -> Result<Arc<WorkflowManager<S>>, WorkflowError> {
        let _guard = self.init_lock.lock().await;
        if let Some(manager) = self.current() {
            tracing::debug!("workflow controller already initialized");
            return Ok(manager);
        }

        let manager = WorkflowManager::start(store, options).await?;
        *self.slot.write().unwrap_or_else(|p| p.into_inner()) = Some(manager.clone());
        Ok(manager)
    }

    pub fn ensure_initialized(&self) -> Result<Arc<WorkflowManager<S>>, WorkflowError> {
        self.current().ok_or(WorkflowError::NotInitialized)
    }

    pub fn is_initialized(&self) -> bool {
        self.current().is_some()
    }

    /// Interrupt active runs and release the manager. `init` may be called again.
    pub async fn shutdown(&self) -> Result<(), WorkflowError> {
        let _guard = self.init_lock.lock().await;
        let manager = self.slot.write().unwrap_or_else(|p| p.into_inner()).take();
        match manager {
            Some(manager) => manager.shutdown().await,
            None => Ok(()),
        }
    }

    fn current(&self) -> Option<Arc<WorkflowManager<S>>> {
        self.slot.read().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

impl<S: CheckpointStore + 'static> Default for Controller<S> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::memory::InMemoryCheckpointStore;
    use crate::workflow::manager::RunRequest;
    use keelson_types::workflow::{TaskNode, WorkflowGraph};
    use serde_json::json;

    #[tokio::test]
    async fn test_operations_fail_before_init() {
        let controller: Controller<InMemoryCheckpointStore> = Controller::new();
        assert!(!controller.is_initialized());
        assert!(matches!(
            controller.ensure_initialized(),
            Err(WorkflowError::NotInitialized)
        ));
        controller.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_init_is_idempotent() {
        let controller = Controller::new();
        let first = controller
            .init(InMemoryCheckpointStore::new(), EngineOptions::default())
            .await
            .unwrap();
        let second = controller
            .init(InMemoryCheckpointStore::new(), EngineOptions::default())
            .await
            .unwrap();
        assert_eq!(first.instance_id(), second.instance_id());

        let manager = controller.ensure_initialized().unwrap();
        let graph = WorkflowGraph::from_nodes(vec![
            TaskNode::function("a", "identity").arg(json!(7)),
        ]);
        assert_eq!(manager.run(RunRequest::new(graph)).await.unwrap(), json!(7));
    }

    #[tokio::test]
    async fn test_shutdown_releases_manager() {
        let controller = Controller::new();
        controller
            .init(InMemoryCheckpointStore::new(), EngineOptions::default())
            .await
            .unwrap();
        controller.shutdown().await.unwrap();
        assert!(!controller.is_initialized());
    }
}
