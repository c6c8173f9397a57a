//! Application state wiring the workflow manager to the SQLite store.
//!
//! The manager lives in a process-wide `Controller`, so it is built at most
//! once per process and its shutdown marks unfinished runs RESUMABLE.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use keelson_core::workflow::{Controller, EngineOptions, WorkflowManager};
use keelson_infra::config::{load_engine_config, resolve_data_dir};
use keelson_infra::sqlite::{DatabasePool, SqliteCheckpointStore};

pub type ConcreteManager = WorkflowManager<SqliteCheckpointStore>;

static CONTROLLER: Controller<SqliteCheckpointStore> = Controller::new();

/// Shared state for CLI commands.
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<ConcreteManager>,
    pub data_dir: PathBuf,
}

impl AppState {
    /// Load config, open the database and start the manager.
    ///
    /// Starting the manager recovers workflows left RUNNING by a process
    /// that died.
    pub async fn init() -> anyhow::Result<Self> {
        let data_dir = resolve_data_dir();
        let config = load_engine_config(&data_dir).await;

        let pool = DatabasePool::open(&data_dir)
            .await
            .with_context(|| format!("failed to open database in {}", data_dir.display()))?;
        let store = SqliteCheckpointStore::new(pool);

        let manager = CONTROLLER
            .init(store, EngineOptions::default().with_config(config))
            .await
            .context("failed to start workflow manager")?;

        Ok(Self { manager, data_dir })
    }

    /// Interrupt active runs so they can be resumed later.
    pub async fn shutdown(&self) -> anyhow::Result<()> {
        CONTROLLER
            .shutdown()
            .await
            .context("failed to shut down workflow manager")
    }
}
