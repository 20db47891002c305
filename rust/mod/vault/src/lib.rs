pub mod api;
pub mod client;
pub mod engine;
pub mod envelope;
pub mod ingest;
pub mod mapper;
pub mod model;
pub mod overrides;
pub mod photo;
pub mod progress;
pub mod retry;
pub mod runlog;

use std::sync::Arc;

use axum::Router;

use cardreg_core::{Module, ServiceError};

use engine::{EngineConfig, ExecutionEngine};
use progress::{LogReplayStore, ProgressStore};

/// The Vault module — card registration against the external access
/// control service.
///
/// Turns uploaded spreadsheet/CSV rows into SOAP calls, tracks per-row
/// outcomes, and exposes batch execution, preview, single-row re-runs,
/// and log-replay progress over HTTP.
pub struct VaultModule {
    engine: Arc<ExecutionEngine>,
    progress: Arc<dyn ProgressStore>,
}

impl VaultModule {
    pub fn new(config: EngineConfig) -> Result<Self, ServiceError> {
        let engine = Arc::new(ExecutionEngine::new(config)?);
        Ok(Self {
            engine,
            progress: Arc::new(LogReplayStore),
        })
    }

    /// Substitute the progress store (tests, alternative backends).
    pub fn with_progress(mut self, progress: Arc<dyn ProgressStore>) -> Self {
        self.progress = progress;
        self
    }

    pub fn engine(&self) -> &Arc<ExecutionEngine> {
        &self.engine
    }
}

impl Module for VaultModule {
    fn name(&self) -> &str {
        "vault"
    }

    fn routes(&self) -> Router {
        api::router(api::ApiState {
            engine: Arc::clone(&self.engine),
            progress: Arc::clone(&self.progress),
        })
    }
}
