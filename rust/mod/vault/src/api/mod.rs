mod progress;
mod runs;

use std::sync::Arc;

use axum::Router;

use crate::engine::ExecutionEngine;
use crate::progress::ProgressStore;

/// Shared handler state.
#[derive(Clone)]
pub struct ApiState {
    pub engine: Arc<ExecutionEngine>,
    pub progress: Arc<dyn ProgressStore>,
}

/// Build the complete vault module router.
///
/// Routes:
/// - `POST /runs`                  — execute a batch
/// - `POST /runs/@preview`         — dry-run, no Vault calls
/// - `POST /rows/:index/@execute`  — re-execute one row
/// - `GET  /progress`              — replay progress for a source
pub fn router(state: ApiState) -> Router {
    Router::new()
        .merge(runs::router(state.clone()))
        .merge(progress::router(state))
}
