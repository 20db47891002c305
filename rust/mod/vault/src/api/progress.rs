use std::path::Path;

use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};

use cardreg_core::ServiceError;

use crate::model::ProgressQuery;
use crate::progress::BatchProgress;

use super::ApiState;

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/progress", get(get_progress))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// GET /progress?source=...
// ---------------------------------------------------------------------------

/// Progress is reconstructed from the run log, so any process that can
/// see the source directory can poll it — not just the one executing.
async fn get_progress(
    State(state): State<ApiState>,
    Query(query): Query<ProgressQuery>,
) -> Result<Json<BatchProgress>, ServiceError> {
    let progress = state.progress.get_progress(Path::new(&query.source))?;
    Ok(Json(progress))
}
