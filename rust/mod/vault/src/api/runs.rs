use std::path::PathBuf;

use axum::extract::{Path, State};
use axum::routing::post;
use axum::{Json, Router};
use tokio_util::sync::CancellationToken;

use cardreg_core::ServiceError;

use crate::engine::{BatchSpec, RowRecord};
use crate::model::{
    index_overrides, ExecuteRequest, ExecutionResult, PreviewRequest, PreviewResult,
    RowExecuteRequest,
};

use super::ApiState;

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/runs", post(execute_batch))
        .route("/runs/@preview", post(preview))
        .route("/rows/{index}/@execute", post(execute_row))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// POST /runs
// ---------------------------------------------------------------------------

async fn execute_batch(
    State(state): State<ApiState>,
    Json(req): Json<ExecuteRequest>,
) -> Result<Json<ExecutionResult>, ServiceError> {
    let spec = BatchSpec {
        source: PathBuf::from(&req.source),
        photo_dir: req.photo_dir.map(PathBuf::from),
        kind: req.kind,
        overrides: index_overrides(req.overrides),
        indices: req.indices,
        concurrency: req.concurrency,
    };
    let result = state.engine.execute_batch(spec, CancellationToken::new()).await?;
    Ok(Json(result))
}

// ---------------------------------------------------------------------------
// POST /runs/@preview
// ---------------------------------------------------------------------------

async fn preview(
    State(state): State<ApiState>,
    Json(req): Json<PreviewRequest>,
) -> Result<Json<PreviewResult>, ServiceError> {
    let source = PathBuf::from(&req.source);
    let photo_dir = req.photo_dir.map(PathBuf::from);
    let overrides = index_overrides(req.overrides);
    let result = state.engine.preview(&source, photo_dir.as_deref(), &overrides)?;
    Ok(Json(result))
}

// ---------------------------------------------------------------------------
// POST /rows/:index/@execute
// ---------------------------------------------------------------------------

async fn execute_row(
    State(state): State<ApiState>,
    Path(index): Path<usize>,
    Json(req): Json<RowExecuteRequest>,
) -> Result<Json<RowRecord>, ServiceError> {
    let source = PathBuf::from(&req.source);
    let photo_dir = req.photo_dir.map(PathBuf::from);
    let overrides = index_overrides(req.overrides);
    let record = state
        .engine
        .execute_row(&source, index, photo_dir.as_deref(), req.kind, &overrides)
        .await?;
    Ok(Json(record))
}
