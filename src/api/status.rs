use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};

use super::{internal_error, ApiError};
use crate::db;
use crate::types::StatusResponse;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/status", get(get_status))
}

/// GET /api/v1/status: last fully ingested block. A value that stops moving
/// is the main sign the indexer is stuck.
async fn get_status(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let last = db::checkpoint::get_last_block(&state.pool).await.map_err(|e| {
        tracing::error!("Failed to read checkpoint: {:?}", e);
        internal_error("Failed to read checkpoint")
    })?;

    let last_indexed_block = last.map(db::checkpoint::from_db_block).transpose().map_err(|e| {
        tracing::error!("Stored checkpoint is invalid: {}", e);
        internal_error("Stored checkpoint is invalid")
    })?;

    Ok(Json(StatusResponse { last_indexed_block }))
}
