use axum::{http::StatusCode, Json, Router};

use crate::types::ErrorResponse;
use crate::AppState;

pub mod status;
pub mod transactions;

/// Build the /api/v1 router with all sub-routes.
pub fn router() -> Router<AppState> {
    Router::new()
        .merge(transactions::router())
        .merge(status::router())
}

pub(crate) type ApiError = (StatusCode, Json<ErrorResponse>);

pub(crate) fn internal_error(message: &str) -> ApiError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            error: "Internal Server Error".to_string(),
            message: message.to_string(),
            status: 500,
        }),
    )
}

pub(crate) fn not_found(message: String) -> ApiError {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse {
            error: "Not found".to_string(),
            message,
            status: 404,
        }),
    )
}

pub(crate) fn bad_request(message: String) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: "Bad Request".to_string(),
            message,
            status: 400,
        }),
    )
}
