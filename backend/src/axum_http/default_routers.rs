use axum::{http::StatusCode, response::IntoResponse};

use super::error_responses::ApiError;

pub async fn not_found() -> impl IntoResponse {
    ApiError::not_found()
}

pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
