use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{HeaderMap, header::AUTHORIZATION},
    middleware::Next,
    response::Response,
};
use subtle::ConstantTimeEq;
use tracing::warn;

use super::error_responses::ApiError;

pub const API_TOKEN_HEADER: &str = "x-api-token";

/// Shared secret every non-public route expects.
#[derive(Clone)]
pub struct ApiToken(Arc<str>);

impl ApiToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(Arc::from(token.into()))
    }

    pub fn matches(&self, candidate: &str) -> bool {
        !candidate.is_empty() && bool::from(self.0.as_bytes().ct_eq(candidate.as_bytes()))
    }
}

/// Accepts `Authorization: Bearer <token>`, a bare `Authorization: <token>` or `X-API-Token`.
pub fn presented_token(headers: &HeaderMap) -> Option<&str> {
    if let Some(token) = headers.get(API_TOKEN_HEADER).and_then(|value| value.to_str().ok()) {
        return Some(token.trim());
    }

    let value = headers.get(AUTHORIZATION)?.to_str().ok()?.trim();
    match value.split_once(' ') {
        Some((scheme, token)) if scheme.eq_ignore_ascii_case("bearer") => Some(token.trim()),
        _ => Some(value),
    }
}

pub async fn require_api_token(
    State(api_token): State<ApiToken>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    match presented_token(request.headers()) {
        Some(token) if api_token.matches(token) => Ok(next.run(request).await),
        _ => {
            warn!(path = %request.uri().path(), "rejected request without a valid api token");
            Err(ApiError::unauthorized())
        }
    }
}
