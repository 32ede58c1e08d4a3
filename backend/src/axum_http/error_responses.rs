use axum::{
    Json,
    extract::rejection::{JsonRejection, PathRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use crates::domain::{errors::BillingError, value_objects::billing::ErrorResponse};
use tracing::error;

use crate::usecases::sbp::SbpError;

/// Transport error rendered as `{"error": ..., "code": ...}`.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    pub fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "unauthorized", "unauthorized")
    }

    pub fn not_found() -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", "route not found")
    }

    fn internal(detail: &dyn std::fmt::Debug) -> Self {
        error!(error = ?detail, "request failed with internal error");
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal_error",
            "internal server error",
        )
    }
}

pub fn billing_status(err: &BillingError) -> StatusCode {
    match err {
        BillingError::AccountNotFound | BillingError::InvoiceNotFound => StatusCode::NOT_FOUND,
        BillingError::InsufficientFunds
        | BillingError::IdempotencyConflict(_)
        | BillingError::InvoiceAlreadyPaid => StatusCode::CONFLICT,
        BillingError::PartialPaymentUnsupported => StatusCode::UNPROCESSABLE_ENTITY,
        BillingError::CurrencyMismatch(_) | BillingError::Validation(_) => StatusCode::BAD_REQUEST,
        BillingError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        BillingError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<BillingError> for ApiError {
    fn from(err: BillingError) -> Self {
        match err {
            BillingError::Persistence(ref detail) => Self::internal(detail),
            _ => Self::new(billing_status(&err), err.code(), err.to_string()),
        }
    }
}

impl From<SbpError> for ApiError {
    fn from(err: SbpError) -> Self {
        match err {
            SbpError::Billing(err) => err.into(),
            SbpError::Provider(ref detail) => {
                error!(error = ?detail, "qr provider request failed");
                Self::new(err.status_code(), err.code(), err.to_string())
            }
            _ => Self::new(err.status_code(), err.code(), err.to_string()),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "invalid_request", rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "invalid_request", rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorResponse {
            error: self.message,
            code: self.code.to_string(),
        });
        (self.status, body).into_response()
    }
}
