use std::time::Duration;

use diesel::result::{DatabaseErrorKind, Error as DieselError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BillingError {
    #[error("account not found")]
    AccountNotFound,
    #[error("invoice not found")]
    InvoiceNotFound,
    #[error("insufficient funds")]
    InsufficientFunds,
    #[error("{0} currency mismatch")]
    CurrencyMismatch(&'static str),
    #[error("{0} idempotency conflict")]
    IdempotencyConflict(&'static str),
    #[error("{0}")]
    Validation(String),
    #[error("partial payments are not supported")]
    PartialPaymentUnsupported,
    #[error("invoice is already paid")]
    InvoiceAlreadyPaid,
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Persistence(#[from] anyhow::Error),
}

pub type BillingResult<T> = std::result::Result<T, BillingError>;

impl BillingError {
    pub fn validation(message: impl Into<String>) -> Self {
        BillingError::Validation(message.into())
    }

    /// Stable machine-readable code carried in the `code` field of error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            BillingError::AccountNotFound => "account_not_found",
            BillingError::InvoiceNotFound => "invoice_not_found",
            BillingError::InsufficientFunds => "insufficient_funds",
            BillingError::CurrencyMismatch(_) => "currency_mismatch",
            BillingError::IdempotencyConflict(_) => "idempotency_conflict",
            BillingError::Validation(_) => "invalid_request",
            BillingError::PartialPaymentUnsupported => "partial_payment_unsupported",
            BillingError::InvoiceAlreadyPaid => "invoice_already_paid",
            BillingError::Timeout(_) => "timeout",
            BillingError::Persistence(_) => "internal_error",
        }
    }

    /// Rebuilds a typed error from an error body produced by the HTTP layer.
    pub fn from_code(code: &str, message: &str) -> Self {
        match code {
            "account_not_found" => BillingError::AccountNotFound,
            "invoice_not_found" => BillingError::InvoiceNotFound,
            "insufficient_funds" => BillingError::InsufficientFunds,
            "currency_mismatch" => BillingError::CurrencyMismatch(
                if message.starts_with("invoice") {
                    "invoice"
                } else {
                    "account"
                },
            ),
            "idempotency_conflict" => BillingError::IdempotencyConflict(
                if message.starts_with("invoice") {
                    "invoice"
                } else {
                    "payment"
                },
            ),
            "invalid_request" => BillingError::Validation(message.to_string()),
            "partial_payment_unsupported" => BillingError::PartialPaymentUnsupported,
            "invoice_already_paid" => BillingError::InvoiceAlreadyPaid,
            "timeout" => BillingError::Timeout(Duration::ZERO),
            _ => BillingError::Persistence(anyhow::anyhow!("{code}: {message}")),
        }
    }

    /// Timeouts and store failures may succeed when retried with the same idempotency key.
    pub fn is_transient(&self) -> bool {
        matches!(self, BillingError::Timeout(_) | BillingError::Persistence(_))
    }
}

impl From<DieselError> for BillingError {
    fn from(err: DieselError) -> Self {
        if let DieselError::DatabaseError(DatabaseErrorKind::Unknown, info) = &err {
            // statement_timeout / lock_timeout cancellations (SQLSTATE 57014, 55P03)
            let message = info.message();
            if message.contains("statement timeout") || message.contains("lock timeout") {
                return BillingError::Timeout(Duration::ZERO);
            }
            // numeric_value_out_of_range (SQLSTATE 22003) from balance arithmetic
            if message.contains("out of range") {
                return BillingError::validation("balance overflow");
            }
        }
        BillingError::Persistence(anyhow::Error::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_survive_the_wire() {
        let errors = [
            BillingError::AccountNotFound,
            BillingError::InvoiceNotFound,
            BillingError::InsufficientFunds,
            BillingError::CurrencyMismatch("invoice"),
            BillingError::IdempotencyConflict("invoice"),
            BillingError::validation("amount must be positive"),
            BillingError::PartialPaymentUnsupported,
            BillingError::InvoiceAlreadyPaid,
        ];

        for err in errors {
            let rebuilt = BillingError::from_code(err.code(), &err.to_string());
            assert_eq!(rebuilt.code(), err.code());
            assert_eq!(rebuilt.to_string(), err.to_string());
        }
    }

    #[test]
    fn unknown_codes_become_persistence_failures() {
        let err = BillingError::from_code("internal_error", "boom");
        assert!(matches!(err, BillingError::Persistence(_)));
        assert!(err.is_transient());
        assert!(!BillingError::InsufficientFunds.is_transient());
    }

    #[test]
    fn balance_overflow_is_not_retryable() {
        let err = BillingError::from(DieselError::DatabaseError(
            DatabaseErrorKind::Unknown,
            Box::new("bigint out of range".to_string()),
        ));

        assert!(matches!(&err, BillingError::Validation(message) if message == "balance overflow"));
        assert!(!err.is_transient());
    }

    #[test]
    fn lock_waits_become_timeouts() {
        let err = BillingError::from(DieselError::DatabaseError(
            DatabaseErrorKind::Unknown,
            Box::new("canceling statement due to lock timeout".to_string()),
        ));

        assert!(matches!(err, BillingError::Timeout(_)));
    }

    #[test]
    fn missing_rows_are_persistence_failures() {
        let err = BillingError::from(DieselError::NotFound);
        assert!(matches!(err, BillingError::Persistence(_)));
    }
}
