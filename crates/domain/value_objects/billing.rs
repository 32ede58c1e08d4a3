//! Request and response shapes shared by the billing HTTP handlers and `BillingClient`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::value_objects::{
    enums::{invoice_statuses::InvoiceStatus, payment_statuses::PaymentStatus},
    money::Money,
};

/// Caller-owned key/value document attached to invoices and payments. Stored as JSONB, never interpreted.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

pub fn metadata_from_column(value: Option<serde_json::Value>) -> Option<Metadata> {
    match value {
        Some(serde_json::Value::Object(map)) => Some(map),
        _ => None,
    }
}

pub fn metadata_to_column(metadata: Option<Metadata>) -> Option<serde_json::Value> {
    metadata.map(serde_json::Value::Object)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillingAccountModel {
    pub id: i64,
    pub user_id: i64,
    pub balance: Money,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceModel {
    pub id: i64,
    pub account_id: i64,
    pub amount: Money,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub metadata: Option<Metadata>,
    pub status: InvoiceStatus,
    pub idempotency_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qr_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentModel {
    pub id: i64,
    pub account_id: i64,
    pub invoice_id: Option<i64>,
    pub amount: Money,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub metadata: Option<Metadata>,
    pub status: PaymentStatus,
    pub idempotency_key: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsureAccountModel {
    #[serde(default)]
    pub user_id: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateInvoiceModel {
    #[serde(default)]
    pub account_id: i64,
    pub amount: Money,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub metadata: Option<Metadata>,
    #[serde(default)]
    pub idempotency_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qr_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChargeAccountModel {
    #[serde(default)]
    pub account_id: i64,
    pub amount: Money,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub metadata: Option<Metadata>,
    #[serde(default)]
    pub idempotency_key: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterIncomingPaymentModel {
    #[serde(default)]
    pub account_id: i64,
    #[serde(default)]
    pub invoice_id: Option<i64>,
    pub amount: Money,
    #[serde(default)]
    pub metadata: Option<Metadata>,
    #[serde(default)]
    pub idempotency_key: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}
