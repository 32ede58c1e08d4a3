use chrono::{DateTime, Utc};
use diesel::prelude::*;

use crate::{
    domain::{
        errors::BillingError,
        value_objects::{
            billing::{PaymentModel, metadata_from_column},
            enums::payment_statuses::PaymentStatus,
            money::Money,
        },
    },
    infra::db::postgres::schema::billing_payments,
};

#[derive(Debug, Clone, PartialEq, Identifiable, Selectable, Queryable)]
#[diesel(table_name = billing_payments)]
pub struct PaymentEntity {
    pub id: i64,
    pub account_id: i64,
    pub invoice_id: Option<i64>,
    pub amount: i64,
    pub currency: String,
    pub description: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub idempotency_key: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = billing_payments)]
pub struct InsertPaymentEntity {
    pub account_id: i64,
    pub invoice_id: Option<i64>,
    pub amount: i64,
    pub currency: String,
    pub description: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub idempotency_key: String,
    pub status: String,
    pub completed_at: Option<DateTime<Utc>>,
}

impl PaymentEntity {
    pub fn amount(&self) -> Money {
        Money::new(self.amount, self.currency.clone())
    }

    /// Fields that identify the logical request behind an idempotency key.
    pub fn matches_request(&self, account_id: i64, signed_amount: &Money, invoice_id: Option<i64>) -> bool {
        self.account_id == account_id
            && self.amount == signed_amount.amount
            && self.currency == signed_amount.currency
            && self.invoice_id == invoice_id
    }
}

impl TryFrom<PaymentEntity> for PaymentModel {
    type Error = BillingError;

    fn try_from(value: PaymentEntity) -> Result<Self, Self::Error> {
        let status = value
            .status
            .parse::<PaymentStatus>()
            .map_err(|err| BillingError::Persistence(anyhow::anyhow!(err)))?;

        Ok(Self {
            amount: value.amount(),
            id: value.id,
            account_id: value.account_id,
            invoice_id: value.invoice_id,
            description: value.description,
            metadata: metadata_from_column(value.metadata),
            status,
            idempotency_key: value.idempotency_key,
            created_at: value.created_at,
            updated_at: value.updated_at,
            completed_at: value.completed_at,
        })
    }
}
