use chrono::{DateTime, Utc};
use diesel::prelude::*;

use crate::{
    domain::{
        errors::BillingError,
        value_objects::{
            billing::{InvoiceModel, metadata_from_column},
            enums::invoice_statuses::InvoiceStatus,
            money::Money,
        },
    },
    infra::db::postgres::schema::billing_invoices,
};

#[derive(Debug, Clone, PartialEq, Identifiable, Selectable, Queryable)]
#[diesel(table_name = billing_invoices)]
pub struct InvoiceEntity {
    pub id: i64,
    pub account_id: i64,
    pub amount: i64,
    pub currency: String,
    pub description: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub idempotency_key: String,
    pub qr_id: Option<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = billing_invoices)]
pub struct InsertInvoiceEntity {
    pub account_id: i64,
    pub amount: i64,
    pub currency: String,
    pub description: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub idempotency_key: String,
    pub qr_id: Option<String>,
    pub status: String,
}

impl InvoiceEntity {
    pub fn amount(&self) -> Money {
        Money::new(self.amount, self.currency.clone())
    }

    pub fn is_pending(&self) -> bool {
        self.status == InvoiceStatus::Pending.as_str()
    }
}

impl TryFrom<InvoiceEntity> for InvoiceModel {
    type Error = BillingError;

    fn try_from(value: InvoiceEntity) -> Result<Self, Self::Error> {
        let status = value
            .status
            .parse::<InvoiceStatus>()
            .map_err(|err| BillingError::Persistence(anyhow::anyhow!(err)))?;

        Ok(Self {
            amount: value.amount(),
            id: value.id,
            account_id: value.account_id,
            description: value.description.unwrap_or_default(),
            metadata: metadata_from_column(value.metadata),
            status,
            idempotency_key: value.idempotency_key,
            qr_id: value.qr_id,
            created_at: value.created_at,
            updated_at: value.updated_at,
            paid_at: value.paid_at,
        })
    }
}
