use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::value_objects::billing::{InvoiceModel, Metadata};

pub const SBP_METADATA_KEY: &str = "sbp";

/// QR-code details stored under `metadata["sbp"]` of an invoice created through the SBP flow.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InvoiceSbpMetadata {
    pub provider: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub qr_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub payment_link: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub payload: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub payload_base64: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_data: Option<Metadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<Metadata>,
}

impl InvoiceSbpMetadata {
    pub fn extract(metadata: Option<&Metadata>) -> Option<Self> {
        let value = metadata?.get(SBP_METADATA_KEY)?;
        serde_json::from_value(value.clone()).ok()
    }

    /// Returns a copy of `metadata` with the SBP section set; other keys are kept untouched.
    pub fn attach(&self, metadata: Option<Metadata>) -> Result<Metadata, serde_json::Error> {
        let mut metadata = metadata.unwrap_or_default();
        metadata.insert(SBP_METADATA_KEY.to_string(), serde_json::to_value(self)?);
        Ok(metadata)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateSbpInvoiceModel {
    #[serde(default)]
    pub user_id: i64,
    #[serde(default, alias = "amount_minor")]
    pub amount: i64,
    #[serde(default)]
    pub currency: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, rename = "paymentPurpose", alias = "payment_purpose")]
    pub payment_purpose: String,
    #[serde(default)]
    pub idempotency_key: String,
    #[serde(default, rename = "qrcType", alias = "qr_type")]
    pub qr_type: String,
    #[serde(default, rename = "redirectUrl", alias = "redirect_url")]
    pub redirect_url: String,
    #[serde(default)]
    pub metadata: Option<Metadata>,
    #[serde(default)]
    pub extra: Option<Metadata>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SbpQrCodeDto {
    pub qr_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub payment_link: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<Metadata>,
}

impl From<InvoiceSbpMetadata> for SbpQrCodeDto {
    fn from(value: InvoiceSbpMetadata) -> Self {
        Self {
            qr_id: value.qr_id,
            payment_link: value.payment_link,
            expires_at: value.expires_at,
            raw: value.provider_data,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateSbpInvoiceResultModel {
    pub invoice: InvoiceModel,
    pub qr: SbpQrCodeDto,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SbpWebhookAckModel {
    pub status: String,
    pub payment_id: i64,
}
