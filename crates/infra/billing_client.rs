use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};
use tracing::warn;
use url::Url;

use crate::domain::{
    errors::{BillingError, BillingResult},
    repositories::billing::BillingService,
    value_objects::billing::{
        BillingAccountModel, ChargeAccountModel, CreateInvoiceModel, EnsureAccountModel,
        ErrorResponse, InvoiceModel, PaymentModel, RegisterIncomingPaymentModel,
    },
};

/// HTTP adapter for callers living in other processes (the bot, the collector).
///
/// Error bodies are mapped back through their `code`, so callers match on the same
/// `BillingError` variants they would get in-process.
pub struct BillingClient {
    http: reqwest::Client,
    base_url: Url,
    api_token: String,
    timeout: Duration,
}

impl BillingClient {
    pub fn new(base_url: &str, api_token: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let base_url = Url::parse(base_url).with_context(|| format!("invalid billing base url: {base_url}"))?;
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build billing http client")?;

        Ok(Self {
            http,
            base_url,
            api_token: api_token.into(),
            timeout,
        })
    }

    fn endpoint(&self, segments: &[&str]) -> BillingResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow::anyhow!("billing base url cannot be a base: {}", self.base_url))?
            .pop_if_empty()
            .extend(["api", "v1"])
            .extend(segments);
        Ok(url)
    }

    async fn get<T: DeserializeOwned>(&self, segments: &[&str]) -> BillingResult<T> {
        let url = self.endpoint(segments)?;
        self.send(self.http.get(url)).await
    }

    async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        segments: &[&str],
        body: &B,
    ) -> BillingResult<T> {
        let url = self.endpoint(segments)?;
        self.send(self.http.post(url).json(body)).await
    }

    async fn send<T: DeserializeOwned>(&self, request: reqwest::RequestBuilder) -> BillingResult<T> {
        let resp = request
            .bearer_auth(&self.api_token)
            .send()
            .await
            .map_err(|err| self.transport_error(err))?;

        let status = resp.status();
        if status.is_success() {
            return resp.json::<T>().await.map_err(|err| self.transport_error(err));
        }

        let body = resp.text().await.unwrap_or_default();
        match serde_json::from_str::<ErrorResponse>(&body) {
            Ok(error) => Err(BillingError::from_code(&error.code, &error.error)),
            Err(_) => {
                warn!(status = %status, response_body = %body, "billing api returned an unexpected error body");
                Err(BillingError::Persistence(anyhow::anyhow!(
                    "billing api request failed with status {status}"
                )))
            }
        }
    }

    fn transport_error(&self, err: reqwest::Error) -> BillingError {
        if err.is_timeout() {
            BillingError::Timeout(self.timeout)
        } else {
            BillingError::Persistence(anyhow::Error::new(err).context("billing api request failed"))
        }
    }
}

#[async_trait]
impl BillingService for BillingClient {
    async fn ensure_account(&self, user_id: i64) -> BillingResult<BillingAccountModel> {
        self.post(&["accounts", "ensure"], &EnsureAccountModel { user_id })
            .await
    }

    async fn get_account(&self, account_id: i64) -> BillingResult<BillingAccountModel> {
        self.get(&["accounts", &account_id.to_string()]).await
    }

    async fn get_account_by_user_id(&self, user_id: i64) -> BillingResult<BillingAccountModel> {
        self.get(&["accounts", "by-user", &user_id.to_string()])
            .await
    }

    async fn create_invoice(&self, params: CreateInvoiceModel) -> BillingResult<InvoiceModel> {
        self.post(&["invoices"], &params).await
    }

    async fn get_invoice_by_id(&self, invoice_id: i64) -> BillingResult<InvoiceModel> {
        self.get(&["invoices", &invoice_id.to_string()]).await
    }

    async fn get_invoice_by_idempotency_key(&self, key: &str) -> BillingResult<InvoiceModel> {
        if key.trim().is_empty() {
            return Err(BillingError::validation("idempotency key is required"));
        }
        self.get(&["invoices", "idempotency", key]).await
    }

    async fn get_invoice_by_qr_id(&self, qr_id: &str) -> BillingResult<InvoiceModel> {
        if qr_id.trim().is_empty() {
            return Err(BillingError::validation("qr id is required"));
        }
        self.get(&["invoices", "qr", qr_id]).await
    }

    async fn charge_account(&self, params: ChargeAccountModel) -> BillingResult<PaymentModel> {
        self.post(&["accounts", "charge"], &params).await
    }

    async fn register_incoming_payment(
        &self,
        params: RegisterIncomingPaymentModel,
    ) -> BillingResult<PaymentModel> {
        self.post(&["payments", "incoming"], &params).await
    }
}
