use async_trait::async_trait;
use mockall::automock;

use crate::domain::{
    errors::BillingResult,
    value_objects::billing::{
        BillingAccountModel, ChargeAccountModel, CreateInvoiceModel, InvoiceModel, PaymentModel,
        RegisterIncomingPaymentModel,
    },
};

/// Billing operations as seen by callers, served either in-process or over HTTP.
#[automock]
#[async_trait]
pub trait BillingService: Send + Sync {
    async fn ensure_account(&self, user_id: i64) -> BillingResult<BillingAccountModel>;

    async fn get_account(&self, account_id: i64) -> BillingResult<BillingAccountModel>;

    async fn get_account_by_user_id(&self, user_id: i64) -> BillingResult<BillingAccountModel>;

    async fn create_invoice(&self, params: CreateInvoiceModel) -> BillingResult<InvoiceModel>;

    async fn get_invoice_by_id(&self, invoice_id: i64) -> BillingResult<InvoiceModel>;

    async fn get_invoice_by_idempotency_key(&self, key: &str) -> BillingResult<InvoiceModel>;

    async fn get_invoice_by_qr_id(&self, qr_id: &str) -> BillingResult<InvoiceModel>;

    async fn charge_account(&self, params: ChargeAccountModel) -> BillingResult<PaymentModel>;

    async fn register_incoming_payment(
        &self,
        params: RegisterIncomingPaymentModel,
    ) -> BillingResult<PaymentModel>;
}
