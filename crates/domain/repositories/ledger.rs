use std::time::Instant;

use chrono::{DateTime, Utc};

use crate::domain::{
    entities::{
        billing_accounts::BillingAccountEntity,
        invoices::{InsertInvoiceEntity, InvoiceEntity},
        payments::{InsertPaymentEntity, PaymentEntity},
    },
    errors::BillingResult,
};

/// Row-level operations available inside one ledger transaction.
///
/// `lock_*` methods hold the row until the surrounding transaction ends. Callers lock the
/// account before any invoice of that account.
pub trait LedgerSession {
    /// Creates the account for `user_id` or touches `updated_at` of the existing one.
    fn upsert_account(&mut self, user_id: i64, currency: &str) -> BillingResult<BillingAccountEntity>;

    fn find_account(&mut self, account_id: i64) -> BillingResult<Option<BillingAccountEntity>>;

    fn find_account_by_user_id(&mut self, user_id: i64) -> BillingResult<Option<BillingAccountEntity>>;

    fn lock_account(&mut self, account_id: i64) -> BillingResult<Option<BillingAccountEntity>>;

    /// Adds `delta` (signed, minor units) to the balance.
    fn adjust_balance(
        &mut self,
        account_id: i64,
        delta: i64,
        now: DateTime<Utc>,
    ) -> BillingResult<BillingAccountEntity>;

    fn find_invoice(&mut self, invoice_id: i64) -> BillingResult<Option<InvoiceEntity>>;

    fn find_invoice_by_idempotency_key(&mut self, key: &str) -> BillingResult<Option<InvoiceEntity>>;

    fn find_invoice_by_qr_id(&mut self, qr_id: &str) -> BillingResult<Option<InvoiceEntity>>;

    fn lock_invoice(&mut self, invoice_id: i64) -> BillingResult<Option<InvoiceEntity>>;

    /// Returns `None` when the idempotency key is already taken; nothing is written then.
    fn insert_invoice(&mut self, invoice: InsertInvoiceEntity) -> BillingResult<Option<InvoiceEntity>>;

    fn mark_invoice_paid(&mut self, invoice_id: i64, paid_at: DateTime<Utc>) -> BillingResult<InvoiceEntity>;

    fn find_payment_by_idempotency_key(&mut self, key: &str) -> BillingResult<Option<PaymentEntity>>;

    /// Returns `None` when the idempotency key is already taken; nothing is written then.
    fn insert_payment(&mut self, payment: InsertPaymentEntity) -> BillingResult<Option<PaymentEntity>>;

    fn complete_payment(
        &mut self,
        payment_id: i64,
        completed_at: DateTime<Utc>,
    ) -> BillingResult<PaymentEntity>;
}

/// Runs units of work atomically: `Ok` commits everything the closure wrote, `Err` rolls it all back.
pub trait LedgerStore: Send + Sync + 'static {
    /// Connection acquisition, lock waits and statements all count against `deadline`. Work that
    /// finishes after `deadline` is rolled back and reported as `BillingError::Timeout`, so a
    /// timed-out call never leaves writes behind.
    fn transaction<T, F>(&self, deadline: Instant, work: F) -> BillingResult<T>
    where
        F: FnOnce(&mut dyn LedgerSession) -> BillingResult<T>;
}
