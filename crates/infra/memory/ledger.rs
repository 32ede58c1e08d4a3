//! Process-local ledger store with the same transactional contract as the Postgres one.
//!
//! Every transaction runs against a copy of the state under one mutex and the copy replaces the
//! state only when the unit of work returns `Ok`, so transactions are serialized and atomic.

use std::{
    collections::BTreeMap,
    time::{Duration, Instant},
};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::domain::{
    entities::{
        billing_accounts::BillingAccountEntity,
        invoices::{InsertInvoiceEntity, InvoiceEntity},
        payments::{InsertPaymentEntity, PaymentEntity},
    },
    errors::{BillingError, BillingResult},
    repositories::ledger::{LedgerSession, LedgerStore},
    value_objects::enums::{invoice_statuses::InvoiceStatus, payment_statuses::PaymentStatus},
};

#[derive(Debug, Clone, Default)]
struct LedgerState {
    accounts: BTreeMap<i64, BillingAccountEntity>,
    invoices: BTreeMap<i64, InvoiceEntity>,
    payments: BTreeMap<i64, PaymentEntity>,
    last_account_id: i64,
    last_invoice_id: i64,
    last_payment_id: i64,
}

#[derive(Debug, Default)]
pub struct InMemoryLedgerStore {
    state: Mutex<LedgerState>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn payment_count(&self) -> usize {
        self.state.lock().payments.len()
    }

    pub fn invoice_count(&self) -> usize {
        self.state.lock().invoices.len()
    }
}

impl LedgerStore for InMemoryLedgerStore {
    fn transaction<T, F>(&self, deadline: Instant, work: F) -> BillingResult<T>
    where
        F: FnOnce(&mut dyn LedgerSession) -> BillingResult<T>,
    {
        if Instant::now() >= deadline {
            return Err(BillingError::Timeout(Duration::ZERO));
        }
        let mut guard = self
            .state
            .try_lock_until(deadline)
            .ok_or(BillingError::Timeout(Duration::ZERO))?;
        let mut session = MemoryLedgerSession {
            state: guard.clone(),
        };

        let result = work(&mut session)?;
        if Instant::now() >= deadline {
            return Err(BillingError::Timeout(Duration::ZERO));
        }
        *guard = session.state;
        Ok(result)
    }
}

struct MemoryLedgerSession {
    state: LedgerState,
}

impl MemoryLedgerSession {
    fn account_mut(&mut self, account_id: i64) -> BillingResult<&mut BillingAccountEntity> {
        self.state
            .accounts
            .get_mut(&account_id)
            .ok_or(BillingError::AccountNotFound)
    }
}

impl LedgerSession for MemoryLedgerSession {
    fn upsert_account(&mut self, user_id: i64, currency: &str) -> BillingResult<BillingAccountEntity> {
        let now = Utc::now();

        if let Some(account) = self
            .state
            .accounts
            .values_mut()
            .find(|account| account.user_id == user_id)
        {
            account.updated_at = now;
            return Ok(account.clone());
        }

        self.state.last_account_id += 1;
        let account = BillingAccountEntity {
            id: self.state.last_account_id,
            user_id,
            balance: 0,
            currency: currency.to_string(),
            created_at: now,
            updated_at: now,
        };
        self.state.accounts.insert(account.id, account.clone());
        Ok(account)
    }

    fn find_account(&mut self, account_id: i64) -> BillingResult<Option<BillingAccountEntity>> {
        Ok(self.state.accounts.get(&account_id).cloned())
    }

    fn find_account_by_user_id(&mut self, user_id: i64) -> BillingResult<Option<BillingAccountEntity>> {
        Ok(self
            .state
            .accounts
            .values()
            .find(|account| account.user_id == user_id)
            .cloned())
    }

    fn lock_account(&mut self, account_id: i64) -> BillingResult<Option<BillingAccountEntity>> {
        self.find_account(account_id)
    }

    fn adjust_balance(
        &mut self,
        account_id: i64,
        delta: i64,
        now: DateTime<Utc>,
    ) -> BillingResult<BillingAccountEntity> {
        let account = self.account_mut(account_id)?;
        account.balance = account
            .balance
            .checked_add(delta)
            .ok_or_else(|| BillingError::validation("balance overflow"))?;
        account.updated_at = now;
        Ok(account.clone())
    }

    fn find_invoice(&mut self, invoice_id: i64) -> BillingResult<Option<InvoiceEntity>> {
        Ok(self.state.invoices.get(&invoice_id).cloned())
    }

    fn find_invoice_by_idempotency_key(&mut self, key: &str) -> BillingResult<Option<InvoiceEntity>> {
        Ok(self
            .state
            .invoices
            .values()
            .find(|invoice| invoice.idempotency_key == key)
            .cloned())
    }

    fn find_invoice_by_qr_id(&mut self, qr_id: &str) -> BillingResult<Option<InvoiceEntity>> {
        Ok(self
            .state
            .invoices
            .values()
            .find(|invoice| invoice.qr_id.as_deref() == Some(qr_id))
            .cloned())
    }

    fn lock_invoice(&mut self, invoice_id: i64) -> BillingResult<Option<InvoiceEntity>> {
        self.find_invoice(invoice_id)
    }

    fn insert_invoice(&mut self, invoice: InsertInvoiceEntity) -> BillingResult<Option<InvoiceEntity>> {
        if self.find_invoice_by_idempotency_key(&invoice.idempotency_key)?.is_some() {
            return Ok(None);
        }
        if let Some(qr_id) = invoice.qr_id.as_deref() {
            if self.find_invoice_by_qr_id(qr_id)?.is_some() {
                return Err(BillingError::IdempotencyConflict("invoice"));
            }
        }
        if !self.state.accounts.contains_key(&invoice.account_id) {
            return Err(BillingError::AccountNotFound);
        }

        let now = Utc::now();
        self.state.last_invoice_id += 1;
        let entity = InvoiceEntity {
            id: self.state.last_invoice_id,
            account_id: invoice.account_id,
            amount: invoice.amount,
            currency: invoice.currency,
            description: invoice.description,
            metadata: invoice.metadata,
            idempotency_key: invoice.idempotency_key,
            qr_id: invoice.qr_id,
            status: invoice.status,
            created_at: now,
            updated_at: now,
            paid_at: None,
        };
        self.state.invoices.insert(entity.id, entity.clone());
        Ok(Some(entity))
    }

    fn mark_invoice_paid(&mut self, invoice_id: i64, paid_at: DateTime<Utc>) -> BillingResult<InvoiceEntity> {
        let invoice = self
            .state
            .invoices
            .get_mut(&invoice_id)
            .ok_or(BillingError::InvoiceNotFound)?;
        invoice.status = InvoiceStatus::Paid.to_string();
        invoice.paid_at = Some(paid_at);
        invoice.updated_at = paid_at;
        Ok(invoice.clone())
    }

    fn find_payment_by_idempotency_key(&mut self, key: &str) -> BillingResult<Option<PaymentEntity>> {
        Ok(self
            .state
            .payments
            .values()
            .find(|payment| payment.idempotency_key == key)
            .cloned())
    }

    fn insert_payment(&mut self, payment: InsertPaymentEntity) -> BillingResult<Option<PaymentEntity>> {
        if self.find_payment_by_idempotency_key(&payment.idempotency_key)?.is_some() {
            return Ok(None);
        }
        if !self.state.accounts.contains_key(&payment.account_id) {
            return Err(BillingError::AccountNotFound);
        }

        let now = Utc::now();
        self.state.last_payment_id += 1;
        let entity = PaymentEntity {
            id: self.state.last_payment_id,
            account_id: payment.account_id,
            invoice_id: payment.invoice_id,
            amount: payment.amount,
            currency: payment.currency,
            description: payment.description,
            metadata: payment.metadata,
            idempotency_key: payment.idempotency_key,
            status: payment.status,
            created_at: now,
            updated_at: now,
            completed_at: payment.completed_at,
        };
        self.state.payments.insert(entity.id, entity.clone());
        Ok(Some(entity))
    }

    fn complete_payment(
        &mut self,
        payment_id: i64,
        completed_at: DateTime<Utc>,
    ) -> BillingResult<PaymentEntity> {
        let payment = self
            .state
            .payments
            .get_mut(&payment_id)
            .ok_or_else(|| BillingError::Persistence(anyhow::anyhow!("payment {payment_id} vanished")))?;
        payment.status = PaymentStatus::Completed.to_string();
        payment.completed_at = Some(completed_at);
        payment.updated_at = completed_at;
        Ok(payment.clone())
    }
}
