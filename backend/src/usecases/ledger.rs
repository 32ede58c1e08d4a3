use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use chrono::Utc;
use crates::{
    domain::{
        entities::{
            billing_accounts::BillingAccountEntity,
            invoices::{InsertInvoiceEntity, InvoiceEntity},
            payments::{InsertPaymentEntity, PaymentEntity},
        },
        errors::{BillingError, BillingResult},
        repositories::{
            billing::BillingService,
            ledger::{LedgerSession, LedgerStore},
        },
        value_objects::{
            billing::{
                BillingAccountModel, ChargeAccountModel, CreateInvoiceModel, InvoiceModel,
                PaymentModel, RegisterIncomingPaymentModel, metadata_to_column,
            },
            enums::{invoice_statuses::InvoiceStatus, payment_statuses::PaymentStatus},
            money::Money,
        },
    },
    observability::ledger_observer::LedgerObserver,
};
use tracing::{error, info, warn};

pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Runs every billing operation as one store transaction on the blocking pool, bounded by a
/// deadline of `timeout` from the start of the call. The account row is always locked before any invoice row.
pub struct LedgerUseCase<S, O>
where
    S: LedgerStore,
    O: LedgerObserver,
{
    store: Arc<S>,
    observer: Arc<O>,
    default_currency: String,
    timeout: Duration,
}

impl<S, O> LedgerUseCase<S, O>
where
    S: LedgerStore,
    O: LedgerObserver,
{
    pub fn new(store: Arc<S>, observer: Arc<O>, default_currency: String, timeout: Duration) -> Self {
        Self {
            store,
            observer,
            default_currency,
            timeout,
        }
    }

    async fn run<T, F>(&self, operation: &'static str, work: F) -> BillingResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut dyn LedgerSession) -> BillingResult<T> + Send + 'static,
    {
        let started = Instant::now();
        let deadline = started + self.timeout;
        let store = Arc::clone(&self.store);

        // The store rolls back work that outlives the deadline, so the task's result is what was committed.
        let result = match tokio::task::spawn_blocking(move || store.transaction(deadline, work)).await {
            Ok(Err(BillingError::Timeout(_))) => Err(BillingError::Timeout(self.timeout)),
            Ok(result) => result,
            Err(join_err) => Err(BillingError::Persistence(
                anyhow::Error::new(join_err).context("ledger transaction task failed"),
            )),
        };

        self.finish(operation, started, result)
    }

    fn finish<T>(&self, operation: &'static str, started: Instant, result: BillingResult<T>) -> BillingResult<T> {
        let outcome = match &result {
            Ok(_) => "ok",
            Err(err) => err.code(),
        };
        self.observer.record(operation, outcome, started.elapsed());

        match &result {
            Err(err @ BillingError::Persistence(_)) => {
                error!(operation, db_error = ?err, "ledger: operation failed");
            }
            Err(BillingError::Timeout(_)) => {
                warn!(operation, "ledger: operation timed out");
            }
            _ => {}
        }

        result
    }

    fn reject<T>(&self, operation: &'static str, err: BillingError) -> BillingResult<T> {
        self.finish(operation, Instant::now(), Err(err))
    }
}

fn require_key(key: &str) -> BillingResult<()> {
    if key.trim().is_empty() {
        return Err(BillingError::validation("idempotency key is required"));
    }
    Ok(())
}

fn require_positive(amount: &Money) -> BillingResult<()> {
    if amount.amount <= 0 {
        return Err(BillingError::validation("amount must be positive"));
    }
    Ok(())
}

fn lock_existing_account(session: &mut dyn LedgerSession, account_id: i64) -> BillingResult<BillingAccountEntity> {
    session
        .lock_account(account_id)?
        .ok_or(BillingError::AccountNotFound)
}

/// Empty currency takes the account's; anything else must equal it.
fn resolve_currency(amount: Money, account: &BillingAccountEntity) -> BillingResult<Money> {
    let amount = amount.or_currency(&account.currency);
    if amount.currency != account.currency {
        return Err(BillingError::CurrencyMismatch("account"));
    }
    Ok(amount)
}

fn same_payment(
    existing: PaymentEntity,
    account_id: i64,
    signed_amount: &Money,
    invoice_id: Option<i64>,
) -> BillingResult<PaymentEntity> {
    if !existing.matches_request(account_id, signed_amount, invoice_id) {
        return Err(BillingError::IdempotencyConflict("payment"));
    }
    Ok(existing)
}

/// Stored payment for `key`, provided it was created by an identical request.
fn replay_payment(
    session: &mut dyn LedgerSession,
    key: &str,
    account_id: i64,
    signed_amount: &Money,
    invoice_id: Option<i64>,
) -> BillingResult<PaymentEntity> {
    let existing = session
        .find_payment_by_idempotency_key(key)?
        .ok_or_else(|| BillingError::Persistence(anyhow::anyhow!("payment {key} vanished after conflict")))?;

    same_payment(existing, account_id, signed_amount, invoice_id)
}

fn settle_invoice(
    session: &mut dyn LedgerSession,
    invoice: &InvoiceEntity,
    paid: &Money,
) -> BillingResult<()> {
    if !invoice.is_pending() {
        return Err(BillingError::InvoiceAlreadyPaid);
    }
    if invoice.amount > paid.amount {
        return Err(BillingError::PartialPaymentUnsupported);
    }
    session.mark_invoice_paid(invoice.id, Utc::now())?;
    Ok(())
}

#[async_trait]
impl<S, O> BillingService for LedgerUseCase<S, O>
where
    S: LedgerStore,
    O: LedgerObserver,
{
    async fn ensure_account(&self, user_id: i64) -> BillingResult<BillingAccountModel> {
        if user_id == 0 {
            return self.reject("ensure_account", BillingError::validation("user id is required"));
        }

        let currency = self.default_currency.clone();
        let account = self
            .run("ensure_account", move |session| {
                session.upsert_account(user_id, &currency)
            })
            .await?;

        info!(%user_id, account_id = account.id, "ledger: account ensured");
        Ok(account.into())
    }

    async fn get_account(&self, account_id: i64) -> BillingResult<BillingAccountModel> {
        let account = self
            .run("get_account", move |session| {
                session
                    .find_account(account_id)?
                    .ok_or(BillingError::AccountNotFound)
            })
            .await?;

        Ok(account.into())
    }

    async fn get_account_by_user_id(&self, user_id: i64) -> BillingResult<BillingAccountModel> {
        let account = self
            .run("get_account_by_user_id", move |session| {
                session
                    .find_account_by_user_id(user_id)?
                    .ok_or(BillingError::AccountNotFound)
            })
            .await?;

        Ok(account.into())
    }

    async fn create_invoice(&self, params: CreateInvoiceModel) -> BillingResult<InvoiceModel> {
        const OPERATION: &str = "create_invoice";

        if let Err(err) = require_key(&params.idempotency_key).and_then(|_| require_positive(&params.amount)) {
            return self.reject(OPERATION, err);
        }

        let (invoice, created) = self
            .run(OPERATION, move |session| {
                let account = session
                    .find_account(params.account_id)?
                    .ok_or(BillingError::AccountNotFound)?;
                let amount = resolve_currency(params.amount, &account)?;

                let insert_entity = InsertInvoiceEntity {
                    account_id: account.id,
                    amount: amount.amount,
                    currency: amount.currency.clone(),
                    description: Some(params.description).filter(|text| !text.is_empty()),
                    metadata: metadata_to_column(params.metadata),
                    idempotency_key: params.idempotency_key.clone(),
                    qr_id: params.qr_id.filter(|qr_id| !qr_id.is_empty()),
                    status: InvoiceStatus::Pending.to_string(),
                };

                if let Some(invoice) = session.insert_invoice(insert_entity)? {
                    return Ok((invoice, true));
                }

                let existing = session
                    .find_invoice_by_idempotency_key(&params.idempotency_key)?
                    .ok_or_else(|| {
                        BillingError::Persistence(anyhow::anyhow!("invoice vanished after conflict"))
                    })?;
                if existing.account_id != account.id || existing.amount() != amount {
                    return Err(BillingError::IdempotencyConflict("invoice"));
                }
                Ok((existing, false))
            })
            .await?;

        info!(
            account_id = invoice.account_id,
            invoice_id = invoice.id,
            amount = %invoice.amount(),
            created,
            "ledger: invoice ready"
        );
        InvoiceModel::try_from(invoice)
    }

    async fn get_invoice_by_id(&self, invoice_id: i64) -> BillingResult<InvoiceModel> {
        let invoice = self
            .run("get_invoice_by_id", move |session| {
                session
                    .find_invoice(invoice_id)?
                    .ok_or(BillingError::InvoiceNotFound)
            })
            .await?;

        InvoiceModel::try_from(invoice)
    }

    async fn get_invoice_by_idempotency_key(&self, key: &str) -> BillingResult<InvoiceModel> {
        const OPERATION: &str = "get_invoice_by_idempotency_key";

        if let Err(err) = require_key(key) {
            return self.reject(OPERATION, err);
        }

        let key = key.to_string();
        let invoice = self
            .run(OPERATION, move |session| {
                session
                    .find_invoice_by_idempotency_key(&key)?
                    .ok_or(BillingError::InvoiceNotFound)
            })
            .await?;

        InvoiceModel::try_from(invoice)
    }

    async fn get_invoice_by_qr_id(&self, qr_id: &str) -> BillingResult<InvoiceModel> {
        const OPERATION: &str = "get_invoice_by_qr_id";

        if qr_id.trim().is_empty() {
            return self.reject(OPERATION, BillingError::validation("qr id is required"));
        }

        let qr_id = qr_id.to_string();
        let invoice = self
            .run(OPERATION, move |session| {
                session
                    .find_invoice_by_qr_id(&qr_id)?
                    .ok_or(BillingError::InvoiceNotFound)
            })
            .await?;

        InvoiceModel::try_from(invoice)
    }

    async fn charge_account(&self, params: ChargeAccountModel) -> BillingResult<PaymentModel> {
        const OPERATION: &str = "charge_account";

        if let Err(err) = require_key(&params.idempotency_key).and_then(|_| require_positive(&params.amount)) {
            return self.reject(OPERATION, err);
        }

        let (payment, replayed) = self
            .run(OPERATION, move |session| {
                let account = lock_existing_account(session, params.account_id)?;
                let amount = resolve_currency(params.amount, &account)?;
                let debit = amount
                    .negated()
                    .ok_or_else(|| BillingError::validation("amount is out of range"))?;
                let key = params.idempotency_key;

                // A replay must not be judged against the balance it already reduced.
                if let Some(existing) = session.find_payment_by_idempotency_key(&key)? {
                    let existing = same_payment(existing, account.id, &debit, None)?;
                    return Ok((existing, true));
                }

                if account.balance < amount.amount {
                    return Err(BillingError::InsufficientFunds);
                }

                let now = Utc::now();
                let insert_entity = InsertPaymentEntity {
                    account_id: account.id,
                    invoice_id: None,
                    amount: debit.amount,
                    currency: debit.currency.clone(),
                    description: Some(params.description).filter(|text| !text.is_empty()),
                    metadata: metadata_to_column(params.metadata),
                    idempotency_key: key.clone(),
                    status: PaymentStatus::Completed.to_string(),
                    completed_at: Some(now),
                };

                let Some(payment) = session.insert_payment(insert_entity)? else {
                    let existing = replay_payment(session, &key, account.id, &debit, None)?;
                    return Ok((existing, true));
                };

                session.adjust_balance(account.id, debit.amount, now)?;
                Ok((payment, false))
            })
            .await?;

        info!(
            account_id = payment.account_id,
            payment_id = payment.id,
            amount = %payment.amount(),
            replayed,
            "ledger: account charged"
        );
        PaymentModel::try_from(payment)
    }

    async fn register_incoming_payment(
        &self,
        params: RegisterIncomingPaymentModel,
    ) -> BillingResult<PaymentModel> {
        const OPERATION: &str = "register_incoming_payment";

        if let Err(err) = require_key(&params.idempotency_key).and_then(|_| require_positive(&params.amount)) {
            return self.reject(OPERATION, err);
        }

        let (payment, replayed) = self
            .run(OPERATION, move |session| {
                let account = lock_existing_account(session, params.account_id)?;
                let amount = resolve_currency(params.amount, &account)?;

                let invoice = match params.invoice_id {
                    Some(invoice_id) => {
                        let invoice = session
                            .lock_invoice(invoice_id)?
                            .ok_or(BillingError::InvoiceNotFound)?;
                        if invoice.account_id != account.id {
                            return Err(BillingError::validation(
                                "invoice does not belong to the account",
                            ));
                        }
                        if invoice.currency != amount.currency {
                            return Err(BillingError::CurrencyMismatch("invoice"));
                        }
                        Some(invoice)
                    }
                    None => None,
                };

                let key = params.idempotency_key;
                let insert_entity = InsertPaymentEntity {
                    account_id: account.id,
                    invoice_id: params.invoice_id,
                    amount: amount.amount,
                    currency: amount.currency.clone(),
                    description: None,
                    metadata: metadata_to_column(params.metadata),
                    idempotency_key: key.clone(),
                    status: PaymentStatus::Pending.to_string(),
                    completed_at: None,
                };

                let Some(pending) = session.insert_payment(insert_entity)? else {
                    let existing = replay_payment(session, &key, account.id, &amount, params.invoice_id)?;
                    return Ok((existing, true));
                };

                let now = Utc::now();
                session.adjust_balance(account.id, amount.amount, now)?;
                let payment = session.complete_payment(pending.id, now)?;

                if let Some(invoice) = &invoice {
                    settle_invoice(session, invoice, &amount)?;
                }

                Ok((payment, false))
            })
            .await?;

        info!(
            account_id = payment.account_id,
            payment_id = payment.id,
            invoice_id = ?payment.invoice_id,
            amount = %payment.amount(),
            replayed,
            "ledger: incoming payment registered"
        );
        PaymentModel::try_from(payment)
    }
}
