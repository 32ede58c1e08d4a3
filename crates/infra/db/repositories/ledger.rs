use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use chrono::{DateTime, Utc};
use diesel::{
    Connection, PgConnection, RunQueryDsl, insert_into,
    prelude::*,
    result::{DatabaseErrorKind, Error as DieselError},
    update,
};

use crate::{
    domain,
    infra::db::postgres::{
        postgres_connection::PgPoolSquad,
        schema::{billing_accounts, billing_invoices, billing_payments},
    },
};
use domain::{
    entities::{
        billing_accounts::{BillingAccountEntity, InsertBillingAccountEntity},
        invoices::{InsertInvoiceEntity, InvoiceEntity},
        payments::{InsertPaymentEntity, PaymentEntity},
    },
    errors::{BillingError, BillingResult},
    repositories::ledger::{LedgerSession, LedgerStore},
    value_objects::enums::{invoice_statuses::InvoiceStatus, payment_statuses::PaymentStatus},
};

pub struct LedgerPostgres {
    db_pool: Arc<PgPoolSquad>,
}

impl LedgerPostgres {
    pub fn new(db_pool: Arc<PgPoolSquad>) -> Self {
        Self { db_pool }
    }
}

impl LedgerStore for LedgerPostgres {
    fn transaction<T, F>(&self, deadline: Instant, work: F) -> BillingResult<T>
    where
        F: FnOnce(&mut dyn LedgerSession) -> BillingResult<T>,
    {
        let remaining = remaining_until(deadline)?;
        let mut pooled = self
            .db_pool
            .get_timeout(remaining)
            .map_err(|_| BillingError::Timeout(Duration::ZERO))?;
        let conn: &mut PgConnection = &mut pooled;

        let millis = remaining_until(deadline)?.as_millis().max(1);

        conn.transaction::<T, BillingError, _>(|conn| {
            diesel::sql_query(format!("SET LOCAL statement_timeout = {millis}")).execute(conn)?;
            diesel::sql_query(format!("SET LOCAL lock_timeout = {millis}")).execute(conn)?;

            let mut session = PgLedgerSession { conn };
            let result = work(&mut session)?;

            // Returning an error here makes diesel roll back instead of committing late work.
            remaining_until(deadline)?;
            Ok(result)
        })
    }
}

fn remaining_until(deadline: Instant) -> BillingResult<Duration> {
    let remaining = deadline.saturating_duration_since(Instant::now());
    if remaining.is_zero() {
        return Err(BillingError::Timeout(Duration::ZERO));
    }
    Ok(remaining)
}

struct PgLedgerSession<'a> {
    conn: &'a mut PgConnection,
}

impl LedgerSession for PgLedgerSession<'_> {
    fn upsert_account(&mut self, user_id: i64, currency: &str) -> BillingResult<BillingAccountEntity> {
        let insert_entity = InsertBillingAccountEntity {
            user_id,
            currency: currency.to_string(),
        };

        let account = insert_into(billing_accounts::table)
            .values(&insert_entity)
            .on_conflict(billing_accounts::user_id)
            .do_update()
            .set(billing_accounts::updated_at.eq(Utc::now()))
            .returning(BillingAccountEntity::as_returning())
            .get_result::<BillingAccountEntity>(self.conn)?;

        Ok(account)
    }

    fn find_account(&mut self, account_id: i64) -> BillingResult<Option<BillingAccountEntity>> {
        let account = billing_accounts::table
            .find(account_id)
            .select(BillingAccountEntity::as_select())
            .first::<BillingAccountEntity>(self.conn)
            .optional()?;

        Ok(account)
    }

    fn find_account_by_user_id(&mut self, user_id: i64) -> BillingResult<Option<BillingAccountEntity>> {
        let account = billing_accounts::table
            .filter(billing_accounts::user_id.eq(user_id))
            .select(BillingAccountEntity::as_select())
            .first::<BillingAccountEntity>(self.conn)
            .optional()?;

        Ok(account)
    }

    fn lock_account(&mut self, account_id: i64) -> BillingResult<Option<BillingAccountEntity>> {
        let account = billing_accounts::table
            .find(account_id)
            .select(BillingAccountEntity::as_select())
            .for_update()
            .first::<BillingAccountEntity>(self.conn)
            .optional()?;

        Ok(account)
    }

    fn adjust_balance(
        &mut self,
        account_id: i64,
        delta: i64,
        now: DateTime<Utc>,
    ) -> BillingResult<BillingAccountEntity> {
        let account = update(billing_accounts::table.find(account_id))
            .set((
                billing_accounts::balance.eq(billing_accounts::balance + delta),
                billing_accounts::updated_at.eq(now),
            ))
            .returning(BillingAccountEntity::as_returning())
            .get_result::<BillingAccountEntity>(self.conn)?;

        Ok(account)
    }

    fn find_invoice(&mut self, invoice_id: i64) -> BillingResult<Option<InvoiceEntity>> {
        let invoice = billing_invoices::table
            .find(invoice_id)
            .select(InvoiceEntity::as_select())
            .first::<InvoiceEntity>(self.conn)
            .optional()?;

        Ok(invoice)
    }

    fn find_invoice_by_idempotency_key(&mut self, key: &str) -> BillingResult<Option<InvoiceEntity>> {
        let invoice = billing_invoices::table
            .filter(billing_invoices::idempotency_key.eq(key))
            .select(InvoiceEntity::as_select())
            .first::<InvoiceEntity>(self.conn)
            .optional()?;

        Ok(invoice)
    }

    fn find_invoice_by_qr_id(&mut self, qr_id: &str) -> BillingResult<Option<InvoiceEntity>> {
        let invoice = billing_invoices::table
            .filter(billing_invoices::qr_id.eq(qr_id))
            .select(InvoiceEntity::as_select())
            .first::<InvoiceEntity>(self.conn)
            .optional()?;

        Ok(invoice)
    }

    fn lock_invoice(&mut self, invoice_id: i64) -> BillingResult<Option<InvoiceEntity>> {
        let invoice = billing_invoices::table
            .find(invoice_id)
            .select(InvoiceEntity::as_select())
            .for_update()
            .first::<InvoiceEntity>(self.conn)
            .optional()?;

        Ok(invoice)
    }

    fn insert_invoice(&mut self, invoice: InsertInvoiceEntity) -> BillingResult<Option<InvoiceEntity>> {
        let inserted = insert_into(billing_invoices::table)
            .values(&invoice)
            .on_conflict(billing_invoices::idempotency_key)
            .do_nothing()
            .returning(InvoiceEntity::as_returning())
            .get_result::<InvoiceEntity>(self.conn)
            .optional();

        match inserted {
            Ok(invoice) => Ok(invoice),
            // qr_id is unique as well; another invoice already owns this QR code
            Err(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) => {
                Err(BillingError::IdempotencyConflict("invoice"))
            }
            Err(err) => Err(err.into()),
        }
    }

    fn mark_invoice_paid(&mut self, invoice_id: i64, paid_at: DateTime<Utc>) -> BillingResult<InvoiceEntity> {
        let invoice = update(billing_invoices::table.find(invoice_id))
            .set((
                billing_invoices::status.eq(InvoiceStatus::Paid.to_string()),
                billing_invoices::paid_at.eq(Some(paid_at)),
                billing_invoices::updated_at.eq(paid_at),
            ))
            .returning(InvoiceEntity::as_returning())
            .get_result::<InvoiceEntity>(self.conn)?;

        Ok(invoice)
    }

    fn find_payment_by_idempotency_key(&mut self, key: &str) -> BillingResult<Option<PaymentEntity>> {
        let payment = billing_payments::table
            .filter(billing_payments::idempotency_key.eq(key))
            .select(PaymentEntity::as_select())
            .first::<PaymentEntity>(self.conn)
            .optional()?;

        Ok(payment)
    }

    fn insert_payment(&mut self, payment: InsertPaymentEntity) -> BillingResult<Option<PaymentEntity>> {
        let inserted = insert_into(billing_payments::table)
            .values(&payment)
            .on_conflict(billing_payments::idempotency_key)
            .do_nothing()
            .returning(PaymentEntity::as_returning())
            .get_result::<PaymentEntity>(self.conn)
            .optional()?;

        Ok(inserted)
    }

    fn complete_payment(
        &mut self,
        payment_id: i64,
        completed_at: DateTime<Utc>,
    ) -> BillingResult<PaymentEntity> {
        let payment = update(billing_payments::table.find(payment_id))
            .set((
                billing_payments::status.eq(PaymentStatus::Completed.to_string()),
                billing_payments::completed_at.eq(Some(completed_at)),
                billing_payments::updated_at.eq(completed_at),
            ))
            .returning(PaymentEntity::as_returning())
            .get_result::<PaymentEntity>(self.conn)?;

        Ok(payment)
    }
}
