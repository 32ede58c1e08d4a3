use chrono::{DateTime, Utc};
use diesel::prelude::*;

use crate::{
    domain::value_objects::{billing::BillingAccountModel, money::Money},
    infra::db::postgres::schema::billing_accounts,
};

#[derive(Debug, Clone, PartialEq, Identifiable, Selectable, Queryable)]
#[diesel(table_name = billing_accounts)]
pub struct BillingAccountEntity {
    pub id: i64,
    pub user_id: i64,
    pub balance: i64,
    pub currency: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = billing_accounts)]
pub struct InsertBillingAccountEntity {
    pub user_id: i64,
    pub currency: String,
}

impl BillingAccountEntity {
    pub fn balance(&self) -> Money {
        Money::new(self.balance, self.currency.clone())
    }
}

impl From<BillingAccountEntity> for BillingAccountModel {
    fn from(value: BillingAccountEntity) -> Self {
        Self {
            balance: value.balance(),
            id: value.id,
            user_id: value.user_id,
            created_at: value.created_at,
            updated_at: value.updated_at,
        }
    }
}
