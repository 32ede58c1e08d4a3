use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post},
};
use axum_extra::extract::WithRejection;
use crates::domain::{
    repositories::billing::BillingService,
    value_objects::billing::{BillingAccountModel, ChargeAccountModel, EnsureAccountModel, PaymentModel},
};

use crate::axum_http::error_responses::ApiError;

pub fn routes<B>(billing: Arc<B>) -> Router
where
    B: BillingService + 'static,
{
    Router::new()
        .route("/ensure", post(ensure_account::<B>))
        .route("/charge", post(charge_account::<B>))
        .route("/by-user/:user_id", get(get_account_by_user_id::<B>))
        .route("/:account_id", get(get_account::<B>))
        .with_state(billing)
}

pub async fn ensure_account<B>(
    State(billing): State<Arc<B>>,
    WithRejection(Json(body), _): WithRejection<Json<EnsureAccountModel>, ApiError>,
) -> Result<Json<BillingAccountModel>, ApiError>
where
    B: BillingService,
{
    let account = billing.ensure_account(body.user_id).await?;
    Ok(Json(account))
}

pub async fn get_account<B>(
    State(billing): State<Arc<B>>,
    WithRejection(Path(account_id), _): WithRejection<Path<i64>, ApiError>,
) -> Result<Json<BillingAccountModel>, ApiError>
where
    B: BillingService,
{
    Ok(Json(billing.get_account(account_id).await?))
}

pub async fn get_account_by_user_id<B>(
    State(billing): State<Arc<B>>,
    WithRejection(Path(user_id), _): WithRejection<Path<i64>, ApiError>,
) -> Result<Json<BillingAccountModel>, ApiError>
where
    B: BillingService,
{
    Ok(Json(billing.get_account_by_user_id(user_id).await?))
}

pub async fn charge_account<B>(
    State(billing): State<Arc<B>>,
    WithRejection(Json(body), _): WithRejection<Json<ChargeAccountModel>, ApiError>,
) -> Result<Json<PaymentModel>, ApiError>
where
    B: BillingService,
{
    let payment = billing.charge_account(body).await?;
    Ok(Json(payment))
}
