use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post},
};
use axum_extra::extract::WithRejection;
use crates::domain::{
    repositories::billing::BillingService,
    value_objects::billing::{CreateInvoiceModel, InvoiceModel},
};

use crate::axum_http::error_responses::ApiError;

pub fn routes<B>(billing: Arc<B>) -> Router
where
    B: BillingService + 'static,
{
    Router::new()
        .route("/", post(create_invoice::<B>))
        .route("/:invoice_id", get(get_invoice::<B>))
        .route("/idempotency/:key", get(get_invoice_by_idempotency_key::<B>))
        .route("/qr/:qr_id", get(get_invoice_by_qr_id::<B>))
        .with_state(billing)
}

pub async fn create_invoice<B>(
    State(billing): State<Arc<B>>,
    WithRejection(Json(body), _): WithRejection<Json<CreateInvoiceModel>, ApiError>,
) -> Result<Json<InvoiceModel>, ApiError>
where
    B: BillingService,
{
    Ok(Json(billing.create_invoice(body).await?))
}

pub async fn get_invoice<B>(
    State(billing): State<Arc<B>>,
    WithRejection(Path(invoice_id), _): WithRejection<Path<i64>, ApiError>,
) -> Result<Json<InvoiceModel>, ApiError>
where
    B: BillingService,
{
    Ok(Json(billing.get_invoice_by_id(invoice_id).await?))
}

pub async fn get_invoice_by_idempotency_key<B>(
    State(billing): State<Arc<B>>,
    WithRejection(Path(key), _): WithRejection<Path<String>, ApiError>,
) -> Result<Json<InvoiceModel>, ApiError>
where
    B: BillingService,
{
    Ok(Json(billing.get_invoice_by_idempotency_key(&key).await?))
}

pub async fn get_invoice_by_qr_id<B>(
    State(billing): State<Arc<B>>,
    WithRejection(Path(qr_id), _): WithRejection<Path<String>, ApiError>,
) -> Result<Json<InvoiceModel>, ApiError>
where
    B: BillingService,
{
    Ok(Json(billing.get_invoice_by_qr_id(&qr_id).await?))
}
