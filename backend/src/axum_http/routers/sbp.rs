use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Query, State},
    http::HeaderMap,
    routing::post,
};
use axum_extra::extract::WithRejection;
use crates::domain::{
    repositories::billing::BillingService,
    value_objects::sbp::{CreateSbpInvoiceModel, CreateSbpInvoiceResultModel, SbpWebhookAckModel},
};
use serde::Deserialize;
use subtle::ConstantTimeEq;
use tracing::warn;

use crate::{
    axum_http::error_responses::ApiError,
    usecases::sbp::{SbpQrGateway, SbpUseCase},
};

pub const WEBHOOK_SECRET_HEADER: &str = "x-webhook-secret";

pub struct SbpRoutesState<B, G>
where
    B: BillingService + 'static,
    G: SbpQrGateway + 'static,
{
    pub usecase: Arc<SbpUseCase<B, G>>,
    pub webhook_secret: Option<String>,
}

impl<B, G> Clone for SbpRoutesState<B, G>
where
    B: BillingService + 'static,
    G: SbpQrGateway + 'static,
{
    fn clone(&self) -> Self {
        Self {
            usecase: Arc::clone(&self.usecase),
            webhook_secret: self.webhook_secret.clone(),
        }
    }
}

/// `/invoices`, mounted behind the API token.
pub fn invoice_routes<B, G>(state: SbpRoutesState<B, G>) -> Router
where
    B: BillingService + 'static,
    G: SbpQrGateway + 'static,
{
    Router::new()
        .route("/invoices", post(create_invoice_with_qr_code::<B, G>))
        .with_state(state)
}

/// `/webhook`, called by the bank; guarded only by the optional shared secret.
pub fn webhook_routes<B, G>(state: SbpRoutesState<B, G>) -> Router
where
    B: BillingService + 'static,
    G: SbpQrGateway + 'static,
{
    Router::new()
        .route("/webhook", post(webhook::<B, G>))
        .with_state(state)
}

pub async fn create_invoice_with_qr_code<B, G>(
    State(state): State<SbpRoutesState<B, G>>,
    WithRejection(Json(body), _): WithRejection<Json<CreateSbpInvoiceModel>, ApiError>,
) -> Result<Json<CreateSbpInvoiceResultModel>, ApiError>
where
    B: BillingService + 'static,
    G: SbpQrGateway + 'static,
{
    let result = state.usecase.create_invoice_with_qr_code(body).await?;
    Ok(Json(result))
}

#[derive(Debug, Default, Deserialize)]
pub struct WebhookQuery {
    #[serde(default)]
    pub token: Option<String>,
}

pub async fn webhook<B, G>(
    State(state): State<SbpRoutesState<B, G>>,
    Query(query): Query<WebhookQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<SbpWebhookAckModel>, ApiError>
where
    B: BillingService + 'static,
    G: SbpQrGateway + 'static,
{
    if let Some(secret) = state.webhook_secret.as_deref() {
        let presented = headers
            .get(WEBHOOK_SECRET_HEADER)
            .and_then(|value| value.to_str().ok())
            .or(query.token.as_deref())
            .unwrap_or_default();

        if !bool::from(secret.as_bytes().ct_eq(presented.as_bytes())) {
            warn!("sbp: webhook rejected, shared secret mismatch");
            return Err(ApiError::unauthorized());
        }
    }

    let payment = state.usecase.handle_webhook(&body).await?;
    Ok(Json(SbpWebhookAckModel {
        status: "ok".to_string(),
        payment_id: payment.id,
    }))
}
