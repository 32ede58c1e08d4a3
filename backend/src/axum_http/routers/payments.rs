use std::sync::Arc;

use axum::{Json, Router, extract::State, routing::post};
use axum_extra::extract::WithRejection;
use crates::domain::{
    repositories::billing::BillingService,
    value_objects::billing::{PaymentModel, RegisterIncomingPaymentModel},
};

use crate::axum_http::error_responses::ApiError;

pub fn routes<B>(billing: Arc<B>) -> Router
where
    B: BillingService + 'static,
{
    Router::new()
        .route("/incoming", post(register_incoming_payment::<B>))
        .with_state(billing)
}

pub async fn register_incoming_payment<B>(
    State(billing): State<Arc<B>>,
    WithRejection(Json(body), _): WithRejection<Json<RegisterIncomingPaymentModel>, ApiError>,
) -> Result<Json<PaymentModel>, ApiError>
where
    B: BillingService,
{
    Ok(Json(billing.register_incoming_payment(body).await?))
}
