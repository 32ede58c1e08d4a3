use crate::{
    axum_http::{
        auth::{self, ApiToken},
        default_routers,
        routers::{self, sbp::SbpRoutesState},
    },
    config::config_model::{DotEnvyConfig, Tochka},
    usecases::{
        ledger::LedgerUseCase,
        sbp::{SbpQrGateway, SbpUseCase},
    },
};
use anyhow::{Context, Result};
use axum::{
    Router,
    http::{
        HeaderName, Method,
        header::{AUTHORIZATION, CONTENT_TYPE},
    },
    middleware,
    routing::get,
};
use crates::{
    domain::repositories::billing::BillingService,
    infra::db::{postgres::postgres_connection::PgPoolSquad, repositories::ledger::LedgerPostgres},
    observability::{ledger_observer::TracingLedgerObserver, slow_operation_threshold},
    payments::{
        tochka_client::{TochkaClient, TochkaConfig},
        tochka_webhook::decoding_key_from_jwk,
    },
};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower_http::{
    cors::{Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{error, info};

/// Builds the routing tree without transport layers; SBP routes exist only when `sbp` is set.
pub fn app<B, G>(billing: Arc<B>, sbp: Option<SbpRoutesState<B, G>>, api_token: ApiToken) -> Router
where
    B: BillingService + 'static,
    G: SbpQrGateway + 'static,
{
    let mut protected = Router::new()
        .nest("/api/v1/accounts", routers::accounts::routes(Arc::clone(&billing)))
        .nest("/api/v1/invoices", routers::invoices::routes(Arc::clone(&billing)))
        .nest("/api/v1/payments", routers::payments::routes(billing));

    let mut public = Router::new().route("/api/v1/health-check", get(default_routers::health_check));

    if let Some(sbp) = sbp {
        protected = protected.nest("/api/v1/sbp", routers::sbp::invoice_routes(sbp.clone()));
        public = public.nest("/api/v1/sbp", routers::sbp::webhook_routes(sbp));
    }

    protected
        .route_layer(middleware::from_fn_with_state(api_token, auth::require_api_token))
        .merge(public)
        .fallback(default_routers::not_found)
}

pub async fn start(config: Arc<DotEnvyConfig>, db_pool: Arc<PgPoolSquad>) -> Result<()> {
    let ledger_repository = LedgerPostgres::new(Arc::clone(&db_pool));
    let ledger_usecase = Arc::new(LedgerUseCase::new(
        Arc::new(ledger_repository),
        Arc::new(TracingLedgerObserver::new(slow_operation_threshold())),
        config.billing.default_currency.clone(),
        Duration::from_secs(config.billing.query_timeout_secs),
    ));

    let sbp = match &config.tochka {
        Some(tochka) => Some(sbp_routes_state(tochka, Arc::clone(&ledger_usecase))?),
        None => {
            info!("Tochka credentials are not configured, SBP routes are disabled");
            None
        }
    };

    let app = app(ledger_usecase, sbp, ApiToken::new(config.billing.api_token.clone()))
        .layer(TimeoutLayer::new(Duration::from_secs(
            config.backend_server.timeout,
        )))
        .layer(RequestBodyLimitLayer::new(
            (config.backend_server.body_limit * 1024 * 1024).try_into()?,
        ))
        .layer(
            CorsLayer::new()
                .allow_methods([Method::GET, Method::POST])
                .allow_headers([
                    AUTHORIZATION,
                    CONTENT_TYPE,
                    HeaderName::from_static(auth::API_TOKEN_HEADER),
                ])
                .allow_origin(Any),
        )
        .layer(TraceLayer::new_for_http());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.backend_server.port));
    let listener = TcpListener::bind(addr).await?;

    info!("Server is running on port {}", config.backend_server.port);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

fn sbp_routes_state<B>(tochka: &Tochka, billing: Arc<B>) -> Result<SbpRoutesState<B, TochkaClient>>
where
    B: BillingService + 'static,
{
    let client = TochkaClient::new(TochkaConfig {
        base_url: tochka.base_url.clone(),
        api_version: tochka.api_version.clone(),
        merchant_id: tochka.merchant_id.clone(),
        account_id: tochka.account_id.clone(),
        access_token: tochka.access_token.clone(),
        timeout: Duration::from_secs(tochka.timeout_secs),
        source_name: tochka.source_name.clone(),
        redirect_url: tochka.redirect_url.clone(),
    })?;

    let webhook_key = tochka
        .webhook_public_key
        .as_deref()
        .map(decoding_key_from_jwk)
        .transpose()
        .context("TOCHKA_WEBHOOK_PUBLIC_KEY is invalid")?;

    info!(
        merchant_id = %tochka.merchant_id,
        signed_webhooks = webhook_key.is_some(),
        "SBP routes enabled"
    );

    Ok(SbpRoutesState {
        usecase: Arc::new(SbpUseCase::new(
            billing,
            Arc::new(client),
            tochka.notification_url.clone(),
            webhook_key,
        )),
        webhook_secret: tochka.webhook_secret.clone(),
    })
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received ctrl+C signal"),
        Err(err) => {
            error!(error = %err, "Failed to install CTRL+C signal handler");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usecases::sbp::MockSbpQrGateway;
    use axum::{
        body::{Body, to_bytes},
        http::{Request, StatusCode},
        response::Response,
    };
    use chrono::Utc;
    use crates::domain::{
        errors::BillingError,
        repositories::billing::MockBillingService,
        value_objects::{
            billing::{BillingAccountModel, InvoiceModel, PaymentModel},
            enums::{invoice_statuses::InvoiceStatus, payment_statuses::PaymentStatus},
            money::Money,
        },
    };
    use serde_json::{Value, json};
    use tower::ServiceExt;

    const TOKEN: &str = "test-token";

    fn account(id: i64, user_id: i64) -> BillingAccountModel {
        let now = Utc::now();
        BillingAccountModel {
            id,
            user_id,
            balance: Money::new(500, "RUB"),
            created_at: now,
            updated_at: now,
        }
    }

    fn router(billing: MockBillingService) -> Router {
        app::<MockBillingService, MockSbpQrGateway>(Arc::new(billing), None, ApiToken::new(TOKEN))
    }

    fn sbp_router(billing: MockBillingService, webhook_secret: Option<&str>) -> Router {
        let billing = Arc::new(billing);
        let state = SbpRoutesState {
            usecase: Arc::new(SbpUseCase::new(
                Arc::clone(&billing),
                Arc::new(MockSbpQrGateway::new()),
                String::new(),
                None,
            )),
            webhook_secret: webhook_secret.map(str::to_string),
        };
        app(billing, Some(state), ApiToken::new(TOKEN))
    }

    fn get(uri: &str) -> Request<Body> {
        Request::get(uri)
            .header("authorization", format!("Bearer {TOKEN}"))
            .body(Body::empty())
            .unwrap()
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::post(uri)
            .header("authorization", format!("Bearer {TOKEN}"))
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_check_is_public() {
        let response = router(MockBillingService::new())
            .oneshot(Request::get("/api/v1/health-check").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"OK");
    }

    #[tokio::test]
    async fn requests_without_token_are_rejected() {
        let mut billing = MockBillingService::new();
        billing.expect_get_account().never();

        let response = router(billing)
            .oneshot(Request::get("/api/v1/accounts/1").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(json_body(response).await["code"], "unauthorized");
    }

    #[tokio::test]
    async fn wrong_token_is_rejected() {
        let request = Request::get("/api/v1/accounts/1")
            .header("x-api-token", "nope")
            .body(Body::empty())
            .unwrap();

        let response = router(MockBillingService::new()).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn ensure_account_returns_the_account() {
        let mut billing = MockBillingService::new();
        billing
            .expect_ensure_account()
            .with(mockall::predicate::eq(42))
            .times(1)
            .returning(|user_id| Ok(account(7, user_id)));

        let response = router(billing)
            .oneshot(post_json("/api/v1/accounts/ensure", json!({"user_id": 42})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["id"], 7);
        assert_eq!(body["user_id"], 42);
        assert_eq!(body["balance"]["amount"], 500);
    }

    #[tokio::test]
    async fn x_api_token_header_is_accepted() {
        let mut billing = MockBillingService::new();
        billing
            .expect_get_account_by_user_id()
            .returning(|user_id| Ok(account(7, user_id)));

        let request = Request::get("/api/v1/accounts/by-user/42")
            .header("x-api-token", TOKEN)
            .body(Body::empty())
            .unwrap();

        let response = router(billing).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn domain_errors_keep_their_code() {
        let mut billing = MockBillingService::new();
        billing
            .expect_charge_account()
            .returning(|_| Err(BillingError::InsufficientFunds));
        billing
            .expect_get_invoice_by_id()
            .returning(|_| Err(BillingError::InvoiceNotFound));
        let router = router(billing);

        let response = router
            .clone()
            .oneshot(post_json(
                "/api/v1/accounts/charge",
                json!({"account_id": 7, "amount": {"amount": 900, "currency": "RUB"}, "idempotency_key": "c1"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let body = json_body(response).await;
        assert_eq!(body["code"], "insufficient_funds");
        assert_eq!(body["error"], "insufficient funds");

        let response = router.oneshot(get("/api/v1/invoices/99")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(json_body(response).await["code"], "invoice_not_found");
    }

    #[tokio::test]
    async fn internal_errors_are_opaque() {
        let mut billing = MockBillingService::new();
        billing
            .expect_get_account()
            .returning(|_| Err(BillingError::Persistence(anyhow::anyhow!("connection refused"))));

        let response = router(billing).oneshot(get("/api/v1/accounts/1")).await.unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = json_body(response).await;
        assert_eq!(body["code"], "internal_error");
        assert_eq!(body["error"], "internal server error");
    }

    #[tokio::test]
    async fn malformed_input_is_an_invalid_request() {
        let router = router(MockBillingService::new());

        let request = Request::post("/api/v1/invoices")
            .header("authorization", TOKEN)
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let response = router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["code"], "invalid_request");

        let response = router.oneshot(get("/api/v1/accounts/abc")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["code"], "invalid_request");
    }

    #[tokio::test]
    async fn invoice_lookup_by_idempotency_key() {
        let mut billing = MockBillingService::new();
        billing
            .expect_get_invoice_by_idempotency_key()
            .withf(|key| key == "order-1")
            .returning(|key| {
                let now = Utc::now();
                Ok(InvoiceModel {
                    id: 3,
                    account_id: 7,
                    amount: Money::new(19_900, "RUB"),
                    description: String::new(),
                    metadata: None,
                    status: InvoiceStatus::Pending,
                    idempotency_key: key.to_string(),
                    qr_id: None,
                    created_at: now,
                    updated_at: now,
                    paid_at: None,
                })
            });

        let response = router(billing)
            .oneshot(get("/api/v1/invoices/idempotency/order-1"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["status"], "pending");
    }

    #[tokio::test]
    async fn unknown_routes_and_disabled_sbp_are_not_found() {
        let router = router(MockBillingService::new());

        let response = router.clone().oneshot(get("/api/v1/nope")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = router
            .oneshot(post_json("/api/v1/sbp/invoices", json!({"user_id": 1, "amount": 100})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    fn webhook_request(uri: &str) -> Request<Body> {
        Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(
                json!({"operationId": "op-1", "qrcId": "AS1000", "amount": "199.00"}).to_string(),
            ))
            .unwrap()
    }

    #[tokio::test]
    async fn webhook_requires_the_shared_secret_when_configured() {
        let mut billing = MockBillingService::new();
        billing.expect_get_invoice_by_qr_id().never();

        let response = sbp_router(billing, Some("hook"))
            .oneshot(webhook_request("/api/v1/sbp/webhook"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn webhook_credits_the_invoice_without_api_token() {
        let mut billing = MockBillingService::new();
        billing.expect_get_invoice_by_qr_id().returning(|qr_id| {
            let now = Utc::now();
            Ok(InvoiceModel {
                id: 3,
                account_id: 7,
                amount: Money::new(19_900, "RUB"),
                description: String::new(),
                metadata: None,
                status: InvoiceStatus::Pending,
                idempotency_key: "order-1".to_string(),
                qr_id: Some(qr_id.to_string()),
                created_at: now,
                updated_at: now,
                paid_at: None,
            })
        });
        billing.expect_register_incoming_payment().returning(|params| {
            let now = Utc::now();
            Ok(PaymentModel {
                id: 55,
                account_id: params.account_id,
                invoice_id: params.invoice_id,
                amount: params.amount,
                description: None,
                metadata: params.metadata,
                status: PaymentStatus::Completed,
                idempotency_key: params.idempotency_key,
                created_at: now,
                updated_at: now,
                completed_at: Some(now),
            })
        });

        let response = sbp_router(billing, Some("hook"))
            .oneshot(webhook_request("/api/v1/sbp/webhook?token=hook"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await, json!({"status": "ok", "payment_id": 55}));
    }

    #[tokio::test]
    async fn sbp_invoice_route_stays_behind_the_api_token() {
        let request = Request::post("/api/v1/sbp/invoices")
            .header("content-type", "application/json")
            .body(Body::from(json!({"user_id": 1, "amount": 100}).to_string()))
            .unwrap();

        let response = sbp_router(MockBillingService::new(), None)
            .oneshot(request)
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
