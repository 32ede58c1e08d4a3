use std::sync::Arc;

use anyhow::Result as AnyResult;
use async_trait::async_trait;
use axum::http::StatusCode;
use crates::{
    domain::{
        errors::BillingError,
        repositories::billing::BillingService,
        value_objects::{
            billing::{
                CreateInvoiceModel, InvoiceModel, Metadata, PaymentModel, RegisterIncomingPaymentModel,
            },
            money::Money,
            sbp::{CreateSbpInvoiceModel, CreateSbpInvoiceResultModel, InvoiceSbpMetadata, SbpQrCodeDto},
        },
    },
    payments::{
        tochka_client::{RegisterQrCodeRequest, RegisterQrCodeResponse, TochkaClient},
        tochka_webhook::{IncomingPaymentNotification, WebhookError, parse_sbp_webhook},
    },
};
use jsonwebtoken::DecodingKey;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

pub const SBP_PROVIDER: &str = "tochka";

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SbpQrGateway: Send + Sync {
    async fn register_qr_code(&self, request: RegisterQrCodeRequest) -> AnyResult<RegisterQrCodeResponse>;
}

#[async_trait]
impl SbpQrGateway for TochkaClient {
    async fn register_qr_code(&self, request: RegisterQrCodeRequest) -> AnyResult<RegisterQrCodeResponse> {
        self.register_qr_code(&request).await
    }
}

#[derive(Debug, Error)]
pub enum SbpError {
    #[error("{0}")]
    Validation(String),
    #[error("webhook missing qr id")]
    MissingQrId,
    #[error(transparent)]
    Webhook(#[from] WebhookError),
    #[error("qr provider request failed")]
    Provider(#[source] anyhow::Error),
    #[error(transparent)]
    Billing(#[from] BillingError),
}

impl SbpError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            SbpError::Validation(_) | SbpError::MissingQrId => StatusCode::BAD_REQUEST,
            SbpError::Webhook(WebhookError::InvalidSignature | WebhookError::UnsupportedAlgorithm) => {
                StatusCode::UNAUTHORIZED
            }
            SbpError::Webhook(_) => StatusCode::BAD_REQUEST,
            SbpError::Provider(_) => StatusCode::BAD_GATEWAY,
            SbpError::Billing(err) => crate::axum_http::error_responses::billing_status(err),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            SbpError::Validation(_) | SbpError::MissingQrId => "invalid_request",
            SbpError::Webhook(WebhookError::InvalidSignature | WebhookError::UnsupportedAlgorithm) => {
                "unauthorized"
            }
            SbpError::Webhook(_) => "invalid_request",
            SbpError::Provider(_) => "provider_error",
            SbpError::Billing(err) => err.code(),
        }
    }
}

pub type UseCaseResult<T> = std::result::Result<T, SbpError>;

pub struct SbpUseCase<B, G>
where
    B: BillingService + 'static,
    G: SbpQrGateway + 'static,
{
    billing: Arc<B>,
    gateway: Arc<G>,
    notification_url: String,
    webhook_key: Option<DecodingKey>,
}

impl<B, G> SbpUseCase<B, G>
where
    B: BillingService + 'static,
    G: SbpQrGateway + 'static,
{
    pub fn new(
        billing: Arc<B>,
        gateway: Arc<G>,
        notification_url: String,
        webhook_key: Option<DecodingKey>,
    ) -> Self {
        Self {
            billing,
            gateway,
            notification_url,
            webhook_key,
        }
    }

    pub async fn create_invoice_with_qr_code(
        &self,
        params: CreateSbpInvoiceModel,
    ) -> UseCaseResult<CreateSbpInvoiceResultModel> {
        if params.user_id == 0 {
            return Err(SbpError::Validation("user id is required".to_string()));
        }
        if params.amount <= 0 {
            return Err(SbpError::Validation("amount must be positive".to_string()));
        }

        let idempotency_key = if params.idempotency_key.trim().is_empty() {
            Uuid::new_v4().to_string()
        } else {
            params.idempotency_key.clone()
        };

        let account = self.billing.ensure_account(params.user_id).await?;
        let amount = Money::new(params.amount, params.currency.trim()).or_currency(&account.balance.currency);

        match self.billing.get_invoice_by_idempotency_key(&idempotency_key).await {
            Ok(existing) if existing.account_id == account.id && existing.amount == amount => {
                info!(
                    user_id = params.user_id,
                    invoice_id = existing.id,
                    "sbp: returning existing invoice for idempotency key"
                );
                let qr = stored_qr(&existing);
                return Ok(CreateSbpInvoiceResultModel { invoice: existing, qr });
            }
            Ok(existing) => {
                warn!(
                    user_id = params.user_id,
                    invoice_id = existing.id,
                    "sbp: idempotency key reused with different parameters"
                );
                return Err(BillingError::IdempotencyConflict("invoice").into());
            }
            Err(BillingError::InvoiceNotFound) => {}
            Err(err) => return Err(err.into()),
        }

        let payment_purpose = if params.payment_purpose.trim().is_empty() {
            params.description.clone()
        } else {
            params.payment_purpose.clone()
        };

        let qr = self
            .gateway
            .register_qr_code(RegisterQrCodeRequest {
                amount: amount.clone(),
                payment_purpose: payment_purpose.clone(),
                qr_type: params.qr_type.clone(),
                idempotency_key: idempotency_key.clone(),
                redirect_url: params.redirect_url.clone(),
            })
            .await
            .map_err(|err| {
                error!(user_id = params.user_id, provider_error = ?err, "sbp: failed to register qr code");
                SbpError::Provider(err)
            })?;

        let mut extra = params.extra.unwrap_or_default();
        extra.insert("notification".to_string(), Value::from(self.notification_url.clone()));
        extra.insert("payment_purpose".to_string(), Value::from(payment_purpose));

        let sbp_metadata = InvoiceSbpMetadata {
            provider: SBP_PROVIDER.to_string(),
            qr_id: qr.qr_id.clone(),
            payment_link: qr.payment_link,
            payload: qr.payload,
            payload_base64: qr.payload_base64,
            expires_at: qr.expires_at,
            provider_data: qr.raw,
            extra: Some(extra),
        };
        let metadata = sbp_metadata
            .attach(params.metadata)
            .map_err(|err| BillingError::Persistence(anyhow::Error::new(err)))?;

        let invoice = self
            .billing
            .create_invoice(CreateInvoiceModel {
                account_id: account.id,
                amount,
                description: params.description,
                metadata: Some(metadata),
                idempotency_key,
                qr_id: Some(qr.qr_id),
            })
            .await?;

        info!(
            user_id = params.user_id,
            invoice_id = invoice.id,
            qr_id = ?invoice.qr_id,
            "sbp: invoice with qr code created"
        );

        Ok(CreateSbpInvoiceResultModel {
            invoice,
            qr: sbp_metadata.into(),
        })
    }

    /// Parses a raw webhook body (verifying it when a key is configured) and credits the payment.
    pub async fn handle_webhook(&self, body: &[u8]) -> UseCaseResult<PaymentModel> {
        let notification = parse_sbp_webhook(body, self.webhook_key.as_ref()).map_err(|err| {
            warn!(error = %err, "sbp: rejected webhook");
            err
        })?;

        self.handle_incoming_payment(notification).await
    }

    pub async fn handle_incoming_payment(
        &self,
        notification: IncomingPaymentNotification,
    ) -> UseCaseResult<PaymentModel> {
        if notification.qr_id.is_empty() {
            return Err(SbpError::MissingQrId);
        }

        let invoice = match self.billing.get_invoice_by_qr_id(&notification.qr_id).await {
            Ok(invoice) => invoice,
            Err(BillingError::InvoiceNotFound) => {
                self.billing
                    .get_invoice_by_idempotency_key(&notification.qr_id)
                    .await?
            }
            Err(err) => return Err(err.into()),
        };

        let amount_minor = notification.amount_minor()?;
        let currency = if notification.amount.currency.is_empty() {
            invoice.amount.currency.clone()
        } else {
            notification.amount.currency.clone()
        };

        let idempotency_key = notification.idempotency_key().to_string();
        let payment = self
            .billing
            .register_incoming_payment(RegisterIncomingPaymentModel {
                account_id: invoice.account_id,
                invoice_id: Some(invoice.id),
                amount: Money::new(amount_minor, currency),
                metadata: Some(payment_metadata(&notification)),
                idempotency_key,
            })
            .await?;

        info!(
            qr_id = %notification.qr_id,
            invoice_id = invoice.id,
            payment_id = payment.id,
            "sbp: incoming payment registered"
        );
        Ok(payment)
    }
}

fn stored_qr(invoice: &InvoiceModel) -> SbpQrCodeDto {
    match InvoiceSbpMetadata::extract(invoice.metadata.as_ref()) {
        Some(sbp) => sbp.into(),
        None => SbpQrCodeDto {
            qr_id: invoice.qr_id.clone().unwrap_or_default(),
            ..Default::default()
        },
    }
}

fn payment_metadata(notification: &IncomingPaymentNotification) -> Metadata {
    let mut metadata = Metadata::new();
    metadata.insert("provider".to_string(), json!(SBP_PROVIDER));
    metadata.insert("event".to_string(), json!(notification.event));
    metadata.insert("qr_id".to_string(), json!(notification.qr_id));
    metadata.insert("status".to_string(), json!(notification.status));
    metadata.insert("payload".to_string(), Value::Object(notification.payload.clone()));
    metadata.insert("payment_purpose".to_string(), json!(notification.payment_purpose));
    metadata.insert("payer_name".to_string(), json!(notification.payer_name));
    metadata.insert("payer_inn".to_string(), json!(notification.payer_inn));
    metadata.insert("payer_account".to_string(), json!(notification.payer_account));
    metadata.insert("payer_bank_name".to_string(), json!(notification.payer_bank_name));
    if !notification.order_id.is_empty() {
        metadata.insert("order_id".to_string(), json!(notification.order_id));
    }
    if let Some(payment_date) = notification.payment_date {
        metadata.insert("payment_date".to_string(), json!(payment_date));
    }
    metadata.insert("raw".to_string(), Value::Object(notification.raw.clone()));
    metadata
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use crates::domain::{
        repositories::billing::MockBillingService,
        value_objects::{
            billing::BillingAccountModel,
            enums::{invoice_statuses::InvoiceStatus, payment_statuses::PaymentStatus},
        },
    };
    use mockall::predicate::eq;

    fn account(id: i64, user_id: i64) -> BillingAccountModel {
        let now = Utc::now();
        BillingAccountModel {
            id,
            user_id,
            balance: Money::zero("RUB"),
            created_at: now,
            updated_at: now,
        }
    }

    fn invoice_model(id: i64, account_id: i64, key: &str, qr_id: Option<&str>) -> InvoiceModel {
        let now = Utc::now();
        InvoiceModel {
            id,
            account_id,
            amount: Money::new(19_900, "RUB"),
            description: "digest".to_string(),
            metadata: None,
            status: InvoiceStatus::Pending,
            idempotency_key: key.to_string(),
            qr_id: qr_id.map(str::to_string),
            created_at: now,
            updated_at: now,
            paid_at: None,
        }
    }

    fn payment_model(params: &RegisterIncomingPaymentModel) -> PaymentModel {
        let now = Utc::now();
        PaymentModel {
            id: 77,
            account_id: params.account_id,
            invoice_id: params.invoice_id,
            amount: params.amount.clone(),
            description: None,
            metadata: params.metadata.clone(),
            status: PaymentStatus::Completed,
            idempotency_key: params.idempotency_key.clone(),
            created_at: now,
            updated_at: now,
            completed_at: Some(now),
        }
    }

    fn sbp_request(key: &str) -> CreateSbpInvoiceModel {
        CreateSbpInvoiceModel {
            user_id: 5,
            amount: 19_900,
            currency: String::new(),
            description: "digest".to_string(),
            payment_purpose: String::new(),
            idempotency_key: key.to_string(),
            qr_type: String::new(),
            redirect_url: String::new(),
            metadata: None,
            extra: None,
        }
    }

    fn usecase(billing: MockBillingService, gateway: MockSbpQrGateway) -> SbpUseCase<MockBillingService, MockSbpQrGateway> {
        SbpUseCase::new(
            Arc::new(billing),
            Arc::new(gateway),
            "https://billing.local/api/v1/sbp/webhook".to_string(),
            None,
        )
    }

    #[tokio::test]
    async fn creates_invoice_with_registered_qr_code() {
        let mut billing = MockBillingService::new();
        billing
            .expect_get_invoice_by_idempotency_key()
            .withf(|key| key == "order-1")
            .returning(|_| Err(BillingError::InvoiceNotFound));
        billing
            .expect_ensure_account()
            .with(eq(5))
            .returning(|user_id| Ok(account(11, user_id)));
        billing
            .expect_create_invoice()
            .withf(|params| {
                params.account_id == 11
                    && params.amount == Money::new(19_900, "RUB")
                    && params.qr_id.as_deref() == Some("AS1000")
                    && params.idempotency_key == "order-1"
            })
            .returning(|params| {
                let mut invoice = invoice_model(3, params.account_id, &params.idempotency_key, Some("AS1000"));
                invoice.metadata = params.metadata;
                Ok(invoice)
            });

        let mut gateway = MockSbpQrGateway::new();
        gateway
            .expect_register_qr_code()
            .withf(|request| {
                request.idempotency_key == "order-1"
                    && request.amount == Money::new(19_900, "RUB")
                    && request.payment_purpose == "digest"
            })
            .times(1)
            .returning(|_| {
                Ok(RegisterQrCodeResponse {
                    qr_id: "AS1000".to_string(),
                    payment_link: "https://qr.nspk.ru/AS1000".to_string(),
                    payload: "https://qr.nspk.ru/AS1000".to_string(),
                    ..Default::default()
                })
            });

        let result = usecase(billing, gateway)
            .create_invoice_with_qr_code(sbp_request("order-1"))
            .await
            .unwrap();

        assert_eq!(result.qr.qr_id, "AS1000");
        assert_eq!(result.qr.payment_link, "https://qr.nspk.ru/AS1000");
        let stored = InvoiceSbpMetadata::extract(result.invoice.metadata.as_ref()).unwrap();
        assert_eq!(stored.provider, "tochka");
        assert_eq!(
            stored.extra.unwrap()["notification"],
            "https://billing.local/api/v1/sbp/webhook"
        );
    }

    #[tokio::test]
    async fn existing_invoice_is_returned_without_calling_the_bank() {
        let mut billing = MockBillingService::new();
        billing
            .expect_get_invoice_by_idempotency_key()
            .returning(|key| {
                let sbp = InvoiceSbpMetadata {
                    provider: SBP_PROVIDER.to_string(),
                    qr_id: "AS1000".to_string(),
                    payment_link: "https://qr.nspk.ru/AS1000".to_string(),
                    ..Default::default()
                };
                let mut invoice = invoice_model(3, 11, key, Some("AS1000"));
                invoice.metadata = Some(sbp.attach(None).unwrap());
                Ok(invoice)
            });
        billing
            .expect_ensure_account()
            .with(eq(5))
            .returning(|user_id| Ok(account(11, user_id)));
        billing.expect_create_invoice().never();

        let mut gateway = MockSbpQrGateway::new();
        gateway.expect_register_qr_code().never();

        let result = usecase(billing, gateway)
            .create_invoice_with_qr_code(sbp_request("order-1"))
            .await
            .unwrap();

        assert_eq!(result.invoice.id, 3);
        assert_eq!(result.qr.payment_link, "https://qr.nspk.ru/AS1000");
    }

    #[tokio::test]
    async fn reused_key_with_other_parameters_conflicts() {
        let cases = [
            // stored invoice belongs to another user's account
            invoice_model(3, 99, "order-1", Some("AS1000")),
            // same account, different amount
            {
                let mut invoice = invoice_model(3, 11, "order-1", Some("AS1000"));
                invoice.amount = Money::new(50_000, "RUB");
                invoice
            },
        ];

        for stored in cases {
            let mut billing = MockBillingService::new();
            billing
                .expect_ensure_account()
                .returning(|user_id| Ok(account(11, user_id)));
            billing
                .expect_get_invoice_by_idempotency_key()
                .returning(move |_| Ok(stored.clone()));
            billing.expect_create_invoice().never();

            let mut gateway = MockSbpQrGateway::new();
            gateway.expect_register_qr_code().never();

            let err = usecase(billing, gateway)
                .create_invoice_with_qr_code(sbp_request("order-1"))
                .await
                .unwrap_err();

            assert!(matches!(err, SbpError::Billing(BillingError::IdempotencyConflict("invoice"))));
            assert_eq!(err.status_code(), StatusCode::CONFLICT);
            assert_eq!(err.code(), "idempotency_conflict");
        }
    }

    #[tokio::test]
    async fn provider_failures_create_no_invoice() {
        let mut billing = MockBillingService::new();
        billing
            .expect_get_invoice_by_idempotency_key()
            .returning(|_| Err(BillingError::InvoiceNotFound));
        billing
            .expect_ensure_account()
            .returning(|user_id| Ok(account(11, user_id)));
        billing.expect_create_invoice().never();

        let mut gateway = MockSbpQrGateway::new();
        gateway
            .expect_register_qr_code()
            .returning(|_| Err(anyhow::anyhow!("bank is down")));

        let err = usecase(billing, gateway)
            .create_invoice_with_qr_code(sbp_request("order-1"))
            .await
            .unwrap_err();

        assert!(matches!(err, SbpError::Provider(_)));
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn invalid_requests_are_rejected_up_front() {
        let mut request = sbp_request("order-1");
        request.amount = 0;
        let err = usecase(MockBillingService::new(), MockSbpQrGateway::new())
            .create_invoice_with_qr_code(request)
            .await
            .unwrap_err();
        assert!(matches!(err, SbpError::Validation(_)));

        let mut request = sbp_request("order-1");
        request.user_id = 0;
        let err = usecase(MockBillingService::new(), MockSbpQrGateway::new())
            .create_invoice_with_qr_code(request)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "invalid_request");
    }

    fn webhook_body() -> Vec<u8> {
        serde_json::to_vec(&json!({
            "webhookType": "incomingSbpPayment",
            "operationId": "op-1",
            "qrcId": "AS1000",
            "amount": "199.00",
            "payerName": "Ivan I.",
            "purpose": "digest"
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn webhook_credits_the_invoice_found_by_qr_id() {
        let mut billing = MockBillingService::new();
        billing
            .expect_get_invoice_by_qr_id()
            .withf(|qr_id| qr_id == "AS1000")
            .returning(|qr_id| Ok(invoice_model(3, 11, "order-1", Some(qr_id))));
        billing
            .expect_register_incoming_payment()
            .withf(|params| {
                params.account_id == 11
                    && params.invoice_id == Some(3)
                    && params.amount == Money::new(19_900, "RUB")
                    && params.idempotency_key == "op-1"
                    && params.metadata.as_ref().is_some_and(|metadata| {
                        metadata["provider"] == "tochka" && metadata["payer_name"] == "Ivan I."
                    })
            })
            .times(1)
            .returning(|params| Ok(payment_model(&params)));

        let payment = usecase(billing, MockSbpQrGateway::new())
            .handle_webhook(&webhook_body())
            .await
            .unwrap();

        assert_eq!(payment.id, 77);
    }

    #[tokio::test]
    async fn webhook_falls_back_to_the_idempotency_key() {
        let mut billing = MockBillingService::new();
        billing
            .expect_get_invoice_by_qr_id()
            .returning(|_| Err(BillingError::InvoiceNotFound));
        billing
            .expect_get_invoice_by_idempotency_key()
            .withf(|key| key == "AS1000")
            .returning(|key| Ok(invoice_model(4, 12, key, None)));
        billing
            .expect_register_incoming_payment()
            .withf(|params| params.invoice_id == Some(4))
            .returning(|params| Ok(payment_model(&params)));

        let payment = usecase(billing, MockSbpQrGateway::new())
            .handle_webhook(&webhook_body())
            .await
            .unwrap();

        assert_eq!(payment.account_id, 12);
    }

    #[tokio::test]
    async fn webhook_without_qr_id_is_rejected() {
        let body = serde_json::to_vec(&json!({"operationId": "op-1", "amount": "1.00"})).unwrap();
        let err = usecase(MockBillingService::new(), MockSbpQrGateway::new())
            .handle_webhook(&body)
            .await
            .unwrap_err();

        assert!(matches!(err, SbpError::MissingQrId));
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn partial_payment_errors_surface_with_their_status() {
        let mut billing = MockBillingService::new();
        billing
            .expect_get_invoice_by_qr_id()
            .returning(|qr_id| Ok(invoice_model(3, 11, "order-1", Some(qr_id))));
        billing
            .expect_register_incoming_payment()
            .returning(|_| Err(BillingError::PartialPaymentUnsupported));

        let err = usecase(billing, MockSbpQrGateway::new())
            .handle_webhook(&webhook_body())
            .await
            .unwrap_err();

        assert_eq!(err.code(), "partial_payment_unsupported");
        assert_eq!(err.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
    }
}
