use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};
use url::Url;

use crate::domain::value_objects::{
    billing::Metadata,
    money::{DEFAULT_CURRENCY, Money},
};

pub const DEFAULT_BASE_URL: &str = "https://enter.tochka.com";
pub const DEFAULT_API_VERSION: &str = "v1.0";
pub const DEFAULT_QR_TYPE: &str = "02";
pub const QR_TTL_SECS: i64 = 600;

const QR_IMAGE_SIZE: u32 = 200;
const QR_IMAGE_MEDIA_TYPE: &str = "image/png";

#[derive(Debug, Clone)]
pub struct TochkaConfig {
    pub base_url: String,
    pub api_version: String,
    pub merchant_id: String,
    /// 20-digit bank account number the QR payments settle to.
    pub account_id: String,
    pub access_token: String,
    pub timeout: Duration,
    pub source_name: String,
    pub redirect_url: String,
}

/// Minimal Tochka SBP client built on reqwest.
pub struct TochkaClient {
    http: reqwest::Client,
    config: TochkaConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RegisterQrCodeRequest {
    pub amount: Money,
    pub payment_purpose: String,
    pub qr_type: String,
    pub idempotency_key: String,
    pub redirect_url: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegisterQrCodeResponse {
    pub qr_id: String,
    pub payment_link: String,
    pub payload: String,
    /// Base64 QR image as returned by the bank.
    pub payload_base64: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub raw: Option<Metadata>,
}

#[derive(Debug, Serialize)]
struct RegisterQrCodeBody<'a> {
    #[serde(rename = "Data")]
    data: RegisterQrCodeData<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RegisterQrCodeData<'a> {
    amount: i64,
    currency: &'a str,
    payment_purpose: &'a str,
    qrc_type: &'a str,
    image_params: ImageParams,
    source_name: &'a str,
    ttl: i64,
    redirect_url: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ImageParams {
    width: u32,
    height: u32,
    media_type: &'static str,
}

#[derive(Debug, Deserialize)]
struct RegisterQrCodeEnvelope {
    #[serde(rename = "Data")]
    data: RegisterQrCodeResult,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterQrCodeResult {
    #[serde(default)]
    payload: String,
    #[serde(default)]
    qrc_id: String,
    #[serde(default)]
    image: Option<QrImage>,
}

#[derive(Debug, Deserialize)]
struct QrImage {
    #[serde(default)]
    content: String,
}

impl TochkaClient {
    pub fn new(config: TochkaConfig) -> Result<Self> {
        if config.account_id.len() != 20 {
            warn!(account_len = config.account_id.len(), "tochka: account id should be 20 digits");
        }

        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .context("failed to build tochka http client")?;

        Ok(Self { http, config })
    }

    fn register_endpoint(&self) -> Result<Url> {
        let mut url = Url::parse(&self.config.base_url)
            .with_context(|| format!("invalid tochka base url: {}", self.config.base_url))?;
        url.path_segments_mut()
            .map_err(|_| anyhow::anyhow!("tochka base url cannot be a base"))?
            .pop_if_empty()
            .extend([
                "uapi",
                "sbp",
                self.config.api_version.as_str(),
                "qr-code",
                "merchant",
                self.config.merchant_id.as_str(),
                self.config.account_id.as_str(),
            ]);
        Ok(url)
    }

    async fn ensure_success(resp: reqwest::Response, context: &str) -> Result<reqwest::Response> {
        if resp.status().is_success() {
            return Ok(resp);
        }

        let status = resp.status();
        let body = match resp.text().await {
            Ok(text) if !text.is_empty() => text,
            Ok(_) => "<empty response body>".to_string(),
            Err(err) => format!("<failed to read response body: {err}>"),
        };

        error!(
            status = %status,
            response_body = %body,
            context = %context,
            "tochka api request failed"
        );

        anyhow::bail!("Tochka API request failed: {} (status {})", context, status);
    }

    /// Registers a dynamic SBP QR code valid for `QR_TTL_SECS`.
    pub async fn register_qr_code(&self, req: &RegisterQrCodeRequest) -> Result<RegisterQrCodeResponse> {
        if req.idempotency_key.trim().is_empty() {
            anyhow::bail!("idempotency key is required");
        }

        let currency = if req.amount.has_currency() {
            req.amount.currency.as_str()
        } else {
            DEFAULT_CURRENCY
        };
        let qr_type = if req.qr_type.trim().is_empty() {
            DEFAULT_QR_TYPE
        } else {
            req.qr_type.as_str()
        };
        let redirect_url = if req.redirect_url.trim().is_empty() {
            self.config.redirect_url.as_str()
        } else {
            req.redirect_url.as_str()
        };

        let body = RegisterQrCodeBody {
            data: RegisterQrCodeData {
                amount: req.amount.amount,
                currency,
                payment_purpose: &req.payment_purpose,
                qrc_type: qr_type,
                image_params: ImageParams {
                    width: QR_IMAGE_SIZE,
                    height: QR_IMAGE_SIZE,
                    media_type: QR_IMAGE_MEDIA_TYPE,
                },
                source_name: &self.config.source_name,
                ttl: QR_TTL_SECS,
                redirect_url,
            },
        };

        let mut request = self
            .http
            .post(self.register_endpoint()?)
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json")
            .header("Idempotency-Key", &req.idempotency_key)
            .json(&body);
        if !self.config.access_token.is_empty() {
            request = request.bearer_auth(&self.config.access_token);
        }

        let resp = request
            .send()
            .await
            .context("tochka register qr request failed")?;
        let resp = Self::ensure_success(resp, "register qr code").await?;
        let text = resp
            .text()
            .await
            .context("failed to read tochka register qr response")?;

        parse_register_response(&text, Utc::now())
    }
}

fn parse_register_response(body: &str, now: DateTime<Utc>) -> Result<RegisterQrCodeResponse> {
    let envelope: RegisterQrCodeEnvelope =
        serde_json::from_str(body).context("failed to decode tochka register qr response")?;
    let raw = serde_json::from_str::<Metadata>(body).ok();

    let data = envelope.data;
    if data.qrc_id.is_empty() {
        anyhow::bail!("tochka register qr response has no qrcId");
    }

    Ok(RegisterQrCodeResponse {
        qr_id: data.qrc_id,
        payment_link: data.payload.clone(),
        payload: data.payload,
        payload_base64: data.image.map(|image| image.content).unwrap_or_default(),
        expires_at: Some(now + chrono::Duration::seconds(QR_TTL_SECS)),
        raw,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config() -> TochkaConfig {
        TochkaConfig {
            base_url: "https://enter.tochka.com/".to_string(),
            api_version: DEFAULT_API_VERSION.to_string(),
            merchant_id: "MF0000000001".to_string(),
            account_id: "40702810000000000001".to_string(),
            access_token: "token".to_string(),
            timeout: Duration::from_secs(5),
            source_name: "Digest Bot".to_string(),
            redirect_url: "https://t.me/digest_bot".to_string(),
        }
    }

    #[test]
    fn endpoint_includes_merchant_and_account() {
        let client = TochkaClient::new(config()).unwrap();
        assert_eq!(
            client.register_endpoint().unwrap().as_str(),
            "https://enter.tochka.com/uapi/sbp/v1.0/qr-code/merchant/MF0000000001/40702810000000000001"
        );
    }

    #[test]
    fn request_body_uses_bank_field_names() {
        let body = RegisterQrCodeBody {
            data: RegisterQrCodeData {
                amount: 19_900,
                currency: "RUB",
                payment_purpose: "digest subscription",
                qrc_type: DEFAULT_QR_TYPE,
                image_params: ImageParams {
                    width: QR_IMAGE_SIZE,
                    height: QR_IMAGE_SIZE,
                    media_type: QR_IMAGE_MEDIA_TYPE,
                },
                source_name: "Digest Bot",
                ttl: QR_TTL_SECS,
                redirect_url: "https://t.me/digest_bot",
            },
        };

        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            json!({"Data": {
                "amount": 19_900,
                "currency": "RUB",
                "paymentPurpose": "digest subscription",
                "qrcType": "02",
                "imageParams": {"width": 200, "height": 200, "mediaType": "image/png"},
                "sourceName": "Digest Bot",
                "ttl": 600,
                "redirectUrl": "https://t.me/digest_bot"
            }})
        );
    }

    #[test]
    fn response_maps_qrc_id_and_payload() {
        let now = Utc::now();
        let body = json!({
            "Data": {
                "payload": "https://qr.nspk.ru/AS1000",
                "qrcId": "AS1000",
                "image": {"width": 200, "height": 200, "mediaType": "image/png", "content": "iVBORw0"}
            },
            "Links": {"self": "https://enter.tochka.com/uapi"},
            "Meta": {"totalPages": 1}
        })
        .to_string();

        let parsed = parse_register_response(&body, now).unwrap();
        assert_eq!(parsed.qr_id, "AS1000");
        assert_eq!(parsed.payment_link, "https://qr.nspk.ru/AS1000");
        assert_eq!(parsed.payload_base64, "iVBORw0");
        assert_eq!(parsed.expires_at, Some(now + chrono::Duration::seconds(600)));
        assert_eq!(parsed.raw.unwrap()["Meta"]["totalPages"], 1);
    }

    #[test]
    fn response_without_qr_id_is_rejected() {
        let body = json!({"Data": {"payload": "https://qr.nspk.ru/x"}}).to_string();
        assert!(parse_register_response(&body, Utc::now()).is_err());
    }
}
