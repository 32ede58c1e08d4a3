//! Parsing of Tochka SBP incoming-payment webhooks.
//!
//! The bank delivers the same notification in three shapes: a compact JWT (`h.p.s`), a JSON
//! envelope `{"header", "payload", "signature"}` whose sections are either objects or base64
//! strings, or the bare JSON payload. When a public key is configured the first two shapes are
//! verified as RS256.

use anyhow::Context;
use base64::{
    Engine,
    engine::general_purpose::{STANDARD, URL_SAFE, URL_SAFE_NO_PAD},
};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, jwk::Jwk};
use rust_decimal::{Decimal, prelude::ToPrimitive};
use serde::Deserialize;
use serde_json::{Value, value::RawValue};
use thiserror::Error;

use crate::domain::value_objects::billing::Metadata;

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("empty webhook payload")]
    EmptyPayload,
    #[error("invalid webhook signature")]
    InvalidSignature,
    #[error("unsupported jwt alg (expected RS256)")]
    UnsupportedAlgorithm,
    #[error("invalid webhook payload: {0}")]
    Malformed(String),
    #[error("invalid payment amount: {0}")]
    InvalidAmount(String),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NotificationAmount {
    pub value: String,
    pub currency: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct IncomingPaymentNotification {
    pub event: String,
    pub operation_id: String,
    pub order_id: String,
    pub payment_id: String,
    pub qr_id: String,
    pub status: String,
    pub payment_purpose: String,
    pub payment_date: Option<DateTime<Utc>>,
    pub amount: NotificationAmount,
    pub payer_name: String,
    pub payer_inn: String,
    pub payer_account: String,
    pub payer_bank_name: String,
    pub payload: Metadata,
    pub raw: Metadata,
}

impl IncomingPaymentNotification {
    /// Amount in minor units; digits past the second fraction digit are truncated.
    pub fn amount_minor(&self) -> Result<i64, WebhookError> {
        parse_decimal_minor(&self.amount.value)
    }

    /// Most specific provider identifier available for the payment.
    pub fn idempotency_key(&self) -> &str {
        [
            self.payment_id.as_str(),
            self.operation_id.as_str(),
            self.qr_id.as_str(),
            self.order_id.as_str(),
        ]
        .into_iter()
        .find(|key| !key.is_empty())
        .unwrap_or_default()
    }
}

#[derive(Debug, Deserialize)]
struct JwtHeader {
    #[serde(default)]
    alg: String,
}

#[derive(Debug, Deserialize)]
struct JwtEnvelope<'a> {
    #[serde(default, borrow)]
    header: Option<&'a RawValue>,
    #[serde(default, borrow)]
    payload: Option<&'a RawValue>,
    #[serde(default)]
    signature: Option<String>,
}

/// Loads the bank's webhook verification key from its JWK JSON form.
pub fn decoding_key_from_jwk(jwk_json: &str) -> anyhow::Result<DecodingKey> {
    let jwk: Jwk = serde_json::from_str(jwk_json).context("webhook public key is not a valid JWK")?;
    DecodingKey::from_jwk(&jwk).context("webhook public key is not a usable RSA key")
}

pub fn parse_sbp_webhook(
    body: &[u8],
    key: Option<&DecodingKey>,
) -> Result<IncomingPaymentNotification, WebhookError> {
    let body = body.trim_ascii();
    if body.is_empty() {
        return Err(WebhookError::EmptyPayload);
    }
    let text = std::str::from_utf8(body)
        .map_err(|_| WebhookError::Malformed("body is not valid utf-8".to_string()))?;

    if is_compact_jwt(text) {
        let mut parts = text.splitn(3, '.');
        let (Some(header), Some(payload), Some(signature)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(WebhookError::Malformed("compact jwt must have three parts".to_string()));
        };

        let header = decode_b64(header).map_err(|err| section_error("compact header", err))?;
        let payload = decode_b64(payload).map_err(|err| section_error("compact payload", err))?;
        let signature = decode_b64(signature).map_err(|err| section_error("compact signature", err))?;

        if let Some(key) = key {
            verify_rs256(&header, &payload, &signature, key)?;
        }

        let mut extra = Metadata::new();
        extra.insert("format".to_string(), Value::from("compact-jwt"));
        extra.insert("header".to_string(), json_or_string(&header));
        return build_notification(&payload, extra);
    }

    if text.starts_with('{') {
        if let Some(sections) = decode_envelope(text)? {
            let EnvelopeSections {
                header,
                payload,
                signature,
                signature_b64,
            } = sections;

            if let Some(key) = key {
                let signature = signature.ok_or(WebhookError::InvalidSignature)?;
                verify_rs256(&header, &payload, &signature, key)?;
            }

            let mut extra = Metadata::new();
            extra.insert("format".to_string(), Value::from("json-envelope"));
            extra.insert("header".to_string(), json_or_string(&header));
            extra.insert("signature".to_string(), Value::from(signature_b64));
            return build_notification(&payload, extra);
        }

        let mut extra = Metadata::new();
        extra.insert("format".to_string(), Value::from("plain-payload"));
        return build_notification(body, extra);
    }

    Err(WebhookError::Malformed("unknown webhook format".to_string()))
}

struct EnvelopeSections {
    header: Vec<u8>,
    payload: Vec<u8>,
    signature: Option<Vec<u8>>,
    signature_b64: String,
}

/// `Ok(None)` means the body is not an envelope and should be read as a bare payload.
fn decode_envelope(text: &str) -> Result<Option<EnvelopeSections>, WebhookError> {
    let Ok(envelope) = serde_json::from_str::<JwtEnvelope>(text) else {
        return Ok(None);
    };
    let (Some(header), Some(payload)) = (envelope.header, envelope.payload) else {
        return Ok(None);
    };
    let (Some(header), Some(payload)) = (decode_section(header), decode_section(payload)) else {
        return Ok(None);
    };

    let signature_b64 = envelope.signature.unwrap_or_default();
    let signature = if signature_b64.trim().is_empty() {
        None
    } else {
        Some(decode_b64(&signature_b64).map_err(|err| section_error("envelope signature", err))?)
    };

    Ok(Some(EnvelopeSections {
        header,
        payload,
        signature,
        signature_b64,
    }))
}

/// A section is either a base64 string of JSON or inline JSON kept byte for byte.
fn decode_section(raw: &RawValue) -> Option<Vec<u8>> {
    let text = raw.get().trim();
    if text.starts_with('"') {
        let encoded: String = serde_json::from_str(text).ok()?;
        decode_b64(&encoded).ok()
    } else if text.starts_with('{') {
        Some(text.as_bytes().to_vec())
    } else {
        None
    }
}

fn verify_rs256(
    header: &[u8],
    payload: &[u8],
    signature: &[u8],
    key: &DecodingKey,
) -> Result<(), WebhookError> {
    let parsed: JwtHeader = serde_json::from_slice(header)
        .map_err(|err| WebhookError::Malformed(format!("jwt header: {err}")))?;
    if !parsed.alg.eq_ignore_ascii_case("RS256") {
        return Err(WebhookError::UnsupportedAlgorithm);
    }

    let message = format!(
        "{}.{}",
        URL_SAFE_NO_PAD.encode(header),
        URL_SAFE_NO_PAD.encode(payload)
    );
    let signature = URL_SAFE_NO_PAD.encode(signature);

    match jsonwebtoken::crypto::verify(&signature, message.as_bytes(), key, Algorithm::RS256) {
        Ok(true) => Ok(()),
        _ => Err(WebhookError::InvalidSignature),
    }
}

fn build_notification(payload: &[u8], extra: Metadata) -> Result<IncomingPaymentNotification, WebhookError> {
    let payload: Metadata = serde_json::from_slice(payload)
        .map_err(|err| WebhookError::Malformed(format!("payload json: {err}")))?;

    let mut amount = NotificationAmount {
        value: first_string(&payload, &["amount"]),
        currency: first_string(&payload, &["currency", "amountCurrency"]),
    };
    if amount.value.is_empty() {
        if let Some(Value::Object(nested)) = payload.get("amount") {
            amount.value = first_string(nested, &["value", "amount"]);
            if amount.currency.is_empty() {
                amount.currency = first_string(nested, &["currency"]);
            }
        }
    }

    let payment_date = Some(first_string(&payload, &["paymentDate", "date", "createdAt"]))
        .filter(|value| !value.is_empty())
        .and_then(|value| parse_time(&value));

    let mut raw = Metadata::new();
    raw.insert("payload".to_string(), Value::Object(payload.clone()));
    for (key, value) in extra {
        raw.entry(key).or_insert(value);
    }

    Ok(IncomingPaymentNotification {
        event: first_string(&payload, &["webhookType", "event", "eventType"]),
        operation_id: first_string(&payload, &["operationId", "operation_id"]),
        order_id: first_string(&payload, &["orderId", "order_id"]),
        payment_id: first_string(
            &payload,
            &["paymentId", "payment_id", "refTransactionId", "ref_transaction_id"],
        ),
        qr_id: first_string(&payload, &["qrcId", "qrId", "qr_id", "qrCodeId"]),
        status: first_string(&payload, &["status"]),
        payment_purpose: first_string(&payload, &["purpose", "paymentPurpose", "description"]),
        payment_date,
        amount,
        payer_name: first_string(&payload, &["payerName"]),
        payer_inn: first_string(&payload, &["payerInn", "payerINN"]),
        payer_account: first_string(&payload, &["payerAccount"]),
        payer_bank_name: first_string(&payload, &["payerBankName"]),
        payload,
        raw,
    })
}

fn first_string(map: &Metadata, keys: &[&str]) -> String {
    keys.iter()
        .filter_map(|key| match map.get(*key)? {
            Value::String(value) if !value.is_empty() => Some(value.clone()),
            Value::Number(value) => Some(value.to_string()),
            _ => None,
        })
        .next()
        .unwrap_or_default()
}

fn is_compact_jwt(text: &str) -> bool {
    text.matches('.').count() == 2 && !text.contains(['{', '}', ' '])
}

fn decode_b64(input: &str) -> Result<Vec<u8>, base64::DecodeError> {
    let input = input.trim();
    URL_SAFE_NO_PAD
        .decode(input)
        .or_else(|_| URL_SAFE.decode(input))
        .or_else(|_| STANDARD.decode(input.replace('-', "+").replace('_', "/")))
}

fn section_error(section: &str, err: base64::DecodeError) -> WebhookError {
    WebhookError::Malformed(format!("{section}: {err}"))
}

fn json_or_string(bytes: &[u8]) -> Value {
    serde_json::from_slice(bytes).unwrap_or_else(|_| Value::from(String::from_utf8_lossy(bytes).into_owned()))
}

fn parse_time(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%d.%m.%Y %H:%M:%S"] {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(value, format) {
            return Some(parsed.and_utc());
        }
    }
    NaiveDate::parse_from_str(value, "%d.%m.%Y")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|parsed| parsed.and_utc())
}

fn parse_decimal_minor(value: &str) -> Result<i64, WebhookError> {
    let cleaned: String = value
        .trim()
        .chars()
        .filter(|ch| !matches!(ch, ' ' | '_' | '\u{a0}'))
        .map(|ch| if ch == ',' { '.' } else { ch })
        .collect();
    if cleaned.is_empty() {
        return Err(WebhookError::InvalidAmount("amount value is empty".to_string()));
    }

    let decimal: Decimal = cleaned
        .parse()
        .map_err(|err| WebhookError::InvalidAmount(format!("{value}: {err}")))?;

    (decimal * Decimal::ONE_HUNDRED)
        .trunc()
        .to_i64()
        .ok_or_else(|| WebhookError::InvalidAmount(format!("{value}: out of range")))
}
