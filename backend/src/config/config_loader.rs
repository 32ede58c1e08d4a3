use std::str::FromStr;

use anyhow::{Context, Result};
use crates::{
    domain::value_objects::money::DEFAULT_CURRENCY,
    payments::tochka_client::{DEFAULT_API_VERSION, DEFAULT_BASE_URL},
};

use super::config_model::{BackendServer, Billing, Database, DotEnvyConfig, Tochka};

const DEFAULT_SOURCE_NAME: &str = "Telegram Digest Bot";

pub fn load() -> Result<DotEnvyConfig> {
    dotenvy::dotenv().ok();

    load_from(|key| std::env::var(key).ok())
}

/// Builds the config from any key lookup; blank values count as unset.
pub fn load_from<F>(lookup: F) -> Result<DotEnvyConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| {
        lookup(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    };

    let backend_server = BackendServer {
        port: parse_or(get("SERVER_PORT"), "SERVER_PORT", 8082)?,
        body_limit: parse_or(get("SERVER_BODY_LIMIT"), "SERVER_BODY_LIMIT", 1)?,
        timeout: parse_or(get("SERVER_TIMEOUT"), "SERVER_TIMEOUT", 30)?,
    };

    let database = Database {
        url: get("DATABASE_URL").context("DATABASE_URL is missing")?,
        max_connections: parse_or(get("DATABASE_MAX_CONNECTIONS"), "DATABASE_MAX_CONNECTIONS", 10)?,
    };

    let billing = Billing {
        api_token: get("BILLING_API_TOKEN").context("BILLING_API_TOKEN is missing")?,
        default_currency: get("BILLING_DEFAULT_CURRENCY")
            .map(|currency| currency.to_ascii_uppercase())
            .unwrap_or_else(|| DEFAULT_CURRENCY.to_string()),
        query_timeout_secs: parse_or(
            get("BILLING_QUERY_TIMEOUT_SECS"),
            "BILLING_QUERY_TIMEOUT_SECS",
            5,
        )?,
    };
    if billing.query_timeout_secs == 0 {
        anyhow::bail!("BILLING_QUERY_TIMEOUT_SECS must be positive");
    }

    let tochka = match (
        get("TOCHKA_MERCHANT_ID"),
        get("TOCHKA_ACCOUNT_ID"),
        get("TOCHKA_ACCESS_TOKEN"),
    ) {
        (Some(merchant_id), Some(account_id), Some(access_token)) => Some(Tochka {
            base_url: get("TOCHKA_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            api_version: get("TOCHKA_API_VERSION").unwrap_or_else(|| DEFAULT_API_VERSION.to_string()),
            merchant_id,
            account_id,
            access_token,
            timeout_secs: parse_or(get("TOCHKA_TIMEOUT_SECS"), "TOCHKA_TIMEOUT_SECS", 15)?,
            notification_url: get("TOCHKA_NOTIFICATION_URL").unwrap_or_default(),
            webhook_secret: get("TOCHKA_WEBHOOK_SECRET"),
            webhook_public_key: get("TOCHKA_WEBHOOK_PUBLIC_KEY"),
            source_name: get("TOCHKA_SOURCE_NAME").unwrap_or_else(|| DEFAULT_SOURCE_NAME.to_string()),
            redirect_url: get("TOCHKA_REDIRECT_URL").unwrap_or_default(),
        }),
        _ => None,
    };

    Ok(DotEnvyConfig {
        backend_server,
        database,
        billing,
        tochka,
    })
}

fn parse_or<T>(raw: Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match raw {
        Some(raw) => raw.parse().with_context(|| format!("{key} is invalid")),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    const REQUIRED: [(&str, &str); 2] = [
        ("DATABASE_URL", "postgres://localhost:5432/billing"),
        ("BILLING_API_TOKEN", "secret"),
    ];

    #[test]
    fn defaults_apply_when_only_required_vars_are_set() {
        let config = load_from(lookup(&REQUIRED)).unwrap();

        assert_eq!(config.backend_server.port, 8082);
        assert_eq!(config.backend_server.body_limit, 1);
        assert_eq!(config.backend_server.timeout, 30);
        assert_eq!(config.billing.default_currency, "RUB");
        assert_eq!(config.billing.query_timeout_secs, 5);
        assert!(config.tochka.is_none());
    }

    #[test]
    fn api_token_is_required() {
        let err = load_from(lookup(&[("DATABASE_URL", "postgres://db"), ("BILLING_API_TOKEN", " ")]))
            .unwrap_err();
        assert!(err.to_string().contains("BILLING_API_TOKEN"));
    }

    #[test]
    fn invalid_numbers_name_the_variable() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("SERVER_PORT", "eighty"));
        let err = load_from(lookup(&pairs)).unwrap_err();
        assert_eq!(err.to_string(), "SERVER_PORT is invalid");
    }

    #[test]
    fn tochka_needs_merchant_account_and_token() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("TOCHKA_MERCHANT_ID", "MF0000000001"));
        pairs.push(("TOCHKA_ACCOUNT_ID", "40702810000000000001"));
        assert!(load_from(lookup(&pairs)).unwrap().tochka.is_none());

        pairs.push(("TOCHKA_ACCESS_TOKEN", "bank-token"));
        pairs.push(("TOCHKA_WEBHOOK_SECRET", "hook"));
        let tochka = load_from(lookup(&pairs)).unwrap().tochka.unwrap();
        assert_eq!(tochka.base_url, "https://enter.tochka.com");
        assert_eq!(tochka.api_version, "v1.0");
        assert_eq!(tochka.timeout_secs, 15);
        assert_eq!(tochka.webhook_secret.as_deref(), Some("hook"));
        assert_eq!(tochka.webhook_public_key, None);
    }
}
