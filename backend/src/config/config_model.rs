#[derive(Debug, Clone)]
pub struct DotEnvyConfig {
    pub backend_server: BackendServer,
    pub database: Database,
    pub billing: Billing,
    pub tochka: Option<Tochka>,
}

#[derive(Debug, Clone)]
pub struct BackendServer {
    pub port: u16,
    /// MiB
    pub body_limit: u64,
    /// Seconds
    pub timeout: u64,
}

#[derive(Debug, Clone)]
pub struct Database {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone)]
pub struct Billing {
    pub api_token: String,
    pub default_currency: String,
    pub query_timeout_secs: u64,
}

/// Present only when merchant, account and access token are all configured.
#[derive(Debug, Clone)]
pub struct Tochka {
    pub base_url: String,
    pub api_version: String,
    pub merchant_id: String,
    pub account_id: String,
    pub access_token: String,
    pub timeout_secs: u64,
    pub notification_url: String,
    pub webhook_secret: Option<String>,
    /// JWK (JSON) used to verify RS256-signed webhooks.
    pub webhook_public_key: Option<String>,
    pub source_name: String,
    pub redirect_url: String,
}
