pub mod tochka_client;
pub mod tochka_webhook;
