pub mod billing_client;
pub mod db;
pub mod memory;
