pub mod billing_accounts;
pub mod invoices;
pub mod payments;
