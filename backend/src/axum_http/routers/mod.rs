pub mod accounts;
pub mod invoices;
pub mod payments;
pub mod sbp;
