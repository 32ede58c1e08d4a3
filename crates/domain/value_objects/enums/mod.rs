pub mod invoice_statuses;
pub mod payment_statuses;
