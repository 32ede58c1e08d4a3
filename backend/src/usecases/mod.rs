pub mod ledger;
pub mod sbp;
