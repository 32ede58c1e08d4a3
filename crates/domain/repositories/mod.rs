pub mod billing;
pub mod ledger;
