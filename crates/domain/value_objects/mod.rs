pub mod billing;
pub mod enums;
pub mod money;
pub mod sbp;
