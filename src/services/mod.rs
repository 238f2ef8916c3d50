pub mod conversation;
pub mod ledger;
pub mod localization;
pub mod orders;
pub mod pricing;
pub mod reconciliation;
pub mod retry;
pub mod settings;
pub mod users;
