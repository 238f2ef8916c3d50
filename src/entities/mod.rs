pub mod admin_log;
pub mod localized_text;
pub mod order_draft;
pub mod pending_order;
pub mod referral_bonus;
pub mod sales_stats;
pub mod setting;
pub mod user;
