use once_cell::sync::Lazy;
use sea_orm::sea_query::OnConflict;
use sea_orm::{DatabaseConnection, EntityTrait, Set};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

use crate::{entities::localized_text, errors::ServiceError};

pub const DEFAULT_LANGUAGE: &str = "en";

/// Logical keys for the messages the core emits.
pub mod text {
    pub const ORDER_OPENED_INVOICE: &str = "order_opened_invoice";
    pub const ORDER_OPENED_WALLET: &str = "order_opened_wallet";
    pub const PAYMENT_CONFIRMED: &str = "payment_confirmed";
    pub const NOT_YET_PAID: &str = "not_yet_paid";
    pub const ISSUANCE_FAILED: &str = "issuance_failed";
    pub const TRY_LATER: &str = "try_later";
    pub const FILL_ALL_FIELDS: &str = "fill_all_fields";
    pub const REFERRAL_BONUS_GRANTED: &str = "referral_bonus_granted";
    pub const ADMIN_SALE_NOTICE: &str = "admin_sale_notice";
}

static BUILTIN_TEMPLATES: Lazy<HashMap<(&'static str, &'static str), &'static str>> =
    Lazy::new(|| {
        HashMap::from([
            (
                (text::ORDER_OPENED_INVOICE, "en"),
                "Your order for {quantity} stars is open. Pay here: {pay_url}",
            ),
            (
                (text::ORDER_OPENED_WALLET, "en"),
                "Send {amount} TON to {address} with comment: {memo}",
            ),
            (
                (text::PAYMENT_CONFIRMED, "en"),
                "Payment confirmed! {quantity} stars are on their way to {recipient}.",
            ),
            (
                (text::NOT_YET_PAID, "en"),
                "We have not seen your payment yet. Try again in a minute.",
            ),
            (
                (text::ISSUANCE_FAILED, "en"),
                "Your payment is confirmed but delivery is delayed. We will retry shortly.",
            ),
            (
                (text::TRY_LATER, "en"),
                "The payment service is unavailable right now. Please try later.",
            ),
            (
                (text::FILL_ALL_FIELDS, "en"),
                "Please fill in all order fields before confirming.",
            ),
            (
                (text::REFERRAL_BONUS_GRANTED, "en"),
                "You earned a referral bonus of {amount} {currency}!",
            ),
            (
                (text::ADMIN_SALE_NOTICE, "en"),
                "Sold {quantity} stars to {recipient} (buyer {user_id}, rail {rail}).",
            ),
        ])
    });

/// Template store for user-facing messages. A missing entry degrades to a
/// visible diagnostic placeholder instead of failing the interaction.
#[derive(Clone)]
pub struct LocalizationService {
    db: Arc<DatabaseConnection>,
}

impl LocalizationService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Renders `key` in `language`, falling back to the default language,
    /// then to the built-in templates, then to a diagnostic marker.
    pub async fn render(&self, key: &str, language: &str, args: &[(&str, String)]) -> String {
        let template = match self.lookup(key, language).await {
            Some(t) => t,
            None => {
                warn!(key, language, "Missing localized text");
                return format!("[missing text: {key}/{language}]");
            }
        };
        render_template(&template, args)
    }

    async fn lookup(&self, key: &str, language: &str) -> Option<String> {
        for lang in [language, DEFAULT_LANGUAGE] {
            match localized_text::Entity::find_by_id((key.to_string(), lang.to_string()))
                .one(&*self.db)
                .await
            {
                Ok(Some(row)) => return Some(row.template),
                Ok(None) => {}
                Err(err) => {
                    warn!(key, language = lang, error = %err, "Localized text lookup failed");
                }
            }
        }
        BUILTIN_TEMPLATES
            .get(&(key, language))
            .or_else(|| BUILTIN_TEMPLATES.get(&(key, DEFAULT_LANGUAGE)))
            .map(|t| t.to_string())
    }

    /// Inserts the built-in templates, keeping any operator overrides.
    pub async fn seed_defaults(&self) -> Result<(), ServiceError> {
        for ((key, language), template) in BUILTIN_TEMPLATES.iter() {
            let model = localized_text::ActiveModel {
                key: Set(key.to_string()),
                language: Set(language.to_string()),
                template: Set(template.to_string()),
            };
            localized_text::Entity::insert(model)
                .on_conflict(
                    OnConflict::columns([
                        localized_text::Column::Key,
                        localized_text::Column::Language,
                    ])
                    .do_nothing()
                    .to_owned(),
                )
                .do_nothing()
                .exec(&*self.db)
                .await?;
        }
        Ok(())
    }
}

/// Substitutes `{name}` placeholders. Unknown placeholders are left intact
/// so a template/argument mismatch stays visible.
pub fn render_template(template: &str, args: &[(&str, String)]) -> String {
    let mut rendered = template.to_string();
    for (name, value) in args {
        rendered = rendered.replace(&format!("{{{name}}}"), value);
    }
    rendered
}
