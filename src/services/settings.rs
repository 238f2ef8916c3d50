use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::sea_query::OnConflict;
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, Set};
use std::sync::Arc;
use tracing::{instrument, warn};

use crate::{
    entities::{admin_log, setting},
    errors::ServiceError,
};

/// Well-known setting keys.
pub mod keys {
    pub const PRICE_PER_PACK_USD: &str = "price_per_pack_usd";
    pub const PACK_SIZE: &str = "pack_size";
    pub const MARKUP_PERCENT: &str = "markup_percent";
    pub const COMMISSION_INVOICE_PERCENT: &str = "commission_invoice_percent";
    pub const COMMISSION_WALLET_PERCENT: &str = "commission_wallet_percent";
    pub const COMMISSION_CARD_PERCENT: &str = "commission_card_percent";
    pub const REFERRAL_BONUS_PERCENT: &str = "referral_bonus_percent";
    pub const MIN_PURCHASE_QUANTITY: &str = "min_purchase_quantity";
    pub const CARD_PAYMENTS_ENABLED: &str = "card_payments_enabled";
    pub const ADMIN_IDS: &str = "admin_ids";
}

/// Hard-coded fallbacks; a missing key never errors.
pub mod defaults {
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    pub const PRICE_PER_PACK_USD: Decimal = dec!(0.81);
    pub const PACK_SIZE: i64 = 50;
    pub const MARKUP_PERCENT: Decimal = dec!(10);
    pub const COMMISSION_INVOICE_PERCENT: Decimal = dec!(3);
    pub const COMMISSION_WALLET_PERCENT: Decimal = dec!(0);
    pub const COMMISSION_CARD_PERCENT: Decimal = dec!(30);
    pub const REFERRAL_BONUS_PERCENT: Decimal = dec!(5);
    pub const MIN_PURCHASE_QUANTITY: i64 = 50;
    pub const CARD_PAYMENTS_ENABLED: bool = true;
}

/// Snapshot of every setting the pricing engine and conversation consume,
/// loaded once per interaction and passed by reference. Concurrent readers
/// never observe a half-updated configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct PricingSettings {
    pub price_per_pack_usd: Decimal,
    pub pack_size: i64,
    pub markup_percent: Decimal,
    pub commission_invoice_percent: Decimal,
    pub commission_wallet_percent: Decimal,
    pub commission_card_percent: Decimal,
    pub referral_bonus_percent: Decimal,
    pub min_purchase_quantity: i64,
    pub card_payments_enabled: bool,
    /// Cached exchange rate at snapshot time; USD per TON.
    pub usd_per_ton: Decimal,
}

impl Default for PricingSettings {
    fn default() -> Self {
        Self {
            price_per_pack_usd: defaults::PRICE_PER_PACK_USD,
            pack_size: defaults::PACK_SIZE,
            markup_percent: defaults::MARKUP_PERCENT,
            commission_invoice_percent: defaults::COMMISSION_INVOICE_PERCENT,
            commission_wallet_percent: defaults::COMMISSION_WALLET_PERCENT,
            commission_card_percent: defaults::COMMISSION_CARD_PERCENT,
            referral_bonus_percent: defaults::REFERRAL_BONUS_PERCENT,
            min_purchase_quantity: defaults::MIN_PURCHASE_QUANTITY,
            card_payments_enabled: defaults::CARD_PAYMENTS_ENABLED,
            usd_per_ton: dec!(5.0),
        }
    }
}

/// Key/value configuration store with typed accessors and upsert semantics.
#[derive(Clone)]
pub struct SettingsService {
    db: Arc<DatabaseConnection>,
}

impl SettingsService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    async fn get_raw(&self, key: &str) -> Result<Option<String>, ServiceError> {
        let row = setting::Entity::find_by_id(key.to_string())
            .one(&*self.db)
            .await?;
        Ok(row.map(|r| r.value))
    }

    pub async fn get_i64(&self, key: &str, default: i64) -> Result<i64, ServiceError> {
        Ok(self
            .get_raw(key)
            .await?
            .and_then(|v| parse_or_warn(key, &v))
            .unwrap_or(default))
    }

    pub async fn get_decimal(&self, key: &str, default: Decimal) -> Result<Decimal, ServiceError> {
        Ok(self
            .get_raw(key)
            .await?
            .and_then(|v| parse_or_warn(key, &v))
            .unwrap_or(default))
    }

    pub async fn get_bool(&self, key: &str, default: bool) -> Result<bool, ServiceError> {
        Ok(self
            .get_raw(key)
            .await?
            .and_then(|v| parse_or_warn(key, &v))
            .unwrap_or(default))
    }

    pub async fn get_string(&self, key: &str, default: &str) -> Result<String, ServiceError> {
        Ok(self.get_raw(key).await?.unwrap_or_else(|| default.to_string()))
    }

    /// Comma-separated integer list; malformed entries are skipped.
    pub async fn get_i64_list(&self, key: &str) -> Result<Vec<i64>, ServiceError> {
        Ok(self
            .get_raw(key)
            .await?
            .map(|v| parse_i64_list(&v))
            .unwrap_or_default())
    }

    /// Upserts a setting value.
    #[instrument(skip(self))]
    pub async fn set(&self, key: &str, value: &str) -> Result<(), ServiceError> {
        let model = setting::ActiveModel {
            key: Set(key.to_string()),
            value: Set(value.to_string()),
        };
        setting::Entity::insert(model)
            .on_conflict(
                OnConflict::column(setting::Column::Key)
                    .update_column(setting::Column::Value)
                    .to_owned(),
            )
            .exec(&*self.db)
            .await?;
        Ok(())
    }

    /// Upserts a setting on behalf of an admin and records the change in the
    /// audit trail.
    #[instrument(skip(self))]
    pub async fn set_for_admin(
        &self,
        admin_id: i64,
        key: &str,
        value: &str,
    ) -> Result<(), ServiceError> {
        if !self.is_admin(admin_id).await? {
            return Err(ServiceError::Forbidden(format!(
                "user {admin_id} is not an admin"
            )));
        }
        self.set(key, value).await?;
        self.log_admin_action(admin_id, &format!("set {key} = {value}"))
            .await
    }

    pub async fn log_admin_action(
        &self,
        admin_id: i64,
        action: &str,
    ) -> Result<(), ServiceError> {
        admin_log::ActiveModel {
            admin_id: Set(admin_id),
            action: Set(action.to_string()),
            created_at: Set(Utc::now()),
            ..Default::default()
        }
        .insert(&*self.db)
        .await?;
        Ok(())
    }

    pub async fn admin_ids(&self) -> Result<Vec<i64>, ServiceError> {
        self.get_i64_list(keys::ADMIN_IDS).await
    }

    pub async fn is_admin(&self, user_id: i64) -> Result<bool, ServiceError> {
        Ok(self.admin_ids().await?.contains(&user_id))
    }

    /// Loads the full pricing snapshot. `usd_per_ton` comes from the rate
    /// cache, not the store.
    pub async fn pricing_snapshot(
        &self,
        usd_per_ton: Decimal,
    ) -> Result<PricingSettings, ServiceError> {
        Ok(PricingSettings {
            price_per_pack_usd: self
                .get_decimal(keys::PRICE_PER_PACK_USD, defaults::PRICE_PER_PACK_USD)
                .await?,
            pack_size: self.get_i64(keys::PACK_SIZE, defaults::PACK_SIZE).await?,
            markup_percent: self
                .get_decimal(keys::MARKUP_PERCENT, defaults::MARKUP_PERCENT)
                .await?,
            commission_invoice_percent: self
                .get_decimal(
                    keys::COMMISSION_INVOICE_PERCENT,
                    defaults::COMMISSION_INVOICE_PERCENT,
                )
                .await?,
            commission_wallet_percent: self
                .get_decimal(
                    keys::COMMISSION_WALLET_PERCENT,
                    defaults::COMMISSION_WALLET_PERCENT,
                )
                .await?,
            commission_card_percent: self
                .get_decimal(
                    keys::COMMISSION_CARD_PERCENT,
                    defaults::COMMISSION_CARD_PERCENT,
                )
                .await?,
            referral_bonus_percent: self
                .get_decimal(
                    keys::REFERRAL_BONUS_PERCENT,
                    defaults::REFERRAL_BONUS_PERCENT,
                )
                .await?,
            min_purchase_quantity: self
                .get_i64(keys::MIN_PURCHASE_QUANTITY, defaults::MIN_PURCHASE_QUANTITY)
                .await?,
            card_payments_enabled: self
                .get_bool(keys::CARD_PAYMENTS_ENABLED, defaults::CARD_PAYMENTS_ENABLED)
                .await?,
            usd_per_ton,
        })
    }
}

fn parse_or_warn<T: std::str::FromStr>(key: &str, value: &str) -> Option<T> {
    match value.trim().parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            warn!(key, value, "Unparseable setting value; using default");
            None
        }
    }
}

fn parse_i64_list(value: &str) -> Vec<i64> {
    value
        .split(',')
        .filter_map(|part| part.trim().parse().ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_integer_lists_skipping_garbage() {
        assert_eq!(parse_i64_list("1, 2,3"), vec![1, 2, 3]);
        assert_eq!(parse_i64_list("1,x,3"), vec![1, 3]);
        assert_eq!(parse_i64_list(""), Vec::<i64>::new());
    }

    #[test]
    fn unparseable_values_fall_back() {
        assert_eq!(parse_or_warn::<i64>("pack_size", "fifty"), None);
        assert_eq!(parse_or_warn::<i64>("pack_size", " 50 "), Some(50));
        assert_eq!(
            parse_or_warn::<Decimal>("markup_percent", "12.5"),
            Some(dec!(12.5))
        );
    }
}
