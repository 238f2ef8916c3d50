use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};

use crate::{
    entities::{
        referral_bonus,
        sales_stats::{self, STATS_ROW_ID},
        user,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::settings::SettingsService,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferrerRank {
    pub user_id: i64,
    pub display_name: String,
    pub referrals: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurchaserRank {
    pub user_id: i64,
    pub display_name: String,
    pub stars_bought: i64,
}

/// Referral bonus history and aggregate sale counters. The mutating
/// operations take an explicit connection so the reconciliation engine can
/// run them inside its fulfillment transaction.
#[derive(Clone)]
pub struct LedgerService {
    db: Arc<DatabaseConnection>,
    settings: SettingsService,
    event_sender: Option<Arc<EventSender>>,
}

impl LedgerService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        settings: SettingsService,
        event_sender: Option<Arc<EventSender>>,
    ) -> Self {
        Self {
            db,
            settings,
            event_sender,
        }
    }

    /// Current aggregate counters; zeroes when nothing was sold yet.
    pub async fn stats(&self) -> Result<sales_stats::Model, ServiceError> {
        Ok(sales_stats::Entity::find_by_id(STATS_ROW_ID)
            .one(&*self.db)
            .await?
            .unwrap_or(sales_stats::Model {
                id: STATS_ROW_ID,
                total_sold: 0,
                total_profit_usd: Decimal::ZERO,
                total_profit_ton: Decimal::ZERO,
                updated_at: Utc::now(),
            }))
    }

    /// Adds one fulfilled sale to the counters.
    pub async fn record_sale<C: ConnectionTrait>(
        &self,
        conn: &C,
        quantity: i64,
        profit_usd: Decimal,
        profit_ton: Option<Decimal>,
    ) -> Result<(), ServiceError> {
        let now = Utc::now();
        match sales_stats::Entity::find_by_id(STATS_ROW_ID).one(conn).await? {
            Some(row) => {
                let mut active: sales_stats::ActiveModel = row.clone().into();
                active.total_sold = Set(row.total_sold + quantity);
                active.total_profit_usd = Set(row.total_profit_usd + profit_usd);
                active.total_profit_ton =
                    Set(row.total_profit_ton + profit_ton.unwrap_or(Decimal::ZERO));
                active.updated_at = Set(now);
                active.update(conn).await?;
            }
            None => {
                sales_stats::ActiveModel {
                    id: Set(STATS_ROW_ID),
                    total_sold: Set(quantity),
                    total_profit_usd: Set(profit_usd),
                    total_profit_ton: Set(profit_ton.unwrap_or(Decimal::ZERO)),
                    updated_at: Set(now),
                }
                .insert(conn)
                .await?;
            }
        }
        Ok(())
    }

    /// Appends one bonus-grant record and accumulates the referrer's total.
    pub async fn credit_referrer<C: ConnectionTrait>(
        &self,
        conn: &C,
        referrer_id: i64,
        referred_id: i64,
        amount: Decimal,
        currency: &str,
    ) -> Result<(), ServiceError> {
        referral_bonus::ActiveModel {
            referrer_id: Set(referrer_id),
            referred_id: Set(referred_id),
            amount: Set(amount),
            currency: Set(currency.to_string()),
            granted_at: Set(Utc::now()),
            ..Default::default()
        }
        .insert(conn)
        .await?;

        let referrer = user::Entity::find_by_id(referrer_id)
            .one(conn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("referrer {referrer_id} not found")))?;
        let mut active: user::ActiveModel = referrer.clone().into();
        active.referral_bonus = Set(referrer.referral_bonus + amount);
        active.update(conn).await?;
        Ok(())
    }

    /// Bonus-grant history for one referrer, oldest first.
    pub async fn bonus_history(
        &self,
        referrer_id: i64,
    ) -> Result<Vec<referral_bonus::Model>, ServiceError> {
        Ok(referral_bonus::Entity::find()
            .filter(referral_bonus::Column::ReferrerId.eq(referrer_id))
            .order_by_asc(referral_bonus::Column::Id)
            .all(&*self.db)
            .await?)
    }

    /// Referrers ranked by how many users they brought in. Ties keep the
    /// order the referrals first appeared in.
    pub async fn top_referrers_by_count(&self, n: u64) -> Result<Vec<ReferrerRank>, ServiceError> {
        let referred = user::Entity::find()
            .filter(user::Column::ReferrerId.is_not_null())
            .order_by_asc(user::Column::Id)
            .all(&*self.db)
            .await?;

        let mut counts: Vec<(i64, i64)> = Vec::new();
        for row in referred {
            let Some(referrer_id) = row.referrer_id else { continue };
            match counts.iter_mut().find(|(id, _)| *id == referrer_id) {
                Some((_, count)) => *count += 1,
                None => counts.push((referrer_id, 1)),
            }
        }
        counts.sort_by(|a, b| b.1.cmp(&a.1));
        counts.truncate(n as usize);

        let mut ranks = Vec::with_capacity(counts.len());
        for (referrer_id, referrals) in counts {
            let display_name = user::Entity::find_by_id(referrer_id)
                .one(&*self.db)
                .await?
                .map(|u| u.display_name)
                .unwrap_or_default();
            ranks.push(ReferrerRank {
                user_id: referrer_id,
                display_name,
                referrals,
            });
        }
        Ok(ranks)
    }

    /// Buyers ranked by cumulative stars purchased.
    pub async fn top_purchasers_by_volume(
        &self,
        n: u64,
    ) -> Result<Vec<PurchaserRank>, ServiceError> {
        let rows = user::Entity::find()
            .filter(user::Column::StarsBought.gt(0))
            .order_by_desc(user::Column::StarsBought)
            .order_by_asc(user::Column::Id)
            .limit(Some(n))
            .all(&*self.db)
            .await?;
        Ok(rows
            .into_iter()
            .map(|u| PurchaserRank {
                user_id: u.id,
                display_name: u.display_name,
                stars_bought: u.stars_bought,
            })
            .collect())
    }

    /// Zeroes the two profit accumulators. Sold-quantity counters are
    /// untouched. Admin-only, audit-logged.
    #[instrument(skip(self))]
    pub async fn reset_profit_counters(&self, admin_id: i64) -> Result<(), ServiceError> {
        if !self.settings.is_admin(admin_id).await? {
            return Err(ServiceError::Forbidden(format!(
                "user {admin_id} is not an admin"
            )));
        }

        if let Some(row) = sales_stats::Entity::find_by_id(STATS_ROW_ID)
            .one(&*self.db)
            .await?
        {
            let mut active: sales_stats::ActiveModel = row.into();
            active.total_profit_usd = Set(Decimal::ZERO);
            active.total_profit_ton = Set(Decimal::ZERO);
            active.updated_at = Set(Utc::now());
            active.update(&*self.db).await?;
        }

        self.settings
            .log_admin_action(admin_id, "reset profit counters")
            .await?;
        info!(admin_id, "Profit counters reset");

        if let Some(sender) = &self.event_sender {
            let _ = sender.send(Event::ProfitCountersReset { admin_id }).await;
        }
        Ok(())
    }
}
