use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// A shop user, keyed by platform identity. `referrer_id` is set once at
/// first contact and never overwritten afterwards.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "users")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: i64,

    pub display_name: String,
    pub language: String,
    pub stars_bought: i64,
    pub referral_bonus: Decimal,
    pub referrer_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::referral_bonus::Entity")]
    ReferralBonus,
}

impl Related<super::referral_bonus::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ReferralBonus.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
