use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Append-only bonus-grant history. One row per fulfilled referred order.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "referral_bonuses")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    pub referrer_id: i64,
    pub referred_id: i64,
    pub amount: Decimal,
    /// "TON" when the paying rail produced a TON amount, "USD" otherwise
    pub currency: String,
    pub granted_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::ReferrerId",
        to = "super::user::Column::Id"
    )]
    Referrer,
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Referrer.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
