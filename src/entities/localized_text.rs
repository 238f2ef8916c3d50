use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Template store for user-facing messages, keyed by logical key and
/// language. Templates carry `{name}` placeholders.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "localized_texts")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub key: String,

    #[sea_orm(primary_key, auto_increment = false)]
    pub language: String,

    pub template: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
