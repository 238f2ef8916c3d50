use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Flat key/value configuration namespace. Values are stored as text and
/// decoded by the typed accessors in the settings service; every read has a
/// hard-coded fallback so absence never errors.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "settings")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub key: String,

    pub value: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
