//! `SeaORM` Entity for the indicator_data table
//!
//! One row per (time, coin_id, indicator_name, timeframe).

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "indicator_data")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub time: i64,
    #[sea_orm(primary_key, auto_increment = false)]
    pub coin_id: String,
    #[sea_orm(primary_key, auto_increment = false)]
    pub indicator_name: String,
    #[sea_orm(primary_key, auto_increment = false)]
    pub timeframe: String,
    #[sea_orm(column_type = "Decimal(Some((30, 12)))")]
    pub indicator_value: Decimal,
    pub computed_at: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
