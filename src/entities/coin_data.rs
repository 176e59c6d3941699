//! `SeaORM` Entity for the partitioned coin_data snapshot table
//!
//! One row per (time, coin_id). `time` is the aligned bucket boundary and
//! `raw_time` the wall clock at fetch start, both integer milliseconds UTC.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "coin_data")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub time: i64,
    #[sea_orm(primary_key, auto_increment = false)]
    pub coin_id: String,
    pub raw_time: i64,
    pub symbol: Option<String>,
    pub name: Option<String>,
    #[sea_orm(column_type = "Text", nullable)]
    pub image: Option<String>,
    #[sea_orm(column_type = "Decimal(Some((30, 12)))", nullable)]
    pub current_price: Option<Decimal>,
    #[sea_orm(column_type = "Decimal(Some((30, 2)))", nullable)]
    pub market_cap: Option<Decimal>,
    pub market_cap_rank: Option<i32>,
    #[sea_orm(column_type = "Decimal(Some((30, 2)))", nullable)]
    pub fully_diluted_valuation: Option<Decimal>,
    #[sea_orm(column_type = "Decimal(Some((30, 2)))", nullable)]
    pub total_volume: Option<Decimal>,
    #[sea_orm(column_type = "Decimal(Some((30, 2)))", nullable)]
    pub circulating_supply: Option<Decimal>,
    #[sea_orm(column_type = "Decimal(Some((30, 2)))", nullable)]
    pub max_supply: Option<Decimal>,
    #[sea_orm(column_type = "Decimal(Some((30, 12)))", nullable)]
    pub price_change_24h: Option<Decimal>,
    #[sea_orm(column_type = "Decimal(None)", nullable)]
    pub price_change_percentage_24h: Option<Decimal>,
    #[sea_orm(column_type = "Decimal(None)", nullable)]
    pub price_change_percentage_7d: Option<Decimal>,
    #[sea_orm(column_type = "Decimal(None)", nullable)]
    pub price_change_percentage_30d: Option<Decimal>,
    #[sea_orm(column_type = "Decimal(Some((30, 2)))", nullable)]
    pub market_cap_change_24h: Option<Decimal>,
    #[sea_orm(column_type = "Decimal(None)", nullable)]
    pub market_cap_change_percentage_24h: Option<Decimal>,
    #[sea_orm(column_type = "Decimal(Some((30, 12)))", nullable)]
    pub ath: Option<Decimal>,
    #[sea_orm(column_type = "Decimal(None)", nullable)]
    pub ath_change_percentage: Option<Decimal>,
    pub ath_date: Option<i64>,
    #[sea_orm(column_type = "Decimal(Some((30, 12)))", nullable)]
    pub atl: Option<Decimal>,
    #[sea_orm(column_type = "Decimal(None)", nullable)]
    pub atl_change_percentage: Option<Decimal>,
    pub atl_date: Option<i64>,
    pub last_updated: Option<i64>,
    pub created_at: Option<i64>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
