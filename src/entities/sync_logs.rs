//! `SeaORM` Entity for the append-only sync_logs audit table

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "sync_logs")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub aligned_time: i64,
    pub started_at: i64,
    pub finished_at: i64,
    pub pages_attempted: i32,
    pub pages_succeeded: i32,
    pub rows_written: i64,
    pub status: String,
    pub first_error: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
