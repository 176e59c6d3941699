pub use sea_orm_migration::prelude::*;

mod m20260601_000001_create_coin_data;
mod m20260601_000002_create_indicator_data;
mod m20260601_000003_create_sync_logs;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20260601_000001_create_coin_data::Migration),
            Box::new(m20260601_000002_create_indicator_data::Migration),
            Box::new(m20260601_000003_create_sync_logs::Migration),
        ]
    }
}
