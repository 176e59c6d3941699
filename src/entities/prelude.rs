pub use super::coin_data::Entity as CoinData;
pub use super::indicator_data::Entity as IndicatorData;
pub use super::sync_logs::Entity as SyncLogs;
