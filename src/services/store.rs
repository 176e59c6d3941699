//! Snapshot store gateway.
//!
//! The only SQL path to `coin_data`, `indicator_data` and `sync_logs`.
//! Batch upserts use the Postgres on-conflict-do-update primitive with
//! bound parameters; every statement runs under a timeout and surfaces a
//! classified `StoreError`.

use sea_orm::sea_query::OnConflict;
use sea_orm::ActiveValue::Set;
use sea_orm::{
    ColumnTrait, ConnectionTrait, DatabaseConnection, DbBackend, EntityTrait, FromQueryResult,
    QueryFilter, QuerySelect, Statement,
};
use rust_decimal::Decimal;
use std::future::Future;
use std::time::Duration;

use crate::entities::{coin_data, indicator_data, sync_logs, prelude::*};
use crate::error::StoreError;

const MS_PER_MINUTE: i64 = 60_000;
pub const FIRST_ERROR_MAX: usize = 512;

/// Snapshot row projection used by the indicator engine.
#[derive(Debug, Clone, PartialEq, FromQueryResult)]
pub struct SnapshotPoint {
    pub coin_id: String,
    pub time: i64,
    pub current_price: Option<Decimal>,
    pub total_volume: Option<Decimal>,
    pub market_cap: Option<Decimal>,
}

/// One finished tick, as recorded in the sync log.
#[derive(Debug, Clone)]
pub struct SyncLogEntry {
    pub aligned_time: i64,
    pub started_at: i64,
    pub finished_at: i64,
    pub pages_attempted: i32,
    pub pages_succeeded: i32,
    pub rows_written: i64,
    pub status: String,
    pub first_error: Option<String>,
}

#[derive(Clone)]
pub struct SnapshotStore {
    db: DatabaseConnection,
    statement_timeout: Duration,
}

impl SnapshotStore {
    pub fn new(db: DatabaseConnection, statement_timeout: Duration) -> Self {
        Self {
            db,
            statement_timeout,
        }
    }

    /// Insert-or-replace one sub-batch of snapshot rows. All rows must share
    /// one aligned time; the statement is atomic. Callers chunk to the
    /// configured sub-batch size and own the retry policy.
    pub async fn upsert_snapshots(&self, rows: &[coin_data::Model]) -> Result<(), StoreError> {
        if rows.is_empty() {
            return Ok(());
        }
        debug_assert!(
            rows.windows(2).all(|w| w[0].time == w[1].time),
            "snapshot batch spans more than one bucket"
        );

        let models: Vec<coin_data::ActiveModel> =
            rows.iter().cloned().map(snapshot_active).collect();

        let insert = CoinData::insert_many(models).on_conflict(
            OnConflict::columns([coin_data::Column::Time, coin_data::Column::CoinId])
                .update_columns([
                    coin_data::Column::RawTime,
                    coin_data::Column::Symbol,
                    coin_data::Column::Name,
                    coin_data::Column::Image,
                    coin_data::Column::CurrentPrice,
                    coin_data::Column::MarketCap,
                    coin_data::Column::MarketCapRank,
                    coin_data::Column::FullyDilutedValuation,
                    coin_data::Column::TotalVolume,
                    coin_data::Column::CirculatingSupply,
                    coin_data::Column::MaxSupply,
                    coin_data::Column::PriceChange24h,
                    coin_data::Column::PriceChangePercentage24h,
                    coin_data::Column::PriceChangePercentage7d,
                    coin_data::Column::PriceChangePercentage30d,
                    coin_data::Column::MarketCapChange24h,
                    coin_data::Column::MarketCapChangePercentage24h,
                    coin_data::Column::Ath,
                    coin_data::Column::AthChangePercentage,
                    coin_data::Column::AthDate,
                    coin_data::Column::Atl,
                    coin_data::Column::AtlChangePercentage,
                    coin_data::Column::AtlDate,
                    coin_data::Column::LastUpdated,
                    coin_data::Column::CreatedAt,
                ])
                .to_owned(),
        );

        self.with_timeout(async { insert.exec(&self.db).await.map(|_| ()) })
            .await
    }

    /// Insert-or-replace one sub-batch of indicator rows, keyed by
    /// `(time, coin_id, indicator_name, timeframe)`.
    pub async fn upsert_indicators(
        &self,
        rows: &[indicator_data::Model],
    ) -> Result<(), StoreError> {
        if rows.is_empty() {
            return Ok(());
        }

        let models: Vec<indicator_data::ActiveModel> =
            rows.iter().cloned().map(indicator_active).collect();

        let insert = IndicatorData::insert_many(models).on_conflict(
            OnConflict::columns([
                indicator_data::Column::Time,
                indicator_data::Column::CoinId,
                indicator_data::Column::IndicatorName,
                indicator_data::Column::Timeframe,
            ])
            .update_columns([
                indicator_data::Column::IndicatorValue,
                indicator_data::Column::ComputedAt,
            ])
            .to_owned(),
        );

        self.with_timeout(async { insert.exec(&self.db).await.map(|_| ()) })
            .await
    }

    /// Watermark: greatest aligned time in the snapshot table.
    pub async fn latest_bucket(&self) -> Result<Option<i64>, StoreError> {
        self.max_time(
            CoinData::find()
                .select_only()
                .column_as(coin_data::Column::Time.max(), "latest")
                .into_model::<MaxTimeRow>(),
        )
        .await
    }

    /// Greatest aligned time in the indicator table; the engine's cold-start
    /// watermark.
    pub async fn latest_indicator_bucket(&self) -> Result<Option<i64>, StoreError> {
        self.max_time(
            IndicatorData::find()
                .select_only()
                .column_as(indicator_data::Column::Time.max(), "latest")
                .into_model::<MaxTimeRow>(),
        )
        .await
    }

    /// All snapshot rows at `aligned_time - off * 60_000` for each offset,
    /// projected to the columns the indicator battery needs. One query.
    pub async fn history_window(
        &self,
        aligned_time: i64,
        offsets_minutes: &[i64],
    ) -> Result<Vec<SnapshotPoint>, StoreError> {
        let times: Vec<i64> = offsets_minutes
            .iter()
            .map(|off| aligned_time - off * MS_PER_MINUTE)
            .collect();

        let query = CoinData::find()
            .select_only()
            .column(coin_data::Column::CoinId)
            .column(coin_data::Column::Time)
            .column(coin_data::Column::CurrentPrice)
            .column(coin_data::Column::TotalVolume)
            .column(coin_data::Column::MarketCap)
            .filter(coin_data::Column::Time.is_in(times))
            .into_model::<SnapshotPoint>();

        self.with_timeout(async { query.all(&self.db).await }).await
    }

    /// Rows currently visible for one bucket. Used to verify a tick's writes
    /// are durable before its terminal event goes out.
    pub async fn bucket_row_count(&self, aligned_time: i64) -> Result<u64, StoreError> {
        use sea_orm::PaginatorTrait;

        let query = CoinData::find().filter(coin_data::Column::Time.eq(aligned_time));
        self.with_timeout(async { query.count(&self.db).await })
            .await
    }

    /// Append one audit row for a finished tick. The first error message is
    /// preserved verbatim, truncated to the column width.
    pub async fn append_sync_log(&self, entry: SyncLogEntry) -> Result<(), StoreError> {
        let model = sync_logs::ActiveModel {
            aligned_time: Set(entry.aligned_time),
            started_at: Set(entry.started_at),
            finished_at: Set(entry.finished_at),
            pages_attempted: Set(entry.pages_attempted),
            pages_succeeded: Set(entry.pages_succeeded),
            rows_written: Set(entry.rows_written),
            status: Set(entry.status),
            first_error: Set(entry
                .first_error
                .map(|e| e.chars().take(FIRST_ERROR_MAX).collect())),
            ..Default::default()
        };

        self.with_timeout(async { SyncLogs::insert(model).exec(&self.db).await.map(|_| ()) })
            .await
    }

    /// Boot-time probe: select the column lists this gateway depends on with
    /// an always-false predicate, so schema drift fails at startup instead of
    /// mid-tick.
    pub async fn probe_schema(&self) -> Result<(), StoreError> {
        let probes = [
            "SELECT time, coin_id, raw_time, symbol, name, image, current_price, market_cap, \
             market_cap_rank, fully_diluted_valuation, total_volume, circulating_supply, \
             max_supply, last_updated, created_at FROM coin_data WHERE FALSE",
            "SELECT time, coin_id, indicator_name, timeframe, indicator_value, computed_at \
             FROM indicator_data WHERE FALSE",
            "SELECT id, aligned_time, started_at, finished_at, pages_attempted, \
             pages_succeeded, rows_written, status, first_error FROM sync_logs WHERE FALSE",
        ];

        for sql in probes {
            self.with_timeout(async {
                self.db
                    .query_all(Statement::from_string(DbBackend::Postgres, sql))
                    .await
                    .map(|_| ())
            })
            .await?;
        }
        Ok(())
    }

    async fn max_time(
        &self,
        query: sea_orm::Selector<sea_orm::SelectModel<MaxTimeRow>>,
    ) -> Result<Option<i64>, StoreError> {
        let row = self
            .with_timeout(async { query.one(&self.db).await })
            .await?;
        Ok(row.and_then(|r| r.latest))
    }

    async fn with_timeout<F, T>(&self, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, sea_orm::DbErr>>,
    {
        match tokio::time::timeout(self.statement_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(StoreError::classify(err)),
            Err(_) => Err(StoreError::StatementTimeout(self.statement_timeout)),
        }
    }
}

#[derive(Debug, FromQueryResult)]
struct MaxTimeRow {
    latest: Option<i64>,
}

fn snapshot_active(m: coin_data::Model) -> coin_data::ActiveModel {
    coin_data::ActiveModel {
        time: Set(m.time),
        coin_id: Set(m.coin_id),
        raw_time: Set(m.raw_time),
        symbol: Set(m.symbol),
        name: Set(m.name),
        image: Set(m.image),
        current_price: Set(m.current_price),
        market_cap: Set(m.market_cap),
        market_cap_rank: Set(m.market_cap_rank),
        fully_diluted_valuation: Set(m.fully_diluted_valuation),
        total_volume: Set(m.total_volume),
        circulating_supply: Set(m.circulating_supply),
        max_supply: Set(m.max_supply),
        price_change_24h: Set(m.price_change_24h),
        price_change_percentage_24h: Set(m.price_change_percentage_24h),
        price_change_percentage_7d: Set(m.price_change_percentage_7d),
        price_change_percentage_30d: Set(m.price_change_percentage_30d),
        market_cap_change_24h: Set(m.market_cap_change_24h),
        market_cap_change_percentage_24h: Set(m.market_cap_change_percentage_24h),
        ath: Set(m.ath),
        ath_change_percentage: Set(m.ath_change_percentage),
        ath_date: Set(m.ath_date),
        atl: Set(m.atl),
        atl_change_percentage: Set(m.atl_change_percentage),
        atl_date: Set(m.atl_date),
        last_updated: Set(m.last_updated),
        created_at: Set(m.created_at),
    }
}

fn indicator_active(m: indicator_data::Model) -> indicator_data::ActiveModel {
    indicator_data::ActiveModel {
        time: Set(m.time),
        coin_id: Set(m.coin_id),
        indicator_name: Set(m.indicator_name),
        timeframe: Set(m.timeframe),
        indicator_value: Set(m.indicator_value),
        computed_at: Set(m.computed_at),
    }
}
