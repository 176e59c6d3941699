use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Create coin_data table, keyed by (time, coin_id).
        // All timestamps are integer milliseconds, UTC.
        manager
            .create_table(
                Table::create()
                    .table(CoinData::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(CoinData::Time).big_integer().not_null())
                    .col(
                        ColumnDef::new(CoinData::CoinId)
                            .string_len(100)
                            .not_null(),
                    )
                    .col(ColumnDef::new(CoinData::RawTime).big_integer().not_null())
                    .col(ColumnDef::new(CoinData::Symbol).string_len(50).null())
                    .col(ColumnDef::new(CoinData::Name).string_len(255).null())
                    .col(ColumnDef::new(CoinData::Image).text().null())
                    .col(
                        ColumnDef::new(CoinData::CurrentPrice)
                            .decimal_len(30, 12)
                            .null(),
                    )
                    .col(
                        ColumnDef::new(CoinData::MarketCap)
                            .decimal_len(30, 2)
                            .null(),
                    )
                    .col(ColumnDef::new(CoinData::MarketCapRank).integer().null())
                    .col(
                        ColumnDef::new(CoinData::FullyDilutedValuation)
                            .decimal_len(30, 2)
                            .null(),
                    )
                    .col(
                        ColumnDef::new(CoinData::TotalVolume)
                            .decimal_len(30, 2)
                            .null(),
                    )
                    .col(
                        ColumnDef::new(CoinData::CirculatingSupply)
                            .decimal_len(30, 2)
                            .null(),
                    )
                    .col(
                        ColumnDef::new(CoinData::MaxSupply)
                            .decimal_len(30, 2)
                            .null(),
                    )
                    .col(
                        ColumnDef::new(CoinData::PriceChange24h)
                            .decimal_len(30, 12)
                            .null(),
                    )
                    .col(
                        ColumnDef::new(CoinData::PriceChangePercentage24h)
                            .decimal()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(CoinData::PriceChangePercentage7d)
                            .decimal()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(CoinData::PriceChangePercentage30d)
                            .decimal()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(CoinData::MarketCapChange24h)
                            .decimal_len(30, 2)
                            .null(),
                    )
                    .col(
                        ColumnDef::new(CoinData::MarketCapChangePercentage24h)
                            .decimal()
                            .null(),
                    )
                    .col(ColumnDef::new(CoinData::Ath).decimal_len(30, 12).null())
                    .col(
                        ColumnDef::new(CoinData::AthChangePercentage)
                            .decimal()
                            .null(),
                    )
                    .col(ColumnDef::new(CoinData::AthDate).big_integer().null())
                    .col(ColumnDef::new(CoinData::Atl).decimal_len(30, 12).null())
                    .col(
                        ColumnDef::new(CoinData::AtlChangePercentage)
                            .decimal()
                            .null(),
                    )
                    .col(ColumnDef::new(CoinData::AtlDate).big_integer().null())
                    .col(ColumnDef::new(CoinData::LastUpdated).big_integer().null())
                    .col(ColumnDef::new(CoinData::CreatedAt).big_integer().null())
                    .primary_key(
                        Index::create()
                            .name("pk_coin_data")
                            .col(CoinData::Time)
                            .col(CoinData::CoinId),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_coin_data_coin_id")
                    .table(CoinData::Table)
                    .col(CoinData::CoinId)
                    .to_owned(),
            )
            .await?;

        // Descending time index for watermark and window lookups
        manager
            .create_index(
                Index::create()
                    .name("idx_coin_data_time_desc")
                    .table(CoinData::Table)
                    .col((CoinData::Time, IndexOrder::Desc))
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(CoinData::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum CoinData {
    Table,
    Time,
    CoinId,
    RawTime,
    Symbol,
    Name,
    Image,
    CurrentPrice,
    MarketCap,
    MarketCapRank,
    FullyDilutedValuation,
    TotalVolume,
    CirculatingSupply,
    MaxSupply,
    PriceChange24h,
    PriceChangePercentage24h,
    PriceChangePercentage7d,
    PriceChangePercentage30d,
    MarketCapChange24h,
    MarketCapChangePercentage24h,
    Ath,
    AthChangePercentage,
    AthDate,
    Atl,
    AtlChangePercentage,
    AtlDate,
    LastUpdated,
    CreatedAt,
}
