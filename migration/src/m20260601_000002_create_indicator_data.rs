use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(IndicatorData::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(IndicatorData::Time)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(IndicatorData::CoinId)
                            .string_len(100)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(IndicatorData::IndicatorName)
                            .string_len(64)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(IndicatorData::Timeframe)
                            .string_len(8)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(IndicatorData::IndicatorValue)
                            .decimal_len(30, 12)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(IndicatorData::ComputedAt)
                            .big_integer()
                            .not_null(),
                    )
                    .primary_key(
                        Index::create()
                            .name("pk_indicator_data")
                            .col(IndicatorData::Time)
                            .col(IndicatorData::CoinId)
                            .col(IndicatorData::IndicatorName)
                            .col(IndicatorData::Timeframe),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_indicator_data_time_desc")
                    .table(IndicatorData::Table)
                    .col((IndicatorData::Time, IndexOrder::Desc))
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(IndicatorData::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum IndicatorData {
    Table,
    Time,
    CoinId,
    IndicatorName,
    Timeframe,
    IndicatorValue,
    ComputedAt,
}
