use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(SyncLogs::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(SyncLogs::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(SyncLogs::AlignedTime)
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(SyncLogs::StartedAt).big_integer().not_null())
                    .col(
                        ColumnDef::new(SyncLogs::FinishedAt)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(SyncLogs::PagesAttempted)
                            .integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(SyncLogs::PagesSucceeded)
                            .integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(SyncLogs::RowsWritten)
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(SyncLogs::Status).string_len(16).not_null())
                    .col(
                        ColumnDef::new(SyncLogs::FirstError)
                            .string_len(512)
                            .null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_sync_logs_aligned_time")
                    .table(SyncLogs::Table)
                    .col(SyncLogs::AlignedTime)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(SyncLogs::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum SyncLogs {
    Table,
    Id,
    AlignedTime,
    StartedAt,
    FinishedAt,
    PagesAttempted,
    PagesSucceeded,
    RowsWritten,
    Status,
    FirstError,
}
