use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(SyncRun::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(SyncRun::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(SyncRun::UserId).uuid().not_null())
                    .col(ColumnDef::new(SyncRun::Provider).string().not_null())
                    .col(ColumnDef::new(SyncRun::Status).string().not_null())
                    .col(ColumnDef::new(SyncRun::Trigger).string().not_null())
                    .col(
                        ColumnDef::new(SyncRun::ItemsSynced)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(SyncRun::Error).text().null())
                    .col(ColumnDef::new(SyncRun::CronExecutionId).uuid().null())
                    .col(
                        ColumnDef::new(SyncRun::StartedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(SyncRun::CompletedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(SyncRun::DurationMs).big_integer().null())
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_sync_runs_user_provider_started")
                    .table(SyncRun::Table)
                    .col(SyncRun::UserId)
                    .col(SyncRun::Provider)
                    .col(SyncRun::StartedAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_sync_runs_status")
                    .table(SyncRun::Table)
                    .col(SyncRun::Status)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(SyncRun::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum SyncRun {
    #[sea_orm(iden = "sync_runs")]
    Table,
    Id,
    UserId,
    Provider,
    Status,
    Trigger,
    ItemsSynced,
    Error,
    CronExecutionId,
    StartedAt,
    CompletedAt,
    DurationMs,
}
