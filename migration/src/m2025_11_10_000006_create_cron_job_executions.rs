use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(CronJobExecution::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(CronJobExecution::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(CronJobExecution::JobName).string().not_null())
                    .col(
                        ColumnDef::new(CronJobExecution::StartedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(CronJobExecution::CompletedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(CronJobExecution::Status).string().not_null())
                    .col(
                        ColumnDef::new(CronJobExecution::UsersProcessed)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(CronJobExecution::ProvidersSynced)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(CronJobExecution::SuccessCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(CronJobExecution::FailureCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(CronJobExecution::ErrorMessage).text().null())
                    .col(
                        ColumnDef::new(CronJobExecution::DurationMs)
                            .big_integer()
                            .null(),
                    )
                    .col(ColumnDef::new(CronJobExecution::Metadata).json_binary().null())
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_cron_job_executions_started_at")
                    .table(CronJobExecution::Table)
                    .col(CronJobExecution::StartedAt)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(CronJobExecution::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum CronJobExecution {
    #[sea_orm(iden = "cron_job_executions")]
    Table,
    Id,
    JobName,
    StartedAt,
    CompletedAt,
    Status,
    UsersProcessed,
    ProvidersSynced,
    SuccessCount,
    FailureCount,
    ErrorMessage,
    DurationMs,
    Metadata,
}
