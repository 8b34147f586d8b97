use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Activity::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Activity::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Activity::UserId).uuid().not_null())
                    .col(ColumnDef::new(Activity::Provider).string().not_null())
                    .col(ColumnDef::new(Activity::ExternalId).string().not_null())
                    .col(ColumnDef::new(Activity::Kind).string().not_null())
                    .col(ColumnDef::new(Activity::Title).text().not_null())
                    .col(ColumnDef::new(Activity::Url).text().null())
                    .col(
                        ColumnDef::new(Activity::OccurredAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Activity::Payload).json_binary().null())
                    .col(
                        ColumnDef::new(Activity::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Activity::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // Idempotent upserts dedupe on the provider's stable identifier
        manager
            .create_index(
                Index::create()
                    .name("idx_activities_user_provider_external")
                    .table(Activity::Table)
                    .col(Activity::UserId)
                    .col(Activity::Provider)
                    .col(Activity::ExternalId)
                    .unique()
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Activity::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Activity {
    #[sea_orm(iden = "activities")]
    Table,
    Id,
    UserId,
    Provider,
    ExternalId,
    Kind,
    Title,
    Url,
    OccurredAt,
    Payload,
    CreatedAt,
    UpdatedAt,
}
