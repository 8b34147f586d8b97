use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Connection::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Connection::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Connection::UserId).uuid().not_null())
                    .col(ColumnDef::new(Connection::Provider).string().not_null())
                    .col(
                        ColumnDef::new(Connection::Connected)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(Connection::LastSyncedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(Connection::LastError).text().null())
                    .col(
                        ColumnDef::new(Connection::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Connection::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_connections_user_provider")
                    .table(Connection::Table)
                    .col(Connection::UserId)
                    .col(Connection::Provider)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // The batch entrypoint scans connected rows per provider
        manager
            .create_index(
                Index::create()
                    .name("idx_connections_provider_connected")
                    .table(Connection::Table)
                    .col(Connection::Provider)
                    .col(Connection::Connected)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Connection::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Connection {
    #[sea_orm(iden = "connections")]
    Table,
    Id,
    UserId,
    Provider,
    Connected,
    LastSyncedAt,
    LastError,
    CreatedAt,
    UpdatedAt,
}
