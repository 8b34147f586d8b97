use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Credential::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Credential::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Credential::UserId).uuid().not_null())
                    .col(ColumnDef::new(Credential::Provider).string().not_null())
                    .col(
                        ColumnDef::new(Credential::AccessTokenCiphertext)
                            .binary()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Credential::RefreshTokenCiphertext)
                            .binary()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Credential::ExpiresAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(Credential::Scope).string().null())
                    .col(
                        ColumnDef::new(Credential::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Credential::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // One credential per (user, provider); the vault upserts against this index.
        manager
            .create_index(
                Index::create()
                    .name("idx_credentials_user_provider")
                    .table(Credential::Table)
                    .col(Credential::UserId)
                    .col(Credential::Provider)
                    .unique()
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Credential::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Credential {
    #[sea_orm(iden = "credentials")]
    Table,
    Id,
    UserId,
    Provider,
    AccessTokenCiphertext,
    RefreshTokenCiphertext,
    ExpiresAt,
    Scope,
    CreatedAt,
    UpdatedAt,
}
