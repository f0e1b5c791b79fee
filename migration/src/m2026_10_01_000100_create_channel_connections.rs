//! Creates the `connections` table for paired messaging accounts.
//!
//! One row per account the provider reported as paired. Secrets are stored
//! encrypted; `webhook_url` stays null until an operator configures it.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Connections::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Connections::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Connections::TenantId).uuid().not_null())
                    .col(ColumnDef::new(Connections::AgentId).uuid().not_null())
                    .col(ColumnDef::new(Connections::ProviderUnique).text().not_null())
                    .col(
                        ColumnDef::new(Connections::SecretCiphertext)
                            .binary()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Connections::SubId)
                            .text()
                            .not_null()
                            .default("3"),
                    )
                    .col(ColumnDef::new(Connections::ProviderToken).text().null())
                    .col(ColumnDef::new(Connections::PhoneNumber).text().null())
                    .col(
                        ColumnDef::new(Connections::Status)
                            .text()
                            .not_null()
                            .default("pending"),
                    )
                    .col(ColumnDef::new(Connections::WebhookUrl).text().null())
                    .col(
                        ColumnDef::new(Connections::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Connections::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_connections_tenant_id")
                            .from(Connections::Table, Connections::TenantId)
                            .to(Tenants::Table, Tenants::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_connections_tenant_id")
                    .table(Connections::Table)
                    .col(Connections::TenantId)
                    .to_owned(),
            )
            .await?;

        // Not unique: concurrent pairings can land on the same account.
        manager
            .create_index(
                Index::create()
                    .name("idx_connections_tenant_provider_unique")
                    .table(Connections::Table)
                    .col(Connections::TenantId)
                    .col(Connections::ProviderUnique)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_connections_agent_id")
                    .table(Connections::Table)
                    .col(Connections::AgentId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        for name in [
            "idx_connections_agent_id",
            "idx_connections_tenant_provider_unique",
            "idx_connections_tenant_id",
        ] {
            manager
                .drop_index(Index::drop().name(name).table(Connections::Table).to_owned())
                .await?;
        }

        manager
            .drop_table(Table::drop().table(Connections::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Connections {
    Table,
    Id,
    TenantId,
    AgentId,
    ProviderUnique,
    SecretCiphertext,
    SubId,
    ProviderToken,
    PhoneNumber,
    Status,
    WebhookUrl,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Tenants {
    Table,
    Id,
}
