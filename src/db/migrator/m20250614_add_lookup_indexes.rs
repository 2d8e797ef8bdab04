use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Audit views sort by time and filter by key or username
        manager
            .create_index(
                Index::create()
                    .name("idx_access_logs_created_at")
                    .table(AccessLogs::Table)
                    .col(AccessLogs::CreatedAt)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_access_logs_key_code")
                    .table(AccessLogs::Table)
                    .col(AccessLogs::KeyCode)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_access_logs_username")
                    .table(AccessLogs::Table)
                    .col(AccessLogs::Username)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        // One mirror row per (user, script)
        manager
            .create_index(
                Index::create()
                    .name("idx_access_grants_user_script")
                    .table(AccessGrants::Table)
                    .col(AccessGrants::UserId)
                    .col(AccessGrants::ScriptId)
                    .unique()
                    .if_not_exists()
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        for name in [
            "idx_access_logs_created_at",
            "idx_access_logs_key_code",
            "idx_access_logs_username",
        ] {
            manager
                .drop_index(Index::drop().name(name).table(AccessLogs::Table).to_owned())
                .await?;
        }

        manager
            .drop_index(
                Index::drop()
                    .name("idx_access_grants_user_script")
                    .table(AccessGrants::Table)
                    .to_owned(),
            )
            .await
    }
}

#[derive(Iden)]
enum AccessLogs {
    Table,
    CreatedAt,
    KeyCode,
    Username,
}

#[derive(Iden)]
enum AccessGrants {
    Table,
    UserId,
    ScriptId,
}
