use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(RequestLog::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(RequestLog::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(RequestLog::Platform).string_len(32).not_null())
                    .col(
                        ColumnDef::new(RequestLog::Model)
                            .string_len(255)
                            .not_null()
                            .default(""),
                    )
                    .col(ColumnDef::new(RequestLog::Provider).string_len(255).not_null())
                    .col(
                        ColumnDef::new(RequestLog::HttpCode)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    // === Token使用统计 ===
                    .col(
                        ColumnDef::new(RequestLog::InputTokens)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(RequestLog::OutputTokens)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(RequestLog::CacheCreateTokens)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(RequestLog::CacheReadTokens)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(RequestLog::ReasoningTokens)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(RequestLog::IsStream)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(RequestLog::DurationSec)
                            .double()
                            .not_null()
                            .default(0.0),
                    )
                    .col(
                        ColumnDef::new(RequestLog::CreatedAt)
                            .timestamp()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_request_log_created_at")
                    .table(RequestLog::Table)
                    .col(RequestLog::CreatedAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_request_log_platform_provider")
                    .table(RequestLog::Table)
                    .col(RequestLog::Platform)
                    .col(RequestLog::Provider)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(RequestLog::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum RequestLog {
    Table,
    Id,
    Platform,
    Model,
    Provider,
    HttpCode,
    InputTokens,
    OutputTokens,
    CacheCreateTokens,
    CacheReadTokens,
    ReasoningTokens,
    IsStream,
    DurationSec,
    CreatedAt,
}
