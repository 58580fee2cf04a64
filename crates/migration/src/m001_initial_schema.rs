use sea_orm_migration::prelude::*;

pub struct Migration;

impl MigrationName for Migration {
    fn name(&self) -> &str {
        "m001_initial_schema"
    }
}

#[derive(DeriveIden)]
enum CaptureWindows {
    Table,
    Id,
    WindowStart,
    WindowEnd,
    Status,
    AlertCount,
    GenerationAttempts,
    DeliveryAttempts,
    DigestGeneratedAt,
    DigestSentAt,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Alerts {
    Table,
    Id,
    Fingerprint,
    Alertname,
    Status,
    Severity,
    Namespace,
    Labels,
    Annotations,
    StartsAt,
    EndsAt,
    ReceivedAt,
    CaptureWindowId,
}

#[derive(DeriveIden)]
enum Digests {
    Table,
    Id,
    CaptureWindowId,
    GeneratedAt,
    LlmModel,
    PromptTokens,
    CompletionTokens,
    RawPrompt,
    RawResponse,
    FormattedOutput,
    TeamsMessageId,
    DeliveryStatus,
    ErrorMessage,
    UpdatedAt,
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // 按依赖顺序建表：capture_windows 先于 alerts / digests
        manager
            .create_table(
                Table::create()
                    .table(CaptureWindows::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(CaptureWindows::Id).string().not_null().primary_key())
                    .col(
                        ColumnDef::new(CaptureWindows::WindowStart)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(CaptureWindows::WindowEnd)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(CaptureWindows::Status)
                            .string_len(20)
                            .not_null()
                            .default("active"),
                    )
                    .col(
                        ColumnDef::new(CaptureWindows::AlertCount)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(CaptureWindows::GenerationAttempts)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(CaptureWindows::DeliveryAttempts)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(CaptureWindows::DigestGeneratedAt)
                            .timestamp_with_time_zone(),
                    )
                    .col(ColumnDef::new(CaptureWindows::DigestSentAt).timestamp_with_time_zone())
                    .col(
                        ColumnDef::new(CaptureWindows::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(CaptureWindows::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        // 每个区间只对应一个窗口，并发创建时依赖该唯一索引
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("uq_capture_windows_window_start")
                    .table(CaptureWindows::Table)
                    .col(CaptureWindows::WindowStart)
                    .unique()
                    .to_owned(),
            )
            .await?;
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_capture_windows_window_end")
                    .table(CaptureWindows::Table)
                    .col(CaptureWindows::WindowEnd)
                    .to_owned(),
            )
            .await?;
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_capture_windows_status")
                    .table(CaptureWindows::Table)
                    .col(CaptureWindows::Status)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Alerts::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Alerts::Id).string().not_null().primary_key())
                    .col(ColumnDef::new(Alerts::Fingerprint).string_len(64).not_null())
                    .col(ColumnDef::new(Alerts::Alertname).string_len(255).not_null())
                    .col(ColumnDef::new(Alerts::Status).string_len(20).not_null())
                    .col(ColumnDef::new(Alerts::Severity).string_len(50))
                    .col(ColumnDef::new(Alerts::Namespace).string_len(255))
                    .col(ColumnDef::new(Alerts::Labels).text().not_null())
                    .col(ColumnDef::new(Alerts::Annotations).text().not_null())
                    .col(ColumnDef::new(Alerts::StartsAt).timestamp_with_time_zone().not_null())
                    .col(ColumnDef::new(Alerts::EndsAt).timestamp_with_time_zone())
                    .col(ColumnDef::new(Alerts::ReceivedAt).timestamp_with_time_zone().not_null())
                    .col(ColumnDef::new(Alerts::CaptureWindowId).string())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_alerts_capture_window")
                            .from(Alerts::Table, Alerts::CaptureWindowId)
                            .to(CaptureWindows::Table, CaptureWindows::Id)
                            .on_delete(ForeignKeyAction::SetNull),
                    )
                    .to_owned(),
            )
            .await?;

        for (name, col) in [
            ("idx_alerts_fingerprint", Alerts::Fingerprint),
            ("idx_alerts_alertname", Alerts::Alertname),
            ("idx_alerts_severity", Alerts::Severity),
            ("idx_alerts_received", Alerts::ReceivedAt),
            ("idx_alerts_capture_window_id", Alerts::CaptureWindowId),
        ] {
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name(name)
                        .table(Alerts::Table)
                        .col(col)
                        .to_owned(),
                )
                .await?;
        }

        manager
            .create_table(
                Table::create()
                    .table(Digests::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Digests::Id).string().not_null().primary_key())
                    .col(ColumnDef::new(Digests::CaptureWindowId).string().not_null())
                    .col(ColumnDef::new(Digests::GeneratedAt).timestamp_with_time_zone().not_null())
                    .col(ColumnDef::new(Digests::LlmModel).string_len(100))
                    .col(ColumnDef::new(Digests::PromptTokens).integer())
                    .col(ColumnDef::new(Digests::CompletionTokens).integer())
                    .col(ColumnDef::new(Digests::RawPrompt).text())
                    .col(ColumnDef::new(Digests::RawResponse).text())
                    .col(ColumnDef::new(Digests::FormattedOutput).text())
                    .col(ColumnDef::new(Digests::TeamsMessageId).string_len(255))
                    .col(
                        ColumnDef::new(Digests::DeliveryStatus)
                            .string_len(20)
                            .not_null()
                            .default("pending"),
                    )
                    .col(ColumnDef::new(Digests::ErrorMessage).text())
                    .col(ColumnDef::new(Digests::UpdatedAt).timestamp_with_time_zone().not_null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_digests_capture_window")
                            .from(Digests::Table, Digests::CaptureWindowId)
                            .to(CaptureWindows::Table, CaptureWindows::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        for (name, col) in [
            ("idx_digests_capture_window_id", Digests::CaptureWindowId),
            ("idx_digests_delivery_status", Digests::DeliveryStatus),
        ] {
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name(name)
                        .table(Digests::Table)
                        .col(col)
                        .to_owned(),
                )
                .await?;
        }

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Digests::Table).if_exists().to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Alerts::Table).if_exists().to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(CaptureWindows::Table).if_exists().to_owned())
            .await?;
        Ok(())
    }
}
