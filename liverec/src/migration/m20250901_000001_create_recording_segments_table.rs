use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(RecordingSegments::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(RecordingSegments::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(RecordingSegments::CameraId)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(RecordingSegments::Filename)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(RecordingSegments::StartTs)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(RecordingSegments::DurationMs)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(RecordingSegments::SizeBytes)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(RecordingSegments::StreamUrl)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(RecordingSegments::DownloadUrl)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(RecordingSegments::RecordingType)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(RecordingSegments::CreatedAt)
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
                    .name("idx_recording_segments_camera_start")
                    .table(RecordingSegments::Table)
                    .col(RecordingSegments::CameraId)
                    .col(RecordingSegments::StartTs)
                    .if_not_exists()
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(RecordingSegments::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum RecordingSegments {
    Table,
    Id,
    CameraId,
    Filename,
    StartTs,
    DurationMs,
    SizeBytes,
    StreamUrl,
    DownloadUrl,
    RecordingType,
    CreatedAt,
}
