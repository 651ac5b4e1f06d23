use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Cameras::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Cameras::Id).string().not_null().primary_key())
                    .col(ColumnDef::new(Cameras::InputUrl).string().not_null())
                    .col(ColumnDef::new(Cameras::RetentionDays).integer().null())
                    .col(ColumnDef::new(Cameras::ClientId).string().null())
                    .col(ColumnDef::new(Cameras::IntegratorId).string().null())
                    .col(ColumnDef::new(Cameras::RecordingType).string().not_null())
                    .col(
                        ColumnDef::new(Cameras::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Cameras::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Cameras {
    Table,
    Id,
    InputUrl,
    RetentionDays,
    ClientId,
    IntegratorId,
    RecordingType,
    UpdatedAt,
}
