use sea_orm::sea_query::{ColumnDef, Index, Table, TableCreateStatement};
use sea_orm::{ConnectionTrait, DatabaseBackend, DatabaseConnection};

use crate::entity::{downloader_state, event_logs, remote_data, request_logs, training_schedules};
use crate::errors::StorageError;
use odp_domain::storage::StorageResult;

pub async fn run_migrations(db: &DatabaseConnection) -> StorageResult<()> {
    let backend = db.get_database_backend();

    let remote_data_table = Table::create()
        .table(remote_data::Entity)
        .col(
            ColumnDef::new(remote_data::Column::Key)
                .string_len(255)
                .not_null()
                .primary_key(),
        )
        .col(ColumnDef::new(remote_data::Column::Data).binary().not_null())
        .to_owned();
    create_table(db, backend, remote_data_table).await?;

    let request_logs_table = Table::create()
        .table(request_logs::Entity)
        .col(
            ColumnDef::new(request_logs::Column::QueryId)
                .big_integer()
                .not_null()
                .auto_increment()
                .primary_key(),
        )
        .col(ColumnDef::new(request_logs::Column::Rows).text().not_null())
        .col(
            ColumnDef::new(request_logs::Column::CreatedAt)
                .timestamp_with_time_zone()
                .not_null(),
        )
        .to_owned();
    create_table(db, backend, request_logs_table).await?;

    let event_logs_table = Table::create()
        .table(event_logs::Entity)
        .col(
            ColumnDef::new(event_logs::Column::Id)
                .big_integer()
                .not_null()
                .auto_increment()
                .primary_key(),
        )
        .col(
            ColumnDef::new(event_logs::Column::QueryId)
                .big_integer()
                .not_null(),
        )
        .col(ColumnDef::new(event_logs::Column::RowIndex).integer().not_null())
        .col(ColumnDef::new(event_logs::Column::EventType).integer().not_null())
        .col(ColumnDef::new(event_logs::Column::Data).text().not_null())
        .col(
            ColumnDef::new(event_logs::Column::CreatedAt)
                .timestamp_with_time_zone()
                .not_null(),
        )
        .to_owned();
    create_table(db, backend, event_logs_table).await?;

    let event_time_index = Index::create()
        .if_not_exists()
        .name("idx_event_logs_created_at")
        .table(event_logs::Entity)
        .col(event_logs::Column::CreatedAt)
        .to_owned();
    db.execute(backend.build(&event_time_index))
        .await
        .map_err(StorageError::from_source)?;

    let schedules_table = Table::create()
        .table(training_schedules::Entity)
        .col(
            ColumnDef::new(training_schedules::Column::PopulationName)
                .string_len(255)
                .not_null()
                .primary_key(),
        )
        .col(
            ColumnDef::new(training_schedules::Column::Mode)
                .string_len(16)
                .not_null(),
        )
        .col(
            ColumnDef::new(training_schedules::Column::IntervalSecs)
                .big_integer()
                .not_null(),
        )
        .col(
            ColumnDef::new(training_schedules::Column::ScheduledAt)
                .timestamp_with_time_zone()
                .not_null(),
        )
        .to_owned();
    create_table(db, backend, schedules_table).await?;

    let state_table = Table::create()
        .table(downloader_state::Entity)
        .col(
            ColumnDef::new(downloader_state::Column::Key)
                .string_len(64)
                .not_null()
                .primary_key(),
        )
        .col(
            ColumnDef::new(downloader_state::Column::Value)
                .text()
                .not_null(),
        )
        .to_owned();
    create_table(db, backend, state_table).await?;

    Ok(())
}

async fn create_table(
    db: &DatabaseConnection,
    backend: DatabaseBackend,
    mut statement: TableCreateStatement,
) -> StorageResult<()> {
    statement.if_not_exists();
    db.execute(backend.build(&statement))
        .await
        .map_err(StorageError::from_source)?;
    Ok(())
}
