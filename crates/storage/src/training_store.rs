use std::{str::FromStr, time::Duration};

use chrono::Utc;
use odp_domain::model::{SchedulingMode, TrainingInterval, TrainingSchedule};
use odp_domain::storage::{StorageResult, TrainingScheduler};
use sea_orm::{sea_query::OnConflict, EntityTrait, Set};

use crate::entity::training_schedules;
use crate::errors::StorageError;
use crate::SeaOrmStorage;

#[async_trait::async_trait]
impl TrainingScheduler for SeaOrmStorage {
    /// Rescheduling a population replaces its previous interval.
    async fn schedule(&self, population_name: &str, interval: TrainingInterval) -> StorageResult<()> {
        let active = training_schedules::ActiveModel {
            population_name: Set(population_name.to_string()),
            mode: Set(interval.mode.as_ref().to_string()),
            interval_secs: Set(interval.minimum_interval.as_secs() as i64),
            scheduled_at: Set(Utc::now()),
        };
        training_schedules::Entity::insert(active)
            .on_conflict(
                OnConflict::column(training_schedules::Column::PopulationName)
                    .update_columns([
                        training_schedules::Column::Mode,
                        training_schedules::Column::IntervalSecs,
                        training_schedules::Column::ScheduledAt,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(self.connection())
            .await
            .map_err(StorageError::from_source)?;
        Ok(())
    }

    async fn cancel(&self, population_name: &str) -> StorageResult<bool> {
        let result = training_schedules::Entity::delete_by_id(population_name.to_string())
            .exec(self.connection())
            .await
            .map_err(StorageError::from_source)?;
        Ok(result.rows_affected > 0)
    }

    async fn find_schedule(&self, population_name: &str) -> StorageResult<Option<TrainingSchedule>> {
        let maybe = training_schedules::Entity::find_by_id(population_name.to_string())
            .one(self.connection())
            .await
            .map_err(StorageError::from_source)?;
        maybe.map(schedule_from_model).transpose()
    }
}

fn schedule_from_model(model: training_schedules::Model) -> StorageResult<TrainingSchedule> {
    let mode = SchedulingMode::from_str(&model.mode)
        .map_err(|_| StorageError::Corrupt(format!("unknown scheduling mode `{}`", model.mode)))?;
    Ok(TrainingSchedule {
        population_name: model.population_name,
        interval: TrainingInterval {
            minimum_interval: Duration::from_secs(model.interval_secs.max(0) as u64),
            mode,
        },
        scheduled_at: model.scheduled_at,
    })
}
