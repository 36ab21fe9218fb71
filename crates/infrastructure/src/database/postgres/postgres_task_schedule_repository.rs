use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scheduler_core::{
    models::{ScheduleStatus, TaskSchedule},
    traits::TaskScheduleRepository,
    SchedulerError, SchedulerResult,
};
use sqlx::{postgres::PgRow, PgPool, Row};
use tracing::{debug, instrument};

use crate::error_handling::{OperationContext, RepositoryErrorHelpers, RepositoryOperation};

const SELECT_COLUMNS: &str = "SELECT id, task_id, schedule, increment_seconds, max_run_time_seconds, next_run, status, updated_at FROM task_schedules";

pub struct PostgresTaskScheduleRepository {
    pool: PgPool,
}

impl PostgresTaskScheduleRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_schedule(row: &PgRow) -> SchedulerResult<TaskSchedule> {
        Ok(TaskSchedule {
            id: row.try_get("id")?,
            task_id: row.try_get("task_id")?,
            schedule: row.try_get("schedule")?,
            increment_seconds: row.try_get("increment_seconds")?,
            max_run_time_seconds: row.try_get("max_run_time_seconds")?,
            next_run: row.try_get("next_run")?,
            status: row.try_get("status")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl TaskScheduleRepository for PostgresTaskScheduleRepository {
    #[instrument(skip(self), fields(schedule_id = %id))]
    async fn get_by_id(&self, id: i64) -> SchedulerResult<Option<TaskSchedule>> {
        let context = OperationContext::new(RepositoryOperation::Read, "调度").with_id(id);

        let row = sqlx::query(&format!("{SELECT_COLUMNS} WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| RepositoryErrorHelpers::database_error(&context, e))?;

        row.as_ref().map(Self::row_to_schedule).transpose()
    }

    #[instrument(skip(self))]
    async fn get_all(&self) -> SchedulerResult<Vec<TaskSchedule>> {
        let context = OperationContext::new(RepositoryOperation::Query, "调度");

        let rows = sqlx::query(&format!("{SELECT_COLUMNS} ORDER BY id"))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| RepositoryErrorHelpers::database_error(&context, e))?;

        rows.iter().map(Self::row_to_schedule).collect()
    }

    #[instrument(skip(self))]
    async fn get_due_schedules(&self, now: DateTime<Utc>) -> SchedulerResult<Vec<TaskSchedule>> {
        let context = OperationContext::new(RepositoryOperation::Query, "到期调度");

        let rows = sqlx::query(&format!(
            "{SELECT_COLUMNS} WHERE status <> $1 AND next_run <= $2 ORDER BY next_run, id"
        ))
        .bind(ScheduleStatus::Inactive)
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RepositoryErrorHelpers::database_error(&context, e))?;

        rows.iter().map(Self::row_to_schedule).collect()
    }

    #[instrument(skip(self), fields(schedule_id = %id, expected = %expected, new_next_run = %new_next_run))]
    async fn advance_next_run(
        &self,
        id: i64,
        expected: DateTime<Utc>,
        new_next_run: DateTime<Utc>,
    ) -> SchedulerResult<bool> {
        if new_next_run <= expected {
            return Err(SchedulerError::ScheduleAdvancementError {
                schedule_id: id,
                message: format!("新的执行时间 {new_next_run} 未晚于当前值 {expected}"),
            });
        }

        let context = OperationContext::new(RepositoryOperation::Update, "调度").with_id(id);

        let result = sqlx::query(
            "UPDATE task_schedules SET next_run = $3, updated_at = NOW() \
             WHERE id = $1 AND next_run = $2 AND $3 > next_run",
        )
        .bind(id)
        .bind(expected)
        .bind(new_next_run)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryErrorHelpers::database_error(&context, e))?;

        let advanced = result.rows_affected() == 1;
        if advanced {
            RepositoryErrorHelpers::log_operation_success(&context, Some("next_run 已推进"));
        } else {
            debug!("调度 {} 已被其他实例推进，跳过", id);
        }
        Ok(advanced)
    }

    #[instrument(skip(self), fields(schedule_id = %id, status = %status))]
    async fn update_status(&self, id: i64, status: ScheduleStatus) -> SchedulerResult<()> {
        let context = OperationContext::new(RepositoryOperation::Update, "调度").with_id(id);

        let result = sqlx::query(
            "UPDATE task_schedules SET status = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(status)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryErrorHelpers::database_error(&context, e))?;

        if result.rows_affected() == 0 {
            return Err(SchedulerError::ScheduleNotFound { id });
        }
        RepositoryErrorHelpers::log_operation_success(&context, Some(status.as_str()));
        Ok(())
    }
}
