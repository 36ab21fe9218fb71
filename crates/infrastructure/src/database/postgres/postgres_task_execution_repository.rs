use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scheduler_core::{
    models::{ErrorDetails, ExecutionStatus, ExecutionUpdate, TaskExecution},
    traits::TaskExecutionRepository,
    SchedulerError, SchedulerResult,
};
use sqlx::{postgres::PgRow, types::Json, PgPool, Row};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::error_handling::{OperationContext, RepositoryErrorHelpers, RepositoryOperation};

/// 未结束执行的部分唯一索引
const OPEN_EXECUTION_INDEX: &str = "uq_task_executions_open";

const SELECT_COLUMNS: &str = "SELECT id, task_id, schedule_id, execution_date, parameters, status, attempt, dispatched_at, started_at, ended_at, records_processed, error_details, updated_at FROM task_executions";

pub struct PostgresTaskExecutionRepository {
    pool: PgPool,
}

impl PostgresTaskExecutionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_execution(row: &PgRow) -> SchedulerResult<TaskExecution> {
        let error_details: Option<Json<ErrorDetails>> = row.try_get("error_details")?;
        Ok(TaskExecution {
            id: row.try_get("id")?,
            task_id: row.try_get("task_id")?,
            schedule_id: row.try_get("schedule_id")?,
            execution_date: row.try_get("execution_date")?,
            parameters: row.try_get("parameters")?,
            status: row.try_get("status")?,
            attempt: row.try_get("attempt")?,
            dispatched_at: row.try_get("dispatched_at")?,
            started_at: row.try_get("started_at")?,
            ended_at: row.try_get("ended_at")?,
            records_processed: row.try_get("records_processed")?,
            error_details: error_details.map(|details| details.0),
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl TaskExecutionRepository for PostgresTaskExecutionRepository {
    #[instrument(skip(self, execution), fields(
        execution_id = %execution.id,
        task_id = %execution.task_id,
        execution_date = %execution.execution_date,
    ))]
    async fn create(&self, execution: &TaskExecution) -> SchedulerResult<TaskExecution> {
        let context =
            OperationContext::new(RepositoryOperation::Create, "任务执行").with_id(execution.id);

        let row = sqlx::query(
            r#"
            INSERT INTO task_executions (id, task_id, schedule_id, execution_date, parameters, status, attempt, dispatched_at, started_at, ended_at, records_processed, error_details, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            RETURNING id, task_id, schedule_id, execution_date, parameters, status, attempt, dispatched_at, started_at, ended_at, records_processed, error_details, updated_at
            "#,
        )
        .bind(execution.id)
        .bind(execution.task_id)
        .bind(execution.schedule_id)
        .bind(execution.execution_date)
        .bind(&execution.parameters)
        .bind(execution.status)
        .bind(execution.attempt)
        .bind(execution.dispatched_at)
        .bind(execution.started_at)
        .bind(execution.ended_at)
        .bind(execution.records_processed)
        .bind(execution.error_details.as_ref().map(Json))
        .bind(execution.updated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if RepositoryErrorHelpers::is_unique_violation(&e, OPEN_EXECUTION_INDEX) {
                SchedulerError::DuplicateExecution {
                    task_id: execution.task_id,
                    execution_date: execution.execution_date.to_rfc3339(),
                }
            } else {
                RepositoryErrorHelpers::database_error(&context, e)
            }
        })?;

        let created = Self::row_to_execution(&row)?;
        RepositoryErrorHelpers::log_operation_success(
            &context,
            Some(&format!("任务 {}, 尝试 {}", created.task_id, created.attempt)),
        );
        Ok(created)
    }

    #[instrument(skip(self), fields(execution_id = %id))]
    async fn get_by_id(&self, id: Uuid) -> SchedulerResult<Option<TaskExecution>> {
        let context = OperationContext::new(RepositoryOperation::Read, "任务执行").with_id(id);

        let row = sqlx::query(&format!("{SELECT_COLUMNS} WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| RepositoryErrorHelpers::database_error(&context, e))?;

        row.as_ref().map(Self::row_to_execution).transpose()
    }

    #[instrument(skip(self))]
    async fn find_by_task_and_date(
        &self,
        task_id: i64,
        execution_date: DateTime<Utc>,
    ) -> SchedulerResult<Vec<TaskExecution>> {
        let context = OperationContext::new(RepositoryOperation::Query, "任务执行").with_id(task_id);

        let rows = sqlx::query(&format!(
            "{SELECT_COLUMNS} WHERE task_id = $1 AND execution_date = $2 ORDER BY dispatched_at"
        ))
        .bind(task_id)
        .bind(execution_date)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RepositoryErrorHelpers::database_error(&context, e))?;

        rows.iter().map(Self::row_to_execution).collect()
    }

    #[instrument(skip(self))]
    async fn get_oldest_open_for_schedule(
        &self,
        schedule_id: i64,
    ) -> SchedulerResult<Option<TaskExecution>> {
        let context =
            OperationContext::new(RepositoryOperation::Query, "任务执行").with_id(schedule_id);

        let row = sqlx::query(&format!(
            "{SELECT_COLUMNS} WHERE schedule_id = $1 AND status NOT IN ($2, $3) ORDER BY dispatched_at LIMIT 1"
        ))
        .bind(schedule_id)
        .bind(ExecutionStatus::Succeeded)
        .bind(ExecutionStatus::Failed)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RepositoryErrorHelpers::database_error(&context, e))?;

        row.as_ref().map(Self::row_to_execution).transpose()
    }

    #[instrument(skip(self, update), fields(
        execution_id = %update.execution_id,
        status = %update.status,
        attempt = %update.attempt,
    ))]
    async fn apply_update(&self, update: &ExecutionUpdate) -> SchedulerResult<bool> {
        let context = OperationContext::new(RepositoryOperation::Update, "任务执行")
            .with_id(update.execution_id);

        let result = sqlx::query(
            r#"
            UPDATE task_executions
            SET status = $3,
                attempt = $4,
                started_at = COALESCE(started_at, $5),
                ended_at = COALESCE($6, ended_at),
                records_processed = COALESCE($7, records_processed),
                error_details = CASE WHEN $11 THEN $8 ELSE COALESCE($8, error_details) END,
                updated_at = NOW()
            WHERE id = $1
              AND attempt = $2
              AND status NOT IN ($9, $10)
            "#,
        )
        .bind(update.execution_id)
        .bind(update.expected_attempt)
        .bind(update.status)
        .bind(update.attempt)
        .bind(update.started_at)
        .bind(update.ended_at)
        .bind(update.records_processed)
        .bind(update.error_details.as_ref().map(Json))
        .bind(ExecutionStatus::Succeeded)
        .bind(ExecutionStatus::Failed)
        .bind(update.replace_error_details)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryErrorHelpers::database_error(&context, e))?;

        let applied = result.rows_affected() == 1;
        if applied {
            RepositoryErrorHelpers::log_operation_success(&context, Some(update.status.as_str()));
        } else {
            debug!("执行记录 {} 已结束或尝试序号不匹配，忽略更新", update.execution_id);
        }
        Ok(applied)
    }

    #[instrument(skip(self), fields(execution_id = %id))]
    async fn delete(&self, id: Uuid) -> SchedulerResult<()> {
        let context = OperationContext::new(RepositoryOperation::Delete, "任务执行").with_id(id);

        let result = sqlx::query("DELETE FROM task_executions WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| RepositoryErrorHelpers::database_error(&context, e))?;

        if result.rows_affected() == 0 {
            return Err(SchedulerError::ExecutionNotFound { id });
        }
        RepositoryErrorHelpers::log_operation_success(&context, None);
        Ok(())
    }
}
