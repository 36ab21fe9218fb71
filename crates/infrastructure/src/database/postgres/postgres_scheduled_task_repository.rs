use async_trait::async_trait;
use scheduler_core::{models::ScheduledTask, traits::ScheduledTaskRepository, SchedulerResult};
use sqlx::{postgres::PgRow, PgPool, Row};
use tracing::{debug, instrument};

use crate::error_handling::{OperationContext, RepositoryErrorHelpers, RepositoryOperation};

const SELECT_COLUMNS: &str =
    "SELECT id, name, component, depends_on, is_active, parameters, created_at FROM scheduled_tasks";

pub struct PostgresScheduledTaskRepository {
    pool: PgPool,
}

impl PostgresScheduledTaskRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_task(row: &PgRow) -> SchedulerResult<ScheduledTask> {
        Ok(ScheduledTask {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            component: row.try_get("component")?,
            depends_on: row.try_get("depends_on")?,
            is_active: row.try_get("is_active")?,
            parameters: row.try_get("parameters")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[async_trait]
impl ScheduledTaskRepository for PostgresScheduledTaskRepository {
    #[instrument(skip(self), fields(task_id = %id))]
    async fn get_by_id(&self, id: i64) -> SchedulerResult<Option<ScheduledTask>> {
        let context = OperationContext::new(RepositoryOperation::Read, "任务").with_id(id);

        let row = sqlx::query(&format!("{SELECT_COLUMNS} WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| RepositoryErrorHelpers::database_error(&context, e))?;

        row.as_ref().map(Self::row_to_task).transpose()
    }

    #[instrument(skip(self))]
    async fn get_all(&self) -> SchedulerResult<Vec<ScheduledTask>> {
        let context = OperationContext::new(RepositoryOperation::Query, "任务");

        let rows = sqlx::query(&format!("{SELECT_COLUMNS} ORDER BY id"))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| RepositoryErrorHelpers::database_error(&context, e))?;

        let tasks = rows
            .iter()
            .map(Self::row_to_task)
            .collect::<SchedulerResult<Vec<_>>>()?;
        debug!("加载任务定义 {} 条", tasks.len());
        Ok(tasks)
    }
}
