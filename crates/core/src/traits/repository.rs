use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
    models::{ExecutionUpdate, ScheduleStatus, ScheduledTask, TaskExecution, TaskSchedule},
    SchedulerResult,
};

/// 任务定义仓储（只读）
#[async_trait]
pub trait ScheduledTaskRepository: Send + Sync {
    async fn get_by_id(&self, id: i64) -> SchedulerResult<Option<ScheduledTask>>;

    /// 全部任务定义，包括已停用的任务；用于启动时构建依赖图
    async fn get_all(&self) -> SchedulerResult<Vec<ScheduledTask>>;
}

/// 调度仓储
#[async_trait]
pub trait TaskScheduleRepository: Send + Sync {
    async fn get_by_id(&self, id: i64) -> SchedulerResult<Option<TaskSchedule>>;

    /// 全部调度，用于启动时校验调度表达式
    async fn get_all(&self) -> SchedulerResult<Vec<TaskSchedule>>;

    /// 所有未停用且 `next_run <= now` 的调度
    async fn get_due_schedules(&self, now: DateTime<Utc>) -> SchedulerResult<Vec<TaskSchedule>>;

    /// 条件推进 `next_run`：仅当当前值等于 `expected` 且 `new_next_run` 更晚时生效。
    /// 返回 `false` 表示其他实例已推进过该调度。
    async fn advance_next_run(
        &self,
        id: i64,
        expected: DateTime<Utc>,
        new_next_run: DateTime<Utc>,
    ) -> SchedulerResult<bool>;

    async fn update_status(&self, id: i64, status: ScheduleStatus) -> SchedulerResult<()>;
}

/// 执行账本
#[async_trait]
pub trait TaskExecutionRepository: Send + Sync {
    /// 插入新的执行记录。若同一 (task_id, execution_date) 已有未结束的执行，
    /// 返回 `SchedulerError::DuplicateExecution`。
    async fn create(&self, execution: &TaskExecution) -> SchedulerResult<TaskExecution>;

    async fn get_by_id(&self, id: Uuid) -> SchedulerResult<Option<TaskExecution>>;

    async fn find_by_task_and_date(
        &self,
        task_id: i64,
        execution_date: DateTime<Utc>,
    ) -> SchedulerResult<Vec<TaskExecution>>;

    /// 该调度最早派发且仍未结束的执行。较新的执行已结束时，
    /// 更早的悬挂执行仍需被卡住检测看到。
    async fn get_oldest_open_for_schedule(
        &self,
        schedule_id: i64,
    ) -> SchedulerResult<Option<TaskExecution>>;

    /// 单行条件更新：仅当记录未处于终态且尝试序号匹配时生效。
    /// 返回 `false` 表示记录已被其他处理者改变，本次更新被忽略。
    async fn apply_update(&self, update: &ExecutionUpdate) -> SchedulerResult<bool>;

    /// 派发回滚时删除刚创建的记录
    async fn delete(&self, id: Uuid) -> SchedulerResult<()>;
}
