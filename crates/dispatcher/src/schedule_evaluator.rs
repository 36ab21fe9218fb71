use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use scheduler_core::{
    models::{ScheduleStatus, TaskSchedule},
    traits::{TaskExecutionRepository, TaskScheduleRepository},
    SchedulerError, SchedulerResult,
};
use scheduler_infrastructure::StructuredLogger;

use crate::cron_utils::CronScheduler;

/// 调度的运行状况
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleHealth {
    Healthy,
    /// 存在未结束且已超过最大运行时间的执行
    Stuck { execution_id: Uuid, age_seconds: i64 },
}

pub struct ScheduleEvaluator {
    schedule_repo: Arc<dyn TaskScheduleRepository>,
    execution_repo: Arc<dyn TaskExecutionRepository>,
}

impl ScheduleEvaluator {
    pub fn new(
        schedule_repo: Arc<dyn TaskScheduleRepository>,
        execution_repo: Arc<dyn TaskExecutionRepository>,
    ) -> Self {
        Self {
            schedule_repo,
            execution_repo,
        }
    }

    pub async fn list_due_schedules(&self, now: DateTime<Utc>) -> SchedulerResult<Vec<TaskSchedule>> {
        let due = self.schedule_repo.get_due_schedules(now).await?;
        debug!("到期调度 {} 个", due.len());
        Ok(due)
    }

    /// 重新读取调度，用于持锁后确认其仍然到期
    pub async fn reload(&self, schedule_id: i64) -> SchedulerResult<TaskSchedule> {
        self.schedule_repo
            .get_by_id(schedule_id)
            .await?
            .ok_or(SchedulerError::ScheduleNotFound { id: schedule_id })
    }

    /// 校验所有调度表达式，启动时调用
    pub async fn validate_all(&self) -> SchedulerResult<usize> {
        let schedules = self.schedule_repo.get_all().await?;
        for schedule in &schedules {
            CronScheduler::validate_cron_expression(&schedule.schedule)?;
            if schedule.increment_seconds <= 0 {
                return Err(SchedulerError::Configuration(format!(
                    "调度 {} 的周期必须为正数",
                    schedule.id
                )));
            }
        }
        Ok(schedules.len())
    }

    /// 新的 NextRun：从 `max(NextRun, now - Increment)` 之后的第一个触发时间
    pub fn compute_next_run(
        &self,
        schedule: &TaskSchedule,
        now: DateTime<Utc>,
    ) -> SchedulerResult<DateTime<Utc>> {
        let cron = CronScheduler::new(&schedule.schedule)?;
        let base = schedule.next_run.max(now - schedule.increment());

        let next_run = cron
            .next_execution_time(base)
            .ok_or_else(|| SchedulerError::ScheduleAdvancementError {
                schedule_id: schedule.id,
                message: format!("表达式 {} 在 {} 之后没有触发时间", schedule.schedule, base),
            })?;

        if next_run <= schedule.next_run {
            return Err(SchedulerError::ScheduleAdvancementError {
                schedule_id: schedule.id,
                message: format!("新的执行时间 {} 未晚于 {}", next_run, schedule.next_run),
            });
        }
        Ok(next_run)
    }

    /// 推进 NextRun。返回 `None` 表示该调度已被其他实例推进。
    pub async fn advance_schedule(
        &self,
        schedule: &TaskSchedule,
        now: DateTime<Utc>,
    ) -> SchedulerResult<Option<DateTime<Utc>>> {
        let next_run = self.compute_next_run(schedule, now)?;
        let advanced = self
            .schedule_repo
            .advance_next_run(schedule.id, schedule.next_run, next_run)
            .await?;

        if advanced {
            debug!(
                "调度 {} 的 NextRun 从 {} 推进到 {}",
                schedule.id, schedule.next_run, next_run
            );
            Ok(Some(next_run))
        } else {
            Ok(None)
        }
    }

    /// 卡住检测：只标记并上报，不取消也不重新派发。
    /// 阻塞的执行结束后，STUCK 状态恢复为 ACTIVE。
    pub async fn check_health(
        &self,
        schedule: &TaskSchedule,
        now: DateTime<Utc>,
    ) -> SchedulerResult<ScheduleHealth> {
        let oldest_open = self
            .execution_repo
            .get_oldest_open_for_schedule(schedule.id)
            .await?;

        if let Some(execution) = oldest_open.filter(|e| e.is_stale(now, schedule.max_run_time())) {
            let age_seconds = execution.age(now).num_seconds();
            if schedule.status != ScheduleStatus::Stuck {
                self.schedule_repo
                    .update_status(schedule.id, ScheduleStatus::Stuck)
                    .await?;
            }
            StructuredLogger::log_schedule_stuck(schedule.id, execution.id, age_seconds);
            return Ok(ScheduleHealth::Stuck {
                execution_id: execution.id,
                age_seconds,
            });
        }

        if schedule.status == ScheduleStatus::Stuck {
            self.schedule_repo
                .update_status(schedule.id, ScheduleStatus::Active)
                .await?;
            info!("调度 {} 的阻塞执行已结束，恢复为 ACTIVE", schedule.id);
            StructuredLogger::log_schedule_recovered(schedule.id);
        }
        Ok(ScheduleHealth::Healthy)
    }
}
