use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

use scheduler_core::{
    models::TaskSchedule, traits::DistributedLock, SchedulerError, SchedulerResult,
};
use scheduler_infrastructure::{MetricsCollector, StructuredLogger, TaskTracer};

use crate::dependency_checker::DependencyChecker;
use crate::resource_lock::run_with_lock;
use crate::schedule_evaluator::{ScheduleEvaluator, ScheduleHealth};
use crate::task_dispatcher::TaskDispatcher;

/// 单个到期调度在一次评估中的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleOutcome {
    Dispatched {
        execution_id: Uuid,
        logical_date: DateTime<Utc>,
    },
    /// 锁被其他副本持有
    LockDenied,
    /// 依赖未满足，NextRun 保持不变，下个周期重新评估
    DependencyBlocked { blocking: Vec<i64> },
    Stuck {
        execution_id: Uuid,
        age_seconds: i64,
    },
    /// 持锁后发现调度已被推进或不再到期
    AlreadyAdvanced,
    /// 任务已停用，只推进 NextRun
    TaskInactive,
    /// NextRun 已推进但请求未能发布，本周期不再补发
    Missed { reason: String },
    /// 该 (任务, 日期) 已存在未结束的执行
    Duplicate,
}

impl ScheduleOutcome {
    /// 预期内的错误由调度循环吸收为评估结果，留待下个周期处理
    pub fn from_expected(error: SchedulerError) -> SchedulerResult<Self> {
        match error {
            SchedulerError::LockAcquireFailed { .. } => Ok(ScheduleOutcome::LockDenied),
            SchedulerError::DependencyUnsatisfied { blocking, .. } => {
                Ok(ScheduleOutcome::DependencyBlocked { blocking })
            }
            SchedulerError::StaleExecutionDetected {
                execution_id,
                age_seconds,
                ..
            } => Ok(ScheduleOutcome::Stuck {
                execution_id,
                age_seconds,
            }),
            SchedulerError::PublishFailure(reason) => Ok(ScheduleOutcome::Missed { reason }),
            SchedulerError::DuplicateExecution { .. } => Ok(ScheduleOutcome::Duplicate),
            other => Err(other),
        }
    }
}

/// 一次轮询的汇总
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub evaluated: usize,
    pub dispatched: usize,
    pub lock_denied: usize,
    pub blocked: usize,
    pub stuck: usize,
    pub skipped: usize,
    pub missed: usize,
    pub errors: usize,
}

impl TickReport {
    fn record(&mut self, outcome: &ScheduleOutcome) {
        self.evaluated += 1;
        match outcome {
            ScheduleOutcome::Dispatched { .. } => self.dispatched += 1,
            ScheduleOutcome::LockDenied => self.lock_denied += 1,
            ScheduleOutcome::DependencyBlocked { .. } => self.blocked += 1,
            ScheduleOutcome::Stuck { .. } => self.stuck += 1,
            ScheduleOutcome::AlreadyAdvanced
            | ScheduleOutcome::TaskInactive
            | ScheduleOutcome::Duplicate => self.skipped += 1,
            ScheduleOutcome::Missed { .. } => self.missed += 1,
        }
    }
}

/// 调度循环：周期性评估到期调度，在调度锁保护下推进 NextRun 并派发
pub struct TaskScheduler {
    evaluator: Arc<ScheduleEvaluator>,
    dependency_checker: Arc<DependencyChecker>,
    dispatcher: Arc<TaskDispatcher>,
    lock: Arc<dyn DistributedLock>,
    instance_id: String,
    poll_interval: Duration,
    metrics: Arc<MetricsCollector>,
}

impl TaskScheduler {
    pub fn new(
        evaluator: Arc<ScheduleEvaluator>,
        dependency_checker: Arc<DependencyChecker>,
        dispatcher: Arc<TaskDispatcher>,
        lock: Arc<dyn DistributedLock>,
        instance_id: String,
        poll_interval: Duration,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            evaluator,
            dependency_checker,
            dispatcher,
            lock,
            instance_id,
            poll_interval,
            metrics,
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// 按轮询间隔运行，收到关闭信号后在当前轮次结束时退出
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) -> SchedulerResult<()> {
        info!(
            instance_id = %self.instance_id,
            "调度循环启动，轮询间隔 {:?}",
            self.poll_interval
        );
        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!(instance_id = %self.instance_id, "调度循环收到关闭信号");
                    break;
                }
                _ = interval.tick() => {
                    if let Err(e) = self.tick(Utc::now()).await {
                        StructuredLogger::log_system_error("scheduler", "tick", &e);
                    }
                }
            }
        }
        Ok(())
    }

    /// 评估一次所有到期调度
    ///
    /// 单个调度的失败只记录并计数，不影响其余调度。
    pub async fn tick(&self, now: DateTime<Utc>) -> SchedulerResult<TickReport> {
        let span = TaskTracer::scheduler_tick_span(&self.instance_id);
        async {
            let start = Instant::now();
            let due = self.evaluator.list_due_schedules(now).await?;
            let mut report = TickReport::default();

            for schedule in due {
                match self.evaluate_schedule(&schedule, now).await {
                    Ok(outcome) => {
                        debug!("调度 {} 评估结果: {:?}", schedule.id, outcome);
                        report.record(&outcome);
                    }
                    Err(e) => {
                        StructuredLogger::log_system_error("scheduler", "evaluate_schedule", &e);
                        report.evaluated += 1;
                        report.errors += 1;
                    }
                }
            }

            self.metrics.record_tick(start.elapsed().as_secs_f64());
            if report.evaluated > 0 {
                info!(
                    "本轮评估 {} 个调度，派发 {}，锁冲突 {}，依赖阻塞 {}，卡住 {}，错过 {}，错误 {}",
                    report.evaluated,
                    report.dispatched,
                    report.lock_denied,
                    report.blocked,
                    report.stuck,
                    report.missed,
                    report.errors
                );
            }
            Ok::<_, SchedulerError>(report)
        }
        .instrument(span)
        .await
    }

    /// 在调度锁保护下评估单个调度
    pub async fn evaluate_schedule(
        &self,
        schedule: &TaskSchedule,
        now: DateTime<Utc>,
    ) -> SchedulerResult<ScheduleOutcome> {
        let span = TaskTracer::evaluate_schedule_span(schedule.id, schedule.task_id);
        let result = run_with_lock(self.lock.as_ref(), schedule.id, || {
            self.evaluate_locked(schedule.id, now)
        })
        .instrument(span)
        .await;

        match result {
            Err(e) if e.is_expected() => {
                if let SchedulerError::LockAcquireFailed { key } = &e {
                    self.metrics.record_lock_denied();
                    StructuredLogger::log_lock_denied(*key, &self.instance_id);
                }
                ScheduleOutcome::from_expected(e)
            }
            other => other,
        }
    }

    async fn evaluate_locked(
        &self,
        schedule_id: i64,
        now: DateTime<Utc>,
    ) -> SchedulerResult<ScheduleOutcome> {
        // 列表是锁外读取的，持锁后以最新状态为准
        let schedule = self.evaluator.reload(schedule_id).await?;
        if !schedule.is_due(now) {
            return Ok(ScheduleOutcome::AlreadyAdvanced);
        }

        if let ScheduleHealth::Stuck {
            execution_id,
            age_seconds,
        } = self.evaluator.check_health(&schedule, now).await?
        {
            self.metrics.record_schedule_stuck();
            return Err(SchedulerError::StaleExecutionDetected {
                schedule_id: schedule.id,
                execution_id,
                age_seconds,
            });
        }

        let graph = self.dependency_checker.graph();
        let task = graph
            .task(schedule.task_id)
            .ok_or(SchedulerError::TaskNotFound {
                id: schedule.task_id,
            })?;
        let logical_date = schedule.logical_date();

        if !task.is_active {
            if self.evaluator.advance_schedule(&schedule, now).await?.is_none() {
                return Ok(ScheduleOutcome::AlreadyAdvanced);
            }
            info!("任务 {} 已停用，调度 {} 只推进不派发", task.id, schedule.id);
            return Ok(ScheduleOutcome::TaskInactive);
        }

        self.dependency_checker
            .ensure_satisfied(task.id, logical_date)
            .await
            .inspect_err(|e| {
                if let SchedulerError::DependencyUnsatisfied { blocking, .. } = e {
                    self.metrics.record_dependency_blocked();
                    StructuredLogger::log_dependency_blocked(task.id, logical_date, blocking);
                }
            })?;

        // 先推进再派发，发布失败时本周期记为错过
        if self.evaluator.advance_schedule(&schedule, now).await?.is_none() {
            return Ok(ScheduleOutcome::AlreadyAdvanced);
        }

        let execution = self
            .dispatcher
            .dispatch(task, &schedule, logical_date)
            .await
            .inspect_err(|e| match e {
                SchedulerError::PublishFailure(reason) => {
                    StructuredLogger::log_dispatch_missed(schedule.id, task.id, logical_date, reason)
                }
                SchedulerError::DuplicateExecution { .. } => warn!(
                    "任务 {} 在 {} 已有未结束的执行，跳过派发",
                    task.id, logical_date
                ),
                _ => {}
            })?;

        Ok(ScheduleOutcome::Dispatched {
            execution_id: execution.id,
            logical_date,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expected_errors_become_outcomes() {
        let execution_id = Uuid::new_v4();
        assert_eq!(
            ScheduleOutcome::from_expected(SchedulerError::StaleExecutionDetected {
                schedule_id: 1,
                execution_id,
                age_seconds: 18_060,
            })
            .unwrap(),
            ScheduleOutcome::Stuck {
                execution_id,
                age_seconds: 18_060
            }
        );
        assert_eq!(
            ScheduleOutcome::from_expected(SchedulerError::DependencyUnsatisfied {
                task_id: 7,
                blocking: vec![3],
            })
            .unwrap(),
            ScheduleOutcome::DependencyBlocked { blocking: vec![3] }
        );
        assert_eq!(
            ScheduleOutcome::from_expected(SchedulerError::LockAcquireFailed { key: 42 }).unwrap(),
            ScheduleOutcome::LockDenied
        );
        assert_eq!(
            ScheduleOutcome::from_expected(SchedulerError::PublishFailure("broker down".into()))
                .unwrap(),
            ScheduleOutcome::Missed {
                reason: "broker down".into()
            }
        );
    }

    #[test]
    fn test_unexpected_errors_pass_through() {
        let err = ScheduleOutcome::from_expected(SchedulerError::ScheduleNotFound { id: 9 })
            .unwrap_err();
        assert!(matches!(err, SchedulerError::ScheduleNotFound { id: 9 }));
        assert!(!err.is_expected());
    }
}
