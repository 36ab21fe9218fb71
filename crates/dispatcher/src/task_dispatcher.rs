use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::{error, info, Instrument};

use scheduler_core::{
    models::{Message, ScheduledTask, TaskExecution, TaskRequestMessage, TaskSchedule},
    traits::{MessageQueue, TaskExecutionRepository},
    SchedulerError, SchedulerResult,
};
use scheduler_infrastructure::{MetricsCollector, StructuredLogger, TaskTracer};

/// 创建执行记录并向请求主题发布任务请求
pub struct TaskDispatcher {
    execution_repo: Arc<dyn TaskExecutionRepository>,
    message_queue: Arc<dyn MessageQueue>,
    request_queue: String,
    metrics: Arc<MetricsCollector>,
}

impl TaskDispatcher {
    pub fn new(
        execution_repo: Arc<dyn TaskExecutionRepository>,
        message_queue: Arc<dyn MessageQueue>,
        request_queue: String,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            execution_repo,
            message_queue,
            request_queue,
            metrics,
        }
    }

    pub fn request_queue(&self) -> &str {
        &self.request_queue
    }

    /// 为 (任务, 逻辑日期) 派发一次执行
    ///
    /// 调用方必须持有该调度的锁并已确认依赖满足。发布失败时删除刚创建的记录，
    /// 并返回 `PublishFailure`。
    pub async fn dispatch(
        &self,
        task: &ScheduledTask,
        schedule: &TaskSchedule,
        logical_date: DateTime<Utc>,
    ) -> SchedulerResult<TaskExecution> {
        let span = TaskTracer::dispatch_span(task.id, &task.name);
        async {
            let existing = self
                .execution_repo
                .find_by_task_and_date(task.id, logical_date)
                .await?;
            if existing.iter().any(|e| !e.is_terminal()) {
                return Err(SchedulerError::DuplicateExecution {
                    task_id: task.id,
                    execution_date: logical_date.to_rfc3339(),
                });
            }

            let execution = TaskExecution::new(
                task.id,
                schedule.id,
                logical_date,
                task.parameters.clone(),
            );
            let execution = self.execution_repo.create(&execution).await?;

            if let Err(e) = self.publish_request(task, &execution).await {
                if let Err(rollback_err) = self.execution_repo.delete(execution.id).await {
                    error!(
                        "回滚执行记录 {} 失败: {}",
                        execution.id, rollback_err
                    );
                }
                return Err(e);
            }

            self.metrics.record_dispatch();
            StructuredLogger::log_task_dispatched(
                execution.id,
                task.id,
                &task.name,
                logical_date,
                execution.attempt,
            );
            Ok(execution)
        }
        .instrument(span)
        .await
    }

    /// 以执行记录当前的尝试序号重新发布请求
    pub async fn republish(
        &self,
        task: &ScheduledTask,
        execution: &TaskExecution,
    ) -> SchedulerResult<()> {
        self.publish_request(task, execution).await?;
        info!(
            "执行 {} 第 {} 次尝试已重新发布",
            execution.id, execution.attempt
        );
        Ok(())
    }

    async fn publish_request(
        &self,
        task: &ScheduledTask,
        execution: &TaskExecution,
    ) -> SchedulerResult<()> {
        let message = Message::task_request(TaskRequestMessage::for_execution(task, execution));
        let start = Instant::now();

        let result = self
            .message_queue
            .publish_message(&self.request_queue, &message)
            .instrument(TaskTracer::message_queue_span("publish", &self.request_queue))
            .await;
        self.metrics.record_publish(start.elapsed().as_secs_f64());

        result.map_err(|e| {
            self.metrics.record_publish_failure();
            SchedulerError::PublishFailure(format!(
                "执行 {} 发布到 {} 失败: {}",
                execution.id, self.request_queue, e
            ))
        })
    }
}
