use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, warn, Instrument};

use scheduler_core::{
    models::{
        ErrorDetails, ExecutionStatus, ExecutionUpdate, Message, MessageType, ReportedStatus,
        TaskExecution, TaskResponseMessage,
    },
    traits::TaskExecutionRepository,
    SchedulerError, SchedulerResult,
};
use scheduler_infrastructure::{MetricsCollector, StructuredLogger, TaskTracer};

use crate::dependency_checker::DependencyGraph;
use crate::task_dispatcher::TaskDispatcher;

/// 响应未改变账本的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    UnknownExecution,
    AlreadyTerminal,
    /// 上报的尝试序号低于账本当前序号
    StaleAttempt,
    /// 条件更新未命中，其他处理者先一步修改了记录
    ConcurrentUpdate,
    UnsupportedMessage,
}

impl DiscardReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscardReason::UnknownExecution => "unknown_execution",
            DiscardReason::AlreadyTerminal => "already_terminal",
            DiscardReason::StaleAttempt => "stale_attempt",
            DiscardReason::ConcurrentUpdate => "concurrent_update",
            DiscardReason::UnsupportedMessage => "unsupported_message",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseOutcome {
    /// 账本已更新为该状态
    Applied(ExecutionStatus),
    /// 已以新的尝试序号重新发布请求
    Retried { attempt: i32 },
    Discarded(DiscardReason),
}

/// 幂等地把执行方响应应用到执行账本
///
/// 同一响应可能被重复投递，也可能被多个处理者并发处理；正确性依赖账本的
/// 条件更新，而不是处理顺序。
pub struct ResponseHandler {
    execution_repo: Arc<dyn TaskExecutionRepository>,
    dispatcher: Arc<TaskDispatcher>,
    graph: Arc<DependencyGraph>,
    max_attempts: i32,
    metrics: Arc<MetricsCollector>,
}

impl ResponseHandler {
    pub fn new(
        execution_repo: Arc<dyn TaskExecutionRepository>,
        dispatcher: Arc<TaskDispatcher>,
        graph: Arc<DependencyGraph>,
        max_attempts: i32,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            execution_repo,
            dispatcher,
            graph,
            max_attempts,
            metrics,
        }
    }

    pub fn max_attempts(&self) -> i32 {
        self.max_attempts
    }

    pub async fn process_message(&self, message: &Message) -> SchedulerResult<ResponseOutcome> {
        match &message.message_type {
            MessageType::TaskResponse(response) => self.handle_response(response).await,
            _ => {
                warn!(
                    "响应主题收到不支持的消息类型: {}",
                    message.message_type_str()
                );
                Ok(ResponseOutcome::Discarded(DiscardReason::UnsupportedMessage))
            }
        }
    }

    pub async fn handle_response(
        &self,
        response: &TaskResponseMessage,
    ) -> SchedulerResult<ResponseOutcome> {
        let span = TaskTracer::handle_response_span(response.execution_id, response.attempt);
        let start = Instant::now();

        let outcome = self.apply_response(response).instrument(span).await?;

        match &outcome {
            ResponseOutcome::Applied(status) => {
                self.metrics
                    .record_response(status.as_str(), start.elapsed().as_secs_f64());
            }
            ResponseOutcome::Retried { .. } => {
                self.metrics
                    .record_response(ExecutionStatus::Retrying.as_str(), start.elapsed().as_secs_f64());
            }
            ResponseOutcome::Discarded(reason) => {
                self.metrics.record_response_discarded(reason.as_str());
                StructuredLogger::log_response_discarded(response.execution_id, reason.as_str());
            }
        }
        Ok(outcome)
    }

    async fn apply_response(
        &self,
        response: &TaskResponseMessage,
    ) -> SchedulerResult<ResponseOutcome> {
        let Some(execution) = self.execution_repo.get_by_id(response.execution_id).await? else {
            return Ok(ResponseOutcome::Discarded(DiscardReason::UnknownExecution));
        };
        if execution.is_terminal() {
            debug!(
                "执行 {} 已处于终态 {}，忽略重复响应",
                execution.id, execution.status
            );
            return Ok(ResponseOutcome::Discarded(DiscardReason::AlreadyTerminal));
        }
        if response.attempt < execution.attempt {
            return Ok(ResponseOutcome::Discarded(DiscardReason::StaleAttempt));
        }

        match response.status {
            ReportedStatus::Running => {
                let mut update = ExecutionUpdate::new(&execution, ExecutionStatus::Running);
                update.started_at = Some(response.timestamp);
                self.apply(&update).await
            }
            ReportedStatus::Retrying => {
                let mut update = ExecutionUpdate::new(&execution, ExecutionStatus::Retrying);
                update.error_details = response.error.clone();
                self.apply(&update).await
            }
            ReportedStatus::Succeeded => self.complete(&execution, response).await,
            ReportedStatus::Failed => match &response.error {
                Some(error) if error.is_retryable() && response.attempt < self.max_attempts => {
                    self.retry(&execution, response, error).await
                }
                _ => self.fail(&execution, response).await,
            },
        }
    }

    async fn apply(&self, update: &ExecutionUpdate) -> SchedulerResult<ResponseOutcome> {
        if self.execution_repo.apply_update(update).await? {
            Ok(ResponseOutcome::Applied(update.status))
        } else {
            Ok(ResponseOutcome::Discarded(DiscardReason::ConcurrentUpdate))
        }
    }

    async fn complete(
        &self,
        execution: &TaskExecution,
        response: &TaskResponseMessage,
    ) -> SchedulerResult<ResponseOutcome> {
        let mut update = ExecutionUpdate::new(execution, ExecutionStatus::Succeeded);
        update.attempt = response.attempt;
        update.started_at = Some(response.timestamp);
        update.ended_at = Some(response.timestamp);
        update.records_processed = Some(response.records_processed);

        let outcome = self.apply(&update).await?;
        if outcome == ResponseOutcome::Applied(ExecutionStatus::Succeeded) {
            StructuredLogger::log_execution_completed(
                execution.id,
                execution.task_id,
                true,
                response.attempt,
                response.records_processed,
                None,
            );
            let dependents = self.graph.dependents_of(execution.task_id);
            if !dependents.is_empty() {
                StructuredLogger::log_dependents_unblocked(
                    execution.task_id,
                    execution.execution_date,
                    dependents,
                );
            }
        }
        Ok(outcome)
    }

    async fn fail(
        &self,
        execution: &TaskExecution,
        response: &TaskResponseMessage,
    ) -> SchedulerResult<ResponseOutcome> {
        let error_details = response
            .error
            .clone()
            .unwrap_or_else(|| ErrorDetails::business_validation("执行方未提供错误详情"));

        let mut update = ExecutionUpdate::new(execution, ExecutionStatus::Failed);
        update.attempt = response.attempt;
        update.ended_at = Some(response.timestamp);
        update.records_processed = Some(response.records_processed);
        update.error_details = Some(error_details.clone());

        let outcome = self.apply(&update).await?;
        if outcome == ResponseOutcome::Applied(ExecutionStatus::Failed) {
            self.metrics.record_terminal_failure();
            StructuredLogger::log_execution_completed(
                execution.id,
                execution.task_id,
                false,
                response.attempt,
                response.records_processed,
                Some(&SchedulerError::from(&error_details).to_string()),
            );
        }
        Ok(outcome)
    }

    /// 可重试失败：先以新的尝试序号条件更新账本，再重新发布请求；
    /// 发布失败时撤销更新，由调用方重新投递该响应。
    async fn retry(
        &self,
        execution: &TaskExecution,
        response: &TaskResponseMessage,
        error: &ErrorDetails,
    ) -> SchedulerResult<ResponseOutcome> {
        let task = self
            .graph
            .task(execution.task_id)
            .ok_or(SchedulerError::TaskNotFound {
                id: execution.task_id,
            })?;
        let next_attempt = response.attempt + 1;

        let mut update = ExecutionUpdate::new(execution, ExecutionStatus::Retrying);
        update.attempt = next_attempt;
        update.error_details = Some(error.clone());
        if !self.execution_repo.apply_update(&update).await? {
            return Ok(ResponseOutcome::Discarded(DiscardReason::ConcurrentUpdate));
        }

        let mut retried = execution.clone();
        update.apply_to(&mut retried);

        if let Err(e) = self.dispatcher.republish(task, &retried).await {
            let revert = ExecutionUpdate::revert(execution, next_attempt);
            match self.execution_repo.apply_update(&revert).await {
                Ok(true) => {}
                Ok(false) => warn!("执行 {} 的重试撤销未生效，记录已被修改", execution.id),
                Err(revert_err) => error!("撤销执行 {} 的重试失败: {}", execution.id, revert_err),
            }
            return Err(e);
        }

        self.metrics.record_retry();
        StructuredLogger::log_execution_retry(
            execution.id,
            execution.task_id,
            next_attempt,
            self.max_attempts,
            &SchedulerError::from(error).to_string(),
        );
        Ok(ResponseOutcome::Retried {
            attempt: next_attempt,
        })
    }
}

/// 处理失败时该响应是否值得重新投递
pub fn should_requeue(error: &SchedulerError) -> bool {
    matches!(
        error,
        SchedulerError::PublishFailure(_)
            | SchedulerError::Database(_)
            | SchedulerError::DatabaseOperation(_)
            | SchedulerError::MessageQueue(_)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use scheduler_core::models::{ErrorClassification, MessageType};
    use scheduler_testing_utils::{
        reference_time, MockMessageQueue, MockTaskExecutionRepository, ResponseBuilder,
        ScheduledTaskBuilder, TaskExecutionBuilder,
    };

    const MAX_ATTEMPTS: i32 = 5;

    struct Fixture {
        executions: MockTaskExecutionRepository,
        queue: MockMessageQueue,
        handler: ResponseHandler,
    }

    fn fixture() -> Fixture {
        let executions = MockTaskExecutionRepository::new();
        let queue = MockMessageQueue::new();
        let graph = DependencyGraph::build(vec![
            ScheduledTaskBuilder::new(3).build(),
            ScheduledTaskBuilder::new(7).with_dependencies(vec![3]).build(),
        ])
        .unwrap();
        let metrics = Arc::new(MetricsCollector::new());
        let dispatcher = Arc::new(TaskDispatcher::new(
            Arc::new(executions.clone()),
            Arc::new(queue.clone()),
            "task_requests".to_string(),
            metrics.clone(),
        ));
        let handler = ResponseHandler::new(
            Arc::new(executions.clone()),
            dispatcher,
            Arc::new(graph),
            MAX_ATTEMPTS,
            metrics,
        );
        Fixture {
            executions,
            queue,
            handler,
        }
    }

    fn seed(executions: &MockTaskExecutionRepository) -> TaskExecution {
        let execution = TaskExecutionBuilder::new(3, 1, reference_time()).build();
        executions.insert(execution.clone());
        execution
    }

    #[tokio::test]
    async fn test_success_is_applied_once() {
        let f = fixture();
        let execution = seed(&f.executions);
        let response = ResponseBuilder::succeeded(execution.id, 1, 1200);

        let first = f.handler.process_message(&response).await.unwrap();
        assert_eq!(first, ResponseOutcome::Applied(ExecutionStatus::Succeeded));

        let stored = f.executions.get(execution.id).unwrap();
        assert_eq!(stored.status, ExecutionStatus::Succeeded);
        assert_eq!(stored.records_processed, 1200);
        assert!(stored.ended_at.is_some());

        // 重复投递不再改变账本
        let second = f.handler.process_message(&response).await.unwrap();
        assert_eq!(second, ResponseOutcome::Discarded(DiscardReason::AlreadyTerminal));
        assert_eq!(f.executions.get(execution.id).unwrap(), stored);
    }

    #[tokio::test]
    async fn test_running_then_late_running_after_terminal() {
        let f = fixture();
        let execution = seed(&f.executions);

        let outcome = f
            .handler
            .process_message(&ResponseBuilder::running(execution.id, 1))
            .await
            .unwrap();
        assert_eq!(outcome, ResponseOutcome::Applied(ExecutionStatus::Running));
        assert!(f.executions.get(execution.id).unwrap().started_at.is_some());

        f.handler
            .process_message(&ResponseBuilder::succeeded(execution.id, 1, 10))
            .await
            .unwrap();
        let late = f
            .handler
            .process_message(&ResponseBuilder::running(execution.id, 1))
            .await
            .unwrap();
        assert_eq!(late, ResponseOutcome::Discarded(DiscardReason::AlreadyTerminal));
        assert_eq!(
            f.executions.get(execution.id).unwrap().status,
            ExecutionStatus::Succeeded
        );
    }

    #[tokio::test]
    async fn test_unknown_execution_is_discarded() {
        let f = fixture();
        let outcome = f
            .handler
            .process_message(&ResponseBuilder::succeeded(uuid::Uuid::new_v4(), 1, 0))
            .await
            .unwrap();
        assert_eq!(outcome, ResponseOutcome::Discarded(DiscardReason::UnknownExecution));
        assert_eq!(f.executions.count(), 0);
    }

    #[tokio::test]
    async fn test_business_failure_is_terminal_on_first_attempt() {
        let f = fixture();
        let execution = seed(&f.executions);

        let outcome = f
            .handler
            .process_message(&ResponseBuilder::business_failure(execution.id, 1))
            .await
            .unwrap();
        assert_eq!(outcome, ResponseOutcome::Applied(ExecutionStatus::Failed));

        let stored = f.executions.get(execution.id).unwrap();
        assert_eq!(stored.attempt, 1);
        let details = stored.error_details.unwrap();
        assert_eq!(details.classification, ErrorClassification::BusinessValidation);
        assert!(f.queue.messages("task_requests").is_empty());
    }

    #[tokio::test]
    async fn test_transient_failures_retry_until_max_attempts() {
        let f = fixture();
        let execution = seed(&f.executions);

        for attempt in 1..MAX_ATTEMPTS {
            let outcome = f
                .handler
                .process_message(&ResponseBuilder::transient_failure(execution.id, attempt))
                .await
                .unwrap();
            assert_eq!(outcome, ResponseOutcome::Retried { attempt: attempt + 1 });

            let stored = f.executions.get(execution.id).unwrap();
            assert_eq!(stored.status, ExecutionStatus::Retrying);
            assert_eq!(stored.attempt, attempt + 1);

            let requests = f.queue.take_messages("task_requests");
            assert_eq!(requests.len(), 1);
            match &requests[0].message_type {
                MessageType::TaskRequest(request) => {
                    assert_eq!(request.execution_id, execution.id);
                    assert_eq!(request.attempt, attempt + 1);
                }
                other => panic!("unexpected message: {other:?}"),
            }
        }

        let last = f
            .handler
            .process_message(&ResponseBuilder::transient_failure(execution.id, MAX_ATTEMPTS))
            .await
            .unwrap();
        assert_eq!(last, ResponseOutcome::Applied(ExecutionStatus::Failed));

        let stored = f.executions.get(execution.id).unwrap();
        assert_eq!(stored.status, ExecutionStatus::Failed);
        assert_eq!(stored.attempt, MAX_ATTEMPTS);
        assert!(f.queue.messages("task_requests").is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_transient_failure_retries_once() {
        let f = fixture();
        let execution = seed(&f.executions);
        let response = ResponseBuilder::transient_failure(execution.id, 1);

        f.handler.process_message(&response).await.unwrap();
        let duplicate = f.handler.process_message(&response).await.unwrap();

        assert_eq!(duplicate, ResponseOutcome::Discarded(DiscardReason::StaleAttempt));
        assert_eq!(f.executions.get(execution.id).unwrap().attempt, 2);
        assert_eq!(f.queue.messages("task_requests").len(), 1);
    }

    #[tokio::test]
    async fn test_failed_republish_reverts_retry() {
        let f = fixture();
        let execution = seed(&f.executions);
        f.queue.set_publish_failure(true);

        let err = f
            .handler
            .process_message(&ResponseBuilder::transient_failure(execution.id, 1))
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::PublishFailure(_)));
        assert!(should_requeue(&err));

        let stored = f.executions.get(execution.id).unwrap();
        assert_eq!(stored.status, ExecutionStatus::Dispatched);
        assert_eq!(stored.attempt, 1);
        assert_eq!(stored.error_details, None);

        // 重新投递后重试成功
        f.queue.set_publish_failure(false);
        let outcome = f
            .handler
            .process_message(&ResponseBuilder::transient_failure(execution.id, 1))
            .await
            .unwrap();
        assert_eq!(outcome, ResponseOutcome::Retried { attempt: 2 });
    }

    #[tokio::test]
    async fn test_failed_republish_restores_previous_error_details() {
        let f = fixture();
        let previous = ErrorDetails::transient("upstream 503").with_code("E503");
        let mut execution = TaskExecutionBuilder::new(3, 1, reference_time())
            .with_status(ExecutionStatus::Retrying)
            .with_attempt(2)
            .build();
        execution.error_details = Some(previous.clone());
        f.executions.insert(execution.clone());
        f.queue.set_publish_failure(true);

        let err = f
            .handler
            .process_message(&ResponseBuilder::transient_failure(execution.id, 2))
            .await
            .unwrap_err();
        assert!(should_requeue(&err));

        let stored = f.executions.get(execution.id).unwrap();
        assert_eq!(stored.status, ExecutionStatus::Retrying);
        assert_eq!(stored.attempt, 2);
        assert_eq!(stored.error_details, Some(previous));
    }

    #[tokio::test]
    async fn test_request_message_on_response_topic_is_ignored() {
        let f = fixture();
        let execution = seed(&f.executions);
        let task = ScheduledTaskBuilder::new(3).build();
        let message = Message::task_request(
            scheduler_core::models::TaskRequestMessage::for_execution(&task, &execution),
        );

        let outcome = f.handler.process_message(&message).await.unwrap();
        assert_eq!(outcome, ResponseOutcome::Discarded(DiscardReason::UnsupportedMessage));
    }
}
