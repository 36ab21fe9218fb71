#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use scheduler_core::models::{ExecutionStatus, Message};
    use scheduler_core::traits::MessageQueue;
    use scheduler_dispatcher::{DependencyGraph, ResponseHandler, ResponseListener, TaskDispatcher};
    use scheduler_infrastructure::MetricsCollector;
    use scheduler_testing_utils::{
        reference_time, MockMessageQueue, MockTaskExecutionRepository, ResponseBuilder,
        ScheduledTaskBuilder, TaskExecutionBuilder, TestEnv,
    };

    const REQUEST_QUEUE: &str = "task_requests";
    const RESPONSE_QUEUE: &str = "task_responses";

    fn listener(
        executions: &MockTaskExecutionRepository,
        requests: &MockMessageQueue,
        responses: &MockMessageQueue,
    ) -> ResponseListener {
        let metrics = Arc::new(MetricsCollector::new());
        let graph = DependencyGraph::build(vec![ScheduledTaskBuilder::new(7).build()]).unwrap();
        let dispatcher = Arc::new(TaskDispatcher::new(
            Arc::new(executions.clone()),
            Arc::new(requests.clone()),
            REQUEST_QUEUE.to_string(),
            metrics.clone(),
        ));
        let handler = Arc::new(ResponseHandler::new(
            Arc::new(executions.clone()),
            dispatcher,
            Arc::new(graph),
            5,
            metrics,
        ));
        ResponseListener::new(handler, Arc::new(responses.clone()), RESPONSE_QUEUE.to_string(), 4)
    }

    async fn publish(queue: &MockMessageQueue, message: &Message) {
        queue.publish_message(RESPONSE_QUEUE, message).await.unwrap();
    }

    #[tokio::test]
    async fn test_listener_acks_applied_and_duplicate_responses() {
        let executions = MockTaskExecutionRepository::new();
        let execution = TaskExecutionBuilder::new(7, 1, reference_time()).build();
        executions.insert(execution.clone());
        let requests = MockMessageQueue::new();
        let responses = MockMessageQueue::new();

        let success = ResponseBuilder::succeeded(execution.id, 1, 42);
        publish(&responses, &success).await;
        publish(&responses, &success).await;

        let listener = listener(&executions, &requests, &responses);
        let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel(1);
        let handle = tokio::spawn(async move { listener.run(shutdown_rx).await });

        let settled = TestEnv::wait_for(
            || {
                let responses = responses.clone();
                async move { responses.acked().len() == 2 }
            },
            Duration::from_secs(2),
        )
        .await;
        assert!(settled);

        shutdown_tx.send(()).unwrap();
        handle.await.unwrap().unwrap();

        let stored = executions.get(execution.id).unwrap();
        assert_eq!(stored.status, ExecutionStatus::Succeeded);
        assert_eq!(stored.records_processed, 42);
        assert!(responses.nacked().is_empty());
    }

    #[tokio::test]
    async fn test_listener_requeues_when_retry_cannot_be_published() {
        let executions = MockTaskExecutionRepository::new();
        let execution = TaskExecutionBuilder::new(7, 1, reference_time()).build();
        executions.insert(execution.clone());
        let requests = MockMessageQueue::new();
        requests.set_publish_failure(true);
        let responses = MockMessageQueue::new();

        let failure = ResponseBuilder::transient_failure(execution.id, 1);
        publish(&responses, &failure).await;
        let failure_id = failure.id.clone();

        let listener = listener(&executions, &requests, &responses);
        let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel(1);
        let handle = tokio::spawn(async move { listener.run(shutdown_rx).await });

        let requeued = TestEnv::wait_for(
            || {
                let responses = responses.clone();
                let failure_id = failure_id.clone();
                async move {
                    responses
                        .nacked()
                        .iter()
                        .any(|(id, requeue)| *requeue && *id == failure_id)
                }
            },
            Duration::from_secs(2),
        )
        .await;
        assert!(requeued);
        assert_eq!(executions.get(execution.id).unwrap().attempt, 1);

        // 发布恢复后重新投递的响应触发重试
        requests.set_publish_failure(false);
        let retried = TestEnv::wait_for(
            || {
                let requests = requests.clone();
                async move { requests.messages(REQUEST_QUEUE).len() == 1 }
            },
            Duration::from_secs(3),
        )
        .await;
        assert!(retried);

        shutdown_tx.send(()).unwrap();
        handle.await.unwrap().unwrap();

        let stored = executions.get(execution.id).unwrap();
        assert_eq!(stored.status, ExecutionStatus::Retrying);
        assert_eq!(stored.attempt, 2);
    }
}
