use tracing::Span;
use uuid::Uuid;

pub struct TaskTracer;

impl TaskTracer {
    pub fn scheduler_tick_span(instance_id: &str) -> Span {
        tracing::info_span!("scheduler_tick", instance.id = instance_id)
    }

    pub fn evaluate_schedule_span(schedule_id: i64, task_id: i64) -> Span {
        tracing::info_span!(
            "evaluate_schedule",
            schedule.id = schedule_id,
            task.id = task_id
        )
    }

    pub fn dispatch_span(task_id: i64, task_name: &str) -> Span {
        tracing::info_span!("dispatch_task", task.id = task_id, task.name = task_name)
    }

    pub fn handle_response_span(execution_id: Uuid, attempt: i32) -> Span {
        tracing::info_span!(
            "handle_response",
            execution.id = %execution_id,
            execution.attempt = attempt
        )
    }

    pub fn message_queue_span(operation: &str, queue_name: &str) -> Span {
        tracing::info_span!(
            "message_queue_operation",
            mq.operation = operation,
            mq.queue = queue_name
        )
    }
}
