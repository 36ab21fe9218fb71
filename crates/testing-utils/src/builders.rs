//! Test data builders with sensible defaults

use chrono::{DateTime, Duration, TimeZone, Utc};
use scheduler_core::models::{
    ErrorDetails, ExecutionStatus, Message, ScheduleStatus, ScheduledTask, TaskExecution,
    TaskResponseMessage, TaskSchedule,
};
use uuid::Uuid;

/// Fixed reference instant used across tests: 2024-01-01T02:00:00Z
pub fn reference_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 2, 0, 0).unwrap()
}

pub struct ScheduledTaskBuilder {
    task: ScheduledTask,
}

impl ScheduledTaskBuilder {
    pub fn new(id: i64) -> Self {
        Self {
            task: ScheduledTask::new(id, format!("task_{id}"), "settlement"),
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.task.name = name.to_string();
        self
    }

    pub fn with_component(mut self, component: &str) -> Self {
        self.task.component = component.to_string();
        self
    }

    pub fn with_dependencies(mut self, depends_on: Vec<i64>) -> Self {
        self.task.depends_on = depends_on;
        self
    }

    pub fn with_parameters(mut self, parameters: serde_json::Value) -> Self {
        self.task.parameters = parameters;
        self
    }

    pub fn inactive(mut self) -> Self {
        self.task.is_active = false;
        self
    }

    pub fn build(self) -> ScheduledTask {
        self.task
    }
}

pub struct TaskScheduleBuilder {
    schedule: TaskSchedule,
}

impl TaskScheduleBuilder {
    /// Daily schedule firing at 02:00, due at [`reference_time`]
    pub fn new(id: i64, task_id: i64) -> Self {
        Self {
            schedule: TaskSchedule::new(id, task_id, "daily@02:00", Duration::days(1), reference_time()),
        }
    }

    pub fn with_expression(mut self, expression: &str) -> Self {
        self.schedule.schedule = expression.to_string();
        self
    }

    pub fn with_increment(mut self, increment: Duration) -> Self {
        self.schedule.increment_seconds = increment.num_seconds();
        self
    }

    pub fn with_next_run(mut self, next_run: DateTime<Utc>) -> Self {
        self.schedule.next_run = next_run;
        self
    }

    pub fn with_max_run_time(mut self, max_run_time: Duration) -> Self {
        self.schedule.max_run_time_seconds = max_run_time.num_seconds();
        self
    }

    pub fn with_status(mut self, status: ScheduleStatus) -> Self {
        self.schedule.status = status;
        self
    }

    pub fn build(self) -> TaskSchedule {
        self.schedule
    }
}

pub struct TaskExecutionBuilder {
    execution: TaskExecution,
}

impl TaskExecutionBuilder {
    pub fn new(task_id: i64, schedule_id: i64, execution_date: DateTime<Utc>) -> Self {
        Self {
            execution: TaskExecution::new(task_id, schedule_id, execution_date, serde_json::json!({})),
        }
    }

    pub fn with_status(mut self, status: ExecutionStatus) -> Self {
        self.execution.status = status;
        self
    }

    pub fn with_attempt(mut self, attempt: i32) -> Self {
        self.execution.attempt = attempt;
        self
    }

    pub fn dispatched_at(mut self, at: DateTime<Utc>) -> Self {
        self.execution.dispatched_at = at;
        self.execution.updated_at = at;
        self
    }

    pub fn succeeded(self) -> Self {
        self.with_status(ExecutionStatus::Succeeded)
    }

    pub fn failed(self) -> Self {
        self.with_status(ExecutionStatus::Failed)
    }

    pub fn build(self) -> TaskExecution {
        self.execution
    }
}

/// Builds response envelopes as an executor would publish them
pub struct ResponseBuilder;

impl ResponseBuilder {
    pub fn succeeded(execution_id: Uuid, attempt: i32, records: i64) -> Message {
        Message::task_response(TaskResponseMessage::succeeded(execution_id, attempt, records))
    }

    pub fn running(execution_id: Uuid, attempt: i32) -> Message {
        Message::task_response(TaskResponseMessage::running(execution_id, attempt))
    }

    pub fn transient_failure(execution_id: Uuid, attempt: i32) -> Message {
        Message::task_response(TaskResponseMessage::failed(
            execution_id,
            attempt,
            ErrorDetails::transient("upstream timeout").with_code("TIMEOUT"),
        ))
    }

    pub fn business_failure(execution_id: Uuid, attempt: i32) -> Message {
        Message::task_response(TaskResponseMessage::failed(
            execution_id,
            attempt,
            ErrorDetails::business_validation("ledger totals do not balance").with_code("IMBALANCE"),
        ))
    }
}
