//! Structured logging utilities
//!
//! One function per orchestration event, so every replica emits the same
//! field names for the same decision.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Structured logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
    pub include_location: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
    Compact,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "pretty" => Ok(LogFormat::Pretty),
            "compact" => Ok(LogFormat::Compact),
            other => Err(format!("unknown log format: {other}")),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Json,
            include_location: true,
        }
    }
}

pub struct StructuredLogger;

impl StructuredLogger {
    /// Log a dispatched execution
    pub fn log_task_dispatched(
        execution_id: Uuid,
        task_id: i64,
        task_name: &str,
        execution_date: DateTime<Utc>,
        attempt: i32,
    ) {
        info!(
            event = "task_dispatched",
            execution.id = %execution_id,
            task.id = task_id,
            task.name = task_name,
            execution.date = %execution_date,
            execution.attempt = attempt,
            "Task dispatched"
        );
    }

    /// Log a schedule skipped because another instance holds its lock
    pub fn log_lock_denied(schedule_id: i64, instance_id: &str) {
        debug!(
            event = "lock_denied",
            schedule.id = schedule_id,
            instance.id = instance_id,
            "Schedule locked by another instance"
        );
    }

    pub fn log_dependency_blocked(task_id: i64, execution_date: DateTime<Utc>, blocking: &[i64]) {
        info!(
            event = "dependency_blocked",
            task.id = task_id,
            execution.date = %execution_date,
            dependency.blocking = ?blocking,
            "Task dependencies not satisfied"
        );
    }

    /// Log a schedule whose latest execution exceeded its maximum run time
    pub fn log_schedule_stuck(schedule_id: i64, execution_id: Uuid, age_seconds: i64) {
        error!(
            event = "schedule_stuck",
            schedule.id = schedule_id,
            execution.id = %execution_id,
            execution.age_seconds = age_seconds,
            "Execution exceeded its maximum run time"
        );
    }

    pub fn log_schedule_recovered(schedule_id: i64) {
        info!(
            event = "schedule_recovered",
            schedule.id = schedule_id,
            "Stuck schedule returned to active"
        );
    }

    /// Log a missed period caused by a broker failure
    pub fn log_dispatch_missed(schedule_id: i64, task_id: i64, execution_date: DateTime<Utc>, reason: &str) {
        error!(
            event = "dispatch_missed",
            schedule.id = schedule_id,
            task.id = task_id,
            execution.date = %execution_date,
            error.message = reason,
            "Dispatch failed, period missed"
        );
    }

    pub fn log_execution_completed(
        execution_id: Uuid,
        task_id: i64,
        success: bool,
        attempt: i32,
        records_processed: i64,
        error_message: Option<&str>,
    ) {
        if success {
            info!(
                event = "execution_completed",
                execution.id = %execution_id,
                task.id = task_id,
                execution.attempt = attempt,
                execution.records_processed = records_processed,
                "Execution succeeded"
            );
        } else {
            error!(
                event = "execution_failed",
                execution.id = %execution_id,
                task.id = task_id,
                execution.attempt = attempt,
                error.message = error_message.unwrap_or("Unknown error"),
                "Execution failed"
            );
        }
    }

    pub fn log_execution_retry(execution_id: Uuid, task_id: i64, attempt: i32, max_attempts: i32, reason: &str) {
        warn!(
            event = "execution_retry",
            execution.id = %execution_id,
            task.id = task_id,
            execution.attempt = attempt,
            execution.max_attempts = max_attempts,
            retry.reason = reason,
            "Execution retry dispatched"
        );
    }

    /// Log a response that did not change the ledger
    pub fn log_response_discarded(execution_id: Uuid, reason: &str) {
        debug!(
            event = "response_discarded",
            execution.id = %execution_id,
            discard.reason = reason,
            "Response discarded"
        );
    }

    /// Log dependents that may now be runnable
    pub fn log_dependents_unblocked(task_id: i64, execution_date: DateTime<Utc>, dependents: &[i64]) {
        info!(
            event = "dependents_unblocked",
            task.id = task_id,
            execution.date = %execution_date,
            task.dependents = ?dependents,
            "Dependency satisfied for downstream tasks"
        );
    }

    pub fn log_system_error(component: &str, operation: &str, error: &dyn std::error::Error) {
        error!(
            event = "system_error",
            error.component = component,
            error.operation = operation,
            error.message = %error,
            "System error occurred"
        );
    }
}
