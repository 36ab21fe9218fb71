use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{ErrorDetails, ExecutionStatus, ScheduledTask, TaskExecution};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub message_type: MessageType,
    pub timestamp: DateTime<Utc>,
    pub correlation_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum MessageType {
    TaskRequest(TaskRequestMessage),
    TaskResponse(TaskResponseMessage),
}

/// 下发给执行方的任务请求
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskRequestMessage {
    pub execution_id: Uuid,
    pub task_id: i64,
    pub task_name: String,
    pub component: String,
    pub schedule_id: i64,
    pub execution_date: DateTime<Utc>,
    pub attempt: i32,
    pub parameters: serde_json::Value,
}

impl TaskRequestMessage {
    pub fn for_execution(task: &ScheduledTask, execution: &TaskExecution) -> Self {
        Self {
            execution_id: execution.id,
            task_id: task.id,
            task_name: task.name.clone(),
            component: task.component.clone(),
            schedule_id: execution.schedule_id,
            execution_date: execution.execution_date,
            attempt: execution.attempt,
            parameters: execution.parameters.clone(),
        }
    }
}

/// 执行方上报的状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReportedStatus {
    Running,
    Succeeded,
    Failed,
    Retrying,
}

impl ReportedStatus {
    pub fn as_execution_status(&self) -> ExecutionStatus {
        match self {
            ReportedStatus::Running => ExecutionStatus::Running,
            ReportedStatus::Succeeded => ExecutionStatus::Succeeded,
            ReportedStatus::Failed => ExecutionStatus::Failed,
            ReportedStatus::Retrying => ExecutionStatus::Retrying,
        }
    }
}

/// 执行方回传的任务响应，可能被重复投递
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskResponseMessage {
    pub execution_id: Uuid,
    pub status: ReportedStatus,
    #[serde(default)]
    pub records_processed: i64,
    #[serde(default)]
    pub error: Option<ErrorDetails>,
    pub attempt: i32,
    pub timestamp: DateTime<Utc>,
}

impl TaskResponseMessage {
    pub fn succeeded(execution_id: Uuid, attempt: i32, records_processed: i64) -> Self {
        Self {
            execution_id,
            status: ReportedStatus::Succeeded,
            records_processed,
            error: None,
            attempt,
            timestamp: Utc::now(),
        }
    }

    pub fn failed(execution_id: Uuid, attempt: i32, error: ErrorDetails) -> Self {
        Self {
            execution_id,
            status: ReportedStatus::Failed,
            records_processed: 0,
            error: Some(error),
            attempt,
            timestamp: Utc::now(),
        }
    }

    pub fn running(execution_id: Uuid, attempt: i32) -> Self {
        Self {
            execution_id,
            status: ReportedStatus::Running,
            records_processed: 0,
            error: None,
            attempt,
            timestamp: Utc::now(),
        }
    }
}

impl Message {
    pub fn task_request(message: TaskRequestMessage) -> Self {
        let correlation_id = message.execution_id.to_string();
        Self {
            id: Uuid::new_v4().to_string(),
            message_type: MessageType::TaskRequest(message),
            timestamp: Utc::now(),
            correlation_id: Some(correlation_id),
        }
    }

    pub fn task_response(message: TaskResponseMessage) -> Self {
        let correlation_id = message.execution_id.to_string();
        Self {
            id: Uuid::new_v4().to_string(),
            message_type: MessageType::TaskResponse(message),
            timestamp: Utc::now(),
            correlation_id: Some(correlation_id),
        }
    }

    pub fn serialize(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn deserialize(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn serialize_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn deserialize_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    pub fn message_type_str(&self) -> &'static str {
        match &self.message_type {
            MessageType::TaskRequest(_) => "task_request",
            MessageType::TaskResponse(_) => "task_response",
        }
    }
}
