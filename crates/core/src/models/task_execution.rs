use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ExecutionStatus {
    #[serde(rename = "DISPATCHED")]
    Dispatched,
    #[serde(rename = "RUNNING")]
    Running,
    #[serde(rename = "RETRYING")]
    Retrying,
    #[serde(rename = "SUCCEEDED")]
    Succeeded,
    #[serde(rename = "FAILED")]
    Failed,
}

impl ExecutionStatus {
    pub const TERMINAL: [ExecutionStatus; 2] = [ExecutionStatus::Succeeded, ExecutionStatus::Failed];

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Dispatched => "DISPATCHED",
            ExecutionStatus::Running => "RUNNING",
            ExecutionStatus::Retrying => "RETRYING",
            ExecutionStatus::Succeeded => "SUCCEEDED",
            ExecutionStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecutionStatus::Succeeded | ExecutionStatus::Failed)
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DISPATCHED" => Ok(ExecutionStatus::Dispatched),
            "RUNNING" => Ok(ExecutionStatus::Running),
            "RETRYING" => Ok(ExecutionStatus::Retrying),
            "SUCCEEDED" => Ok(ExecutionStatus::Succeeded),
            "FAILED" => Ok(ExecutionStatus::Failed),
            _ => Err(format!("Invalid execution status: {s}")),
        }
    }
}

impl sqlx::Type<sqlx::Postgres> for ExecutionStatus {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        sqlx::postgres::PgTypeInfo::with_name("VARCHAR")
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Postgres> for ExecutionStatus {
    fn decode(value: sqlx::postgres::PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
        s.parse::<ExecutionStatus>().map_err(Into::into)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Postgres> for ExecutionStatus {
    fn encode_by_ref(
        &self,
        buf: &mut sqlx::postgres::PgArgumentBuffer,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <&str as sqlx::Encode<sqlx::Postgres>>::encode(self.as_str(), buf)
    }
}

/// 错误分类由执行方给出，调度器不做推断
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClassification {
    /// 超时、下游不可用等，可重试
    Transient,
    /// 输入非法、被下游拒绝，永不重试
    BusinessValidation,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorDetails {
    pub classification: ErrorClassification,
    #[serde(default)]
    pub code: Option<String>,
    pub message: String,
}

impl ErrorDetails {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            classification: ErrorClassification::Transient,
            code: None,
            message: message.into(),
        }
    }

    pub fn business_validation(message: impl Into<String>) -> Self {
        Self {
            classification: ErrorClassification::BusinessValidation,
            code: None,
            message: message.into(),
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn is_retryable(&self) -> bool {
        self.classification == ErrorClassification::Transient
    }
}

/// 一次任务执行尝试，id 同时是请求/响应协议的关联ID
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskExecution {
    pub id: Uuid,
    pub task_id: i64,
    pub schedule_id: i64,
    /// 逻辑执行日期
    pub execution_date: DateTime<Utc>,
    pub parameters: serde_json::Value,
    pub status: ExecutionStatus,
    /// 当前尝试序号，从 1 开始
    pub attempt: i32,
    pub dispatched_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub records_processed: i64,
    pub error_details: Option<ErrorDetails>,
    pub updated_at: DateTime<Utc>,
}

impl TaskExecution {
    pub fn new(
        task_id: i64,
        schedule_id: i64,
        execution_date: DateTime<Utc>,
        parameters: serde_json::Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            task_id,
            schedule_id,
            execution_date,
            parameters,
            status: ExecutionStatus::Dispatched,
            attempt: 1,
            dispatched_at: now,
            started_at: None,
            ended_at: None,
            records_processed: 0,
            error_details: None,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_successful(&self) -> bool {
        self.status == ExecutionStatus::Succeeded
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.dispatched_at
    }

    pub fn is_stale(&self, now: DateTime<Utc>, max_run_time: Duration) -> bool {
        !self.is_terminal() && self.age(now) > max_run_time
    }
}

/// 响应处理器对账本的一次条件更新
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionUpdate {
    pub execution_id: Uuid,
    /// 仅当账本中的尝试序号等于该值时生效
    pub expected_attempt: i32,
    pub status: ExecutionStatus,
    pub attempt: i32,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub records_processed: Option<i64>,
    pub error_details: Option<ErrorDetails>,
    /// 为 `true` 时 `error_details` 原样覆盖账本中的值（包括清空），
    /// 否则 `None` 表示保留原值
    pub replace_error_details: bool,
}

impl ExecutionUpdate {
    pub fn new(execution: &TaskExecution, status: ExecutionStatus) -> Self {
        Self {
            execution_id: execution.id,
            expected_attempt: execution.attempt,
            status,
            attempt: execution.attempt,
            started_at: None,
            ended_at: None,
            records_processed: None,
            error_details: None,
            replace_error_details: false,
        }
    }

    /// 撤销一次已写入但未能发布的重试，恢复执行原有的状态、尝试序号与错误详情
    pub fn revert(execution: &TaskExecution, retried_attempt: i32) -> Self {
        Self {
            expected_attempt: retried_attempt,
            error_details: execution.error_details.clone(),
            replace_error_details: true,
            ..Self::new(execution, execution.status)
        }
    }

    /// 将更新应用到内存中的执行记录
    pub fn apply_to(&self, execution: &mut TaskExecution) {
        execution.status = self.status;
        execution.attempt = self.attempt;
        if let Some(started_at) = self.started_at {
            execution.started_at.get_or_insert(started_at);
        }
        if self.ended_at.is_some() {
            execution.ended_at = self.ended_at;
        }
        if let Some(records) = self.records_processed {
            execution.records_processed = records;
        }
        if self.replace_error_details || self.error_details.is_some() {
            execution.error_details = self.error_details.clone();
        }
        execution.updated_at = Utc::now();
    }
}
