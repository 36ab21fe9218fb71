use thiserror::Error;
use uuid::Uuid;

use crate::models::{ErrorClassification, ErrorDetails};

/// 调度器错误类型定义
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("数据库操作错误: {0}")]
    DatabaseOperation(String),

    #[error("获取分布式锁失败: 资源 {key} 已被其他实例持有")]
    LockAcquireFailed { key: i64 },

    #[error("释放未持有的分布式锁: 资源 {key}")]
    LockNotFound { key: i64 },

    #[error("任务 {task_id} 的依赖未满足: {blocking:?}")]
    DependencyUnsatisfied { task_id: i64, blocking: Vec<i64> },

    #[error("发布任务请求失败: {0}")]
    PublishFailure(String),

    #[error("任务执行出现可重试错误: {0}")]
    TransientExecutionError(String),

    #[error("任务执行业务校验失败: {0}")]
    BusinessValidationError(String),

    #[error("推进调度 {schedule_id} 失败: {message}")]
    ScheduleAdvancementError { schedule_id: i64, message: String },

    #[error("调度 {schedule_id} 的执行 {execution_id} 已运行 {age_seconds} 秒，超过最大运行时间")]
    StaleExecutionDetected {
        schedule_id: i64,
        execution_id: Uuid,
        age_seconds: i64,
    },

    #[error("任务未找到: {id}")]
    TaskNotFound { id: i64 },

    #[error("调度未找到: {id}")]
    ScheduleNotFound { id: i64 },

    #[error("任务执行实例未找到: {id}")]
    ExecutionNotFound { id: Uuid },

    #[error("任务 {task_id} 在 {execution_date} 已存在未结束的执行")]
    DuplicateExecution {
        task_id: i64,
        execution_date: String,
    },

    #[error("无效的调度表达式: {expr} - {message}")]
    InvalidCron { expr: String, message: String },

    #[error("检测到循环依赖: {0:?}")]
    CircularDependency(Vec<i64>),

    #[error("消息队列错误: {0}")]
    MessageQueue(String),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl SchedulerError {
    /// 预期内的情况，由调度循环吸收并推迟到下一个周期
    pub fn is_expected(&self) -> bool {
        matches!(
            self,
            SchedulerError::LockAcquireFailed { .. }
                | SchedulerError::DependencyUnsatisfied { .. }
                | SchedulerError::PublishFailure(_)
                | SchedulerError::DuplicateExecution { .. }
                | SchedulerError::StaleExecutionDetected { .. }
        )
    }

    /// 启动阶段出现即应终止进程的错误
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SchedulerError::Configuration(_)
                | SchedulerError::CircularDependency(_)
                | SchedulerError::InvalidCron { .. }
        )
    }
}

impl From<serde_json::Error> for SchedulerError {
    fn from(e: serde_json::Error) -> Self {
        SchedulerError::Serialization(e.to_string())
    }
}

/// 执行方上报的失败按分类转换为对应的执行错误
impl From<&ErrorDetails> for SchedulerError {
    fn from(details: &ErrorDetails) -> Self {
        let message = match &details.code {
            Some(code) => format!("[{code}] {}", details.message),
            None => details.message.clone(),
        };
        match details.classification {
            ErrorClassification::Transient => SchedulerError::TransientExecutionError(message),
            ErrorClassification::BusinessValidation => {
                SchedulerError::BusinessValidationError(message)
            }
        }
    }
}

/// 统一的Result类型
pub type SchedulerResult<T> = std::result::Result<T, SchedulerError>;
