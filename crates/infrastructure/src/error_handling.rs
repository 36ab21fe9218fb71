//! 仓储操作的错误上下文与日志辅助

use std::fmt;

use chrono::{DateTime, Utc};
use scheduler_core::SchedulerError;
use sqlx::Error as SqlxError;
use tracing::{debug, error};

#[derive(Debug, Clone, Copy)]
pub enum RepositoryOperation {
    Create,
    Read,
    Update,
    Delete,
    Query,
    Lock,
}

impl fmt::Display for RepositoryOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RepositoryOperation::Create => write!(f, "创建"),
            RepositoryOperation::Read => write!(f, "查询"),
            RepositoryOperation::Update => write!(f, "更新"),
            RepositoryOperation::Delete => write!(f, "删除"),
            RepositoryOperation::Query => write!(f, "查询"),
            RepositoryOperation::Lock => write!(f, "加锁"),
        }
    }
}

/// 一次仓储操作的上下文，用于错误信息和日志
#[derive(Debug, Clone)]
pub struct OperationContext {
    pub operation: RepositoryOperation,
    pub entity: &'static str,
    pub entity_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl OperationContext {
    pub fn new(operation: RepositoryOperation, entity: &'static str) -> Self {
        Self {
            operation,
            entity,
            entity_id: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_id(mut self, id: impl fmt::Display) -> Self {
        self.entity_id = Some(id.to_string());
        self
    }

    pub fn entity_description(&self) -> String {
        match &self.entity_id {
            Some(id) => format!("{} (ID: {id})", self.entity),
            None => self.entity.to_string(),
        }
    }
}

pub struct RepositoryErrorHelpers;

impl RepositoryErrorHelpers {
    /// 将 sqlx 错误转换为带上下文的调度器错误
    pub fn database_error(context: &OperationContext, error: SqlxError) -> SchedulerError {
        let entity_desc = context.entity_description();
        let operation_desc = context.operation;

        let error_msg = match &error {
            SqlxError::Database(db_error) => match db_error.constraint() {
                Some(constraint) => format!(
                    "{operation_desc}{entity_desc}时发生数据库约束冲突: {constraint}"
                ),
                None => format!("{operation_desc}{entity_desc}时发生数据库错误: {db_error}"),
            },
            SqlxError::PoolClosed => format!("{operation_desc}{entity_desc}时数据库连接池已关闭"),
            SqlxError::PoolTimedOut => format!("{operation_desc}{entity_desc}时数据库连接池超时"),
            SqlxError::Io(io_error) => {
                format!("{operation_desc}{entity_desc}时发生I/O错误: {io_error}")
            }
            _ => format!("{operation_desc}{entity_desc}时发生未知数据库错误: {error}"),
        };

        error!(error = %error, timestamp = %context.timestamp, "{}", error_msg);
        SchedulerError::DatabaseOperation(error_msg)
    }

    /// 错误是否为指定唯一约束冲突
    pub fn is_unique_violation(error: &SqlxError, constraint: &str) -> bool {
        match error {
            SqlxError::Database(db_error) => {
                db_error.is_unique_violation() && db_error.constraint() == Some(constraint)
            }
            _ => false,
        }
    }

    pub fn log_operation_success(context: &OperationContext, additional_info: Option<&str>) {
        let base_msg = format!("{}{}成功", context.operation, context.entity_description());
        match additional_info {
            Some(info) => debug!("{}: {}", base_msg, info),
            None => debug!("{}", base_msg),
        }
    }
}
