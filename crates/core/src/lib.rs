//! 任务编排核心类型：错误、配置、数据模型与服务接口

pub mod config;
pub mod errors;
pub mod models;
pub mod traits;

pub use config::AppConfig;
pub use errors::*;
pub use models::{
    ExecutionStatus, Message, MessageType, ScheduleStatus, ScheduledTask, TaskExecution,
    TaskSchedule,
};
pub use traits::{
    DistributedLock, MessageQueue, ResourceLock, ScheduledTaskRepository,
    TaskExecutionRepository, TaskScheduleRepository,
};
