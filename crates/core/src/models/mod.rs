//! # 数据模型
//!
//! 任务编排核心的数据结构：
//!
//! - [`ScheduledTask`] 静态任务定义，含依赖关系
//! - [`TaskSchedule`] 周期触发器，`next_run` 只增不减
//! - [`TaskExecution`] 执行账本中的一行，进入终态后不可变
//! - [`Message`] 事件总线上的请求/响应信封
//!
//! ## 执行状态流转
//! ```text
//! Dispatched → Running → Succeeded
//!     ↓           ↓
//!  Retrying ←── Failed(可重试)
//!     ↓
//!   Failed(终态)
//! ```

pub mod message;
pub mod scheduled_task;
pub mod task_execution;
pub mod task_schedule;

pub use message::*;
pub use scheduled_task::*;
pub use task_execution::*;
pub use task_schedule::*;
