//! 调度核心组件
//!
//! 调度循环在分布式锁保护下评估到期调度、检查依赖、推进 NextRun 并派发请求；
//! 响应处理器消费执行方上报的状态，幂等地更新执行账本并驱动重试。

pub mod cron_utils;
pub mod dependency_checker;
pub mod resource_lock;
pub mod response_handler;
pub mod response_listener;
pub mod schedule_evaluator;
pub mod scheduler;
pub mod task_dispatcher;

pub use cron_utils::CronScheduler;
pub use dependency_checker::{DependencyCheckResult, DependencyChecker, DependencyGraph};
pub use resource_lock::run_with_lock;
pub use response_handler::{DiscardReason, ResponseHandler, ResponseOutcome};
pub use response_listener::ResponseListener;
pub use schedule_evaluator::{ScheduleEvaluator, ScheduleHealth};
pub use scheduler::{ScheduleOutcome, TaskScheduler, TickReport};
pub use task_dispatcher::TaskDispatcher;
