//! 配置模型与加载
//!
//! 配置在启动时构建一次，并以 `Arc<AppConfig>` 或按段克隆的方式传入各组件构造函数。

pub mod app_config;
pub mod database;
pub mod dispatcher;
pub mod message_queue;
pub mod observability;
pub mod validation;

pub use app_config::AppConfig;
pub use database::DatabaseConfig;
pub use dispatcher::DispatcherConfig;
pub use message_queue::{MessageQueueConfig, MessageQueueType};
pub use observability::ObservabilityConfig;
pub use validation::{ConfigValidator, ValidationUtils};
