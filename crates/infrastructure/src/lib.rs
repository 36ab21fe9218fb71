//! 基础设施层：Postgres 仓储与咨询锁、消息队列实现、可观测性

pub mod database;
pub mod error_handling;
pub mod in_memory_queue;
pub mod message_queue;
pub mod message_queue_factory;
pub mod observability;

pub use database::postgres::{
    PostgresAdvisoryLock, PostgresScheduledTaskRepository, PostgresTaskExecutionRepository,
    PostgresTaskScheduleRepository,
};
pub use database::{create_pool, health_check};
pub use in_memory_queue::{InMemoryMessageQueue, InMemoryQueueConfig};
pub use message_queue::RabbitMQMessageQueue;
pub use message_queue_factory::MessageQueueFactory;
pub use observability::{MetricsCollector, StructuredLogger, TaskTracer};
