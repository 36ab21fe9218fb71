pub mod advisory_lock;
pub mod postgres_scheduled_task_repository;
pub mod postgres_task_execution_repository;
pub mod postgres_task_schedule_repository;

pub use advisory_lock::PostgresAdvisoryLock;
pub use postgres_scheduled_task_repository::PostgresScheduledTaskRepository;
pub use postgres_task_execution_repository::PostgresTaskExecutionRepository;
pub use postgres_task_schedule_repository::PostgresTaskScheduleRepository;
