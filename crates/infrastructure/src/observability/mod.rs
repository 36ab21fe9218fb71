//! Observability module
//!
//! Structured log events, tracing spans, metrics and their process-wide setup.

pub mod metrics_collector;
pub mod structured_logger;
pub mod task_tracer;
pub mod telemetry_setup;

pub use metrics_collector::MetricsCollector;
pub use structured_logger::{LogFormat, LoggingConfig, StructuredLogger};
pub use task_tracer::TaskTracer;
pub use telemetry_setup::{init_metrics, init_structured_logging};
