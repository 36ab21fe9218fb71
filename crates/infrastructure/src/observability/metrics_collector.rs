//! Metrics collector for the task orchestrator
//!
//! Recorded through the `metrics` facade; without an installed recorder
//! every call is a no-op.

use metrics::{counter, histogram, Counter, Histogram};

#[derive(Clone)]
pub struct MetricsCollector {
    ticks_total: Counter,
    tick_duration: Histogram,
    dispatches_total: Counter,
    publish_failures_total: Counter,
    publish_duration: Histogram,
    lock_denied_total: Counter,
    dependency_blocked_total: Counter,
    schedules_stuck_total: Counter,
    retries_total: Counter,
    terminal_failures_total: Counter,
    response_handling_duration: Histogram,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            ticks_total: counter!("scheduler_ticks_total"),
            tick_duration: histogram!("scheduler_tick_duration_seconds"),
            dispatches_total: counter!("scheduler_dispatches_total"),
            publish_failures_total: counter!("scheduler_publish_failures_total"),
            publish_duration: histogram!("scheduler_publish_duration_seconds"),
            lock_denied_total: counter!("scheduler_lock_denied_total"),
            dependency_blocked_total: counter!("scheduler_dependency_blocked_total"),
            schedules_stuck_total: counter!("scheduler_schedules_stuck_total"),
            retries_total: counter!("scheduler_execution_retries_total"),
            terminal_failures_total: counter!("scheduler_execution_failures_total"),
            response_handling_duration: histogram!("scheduler_response_handling_duration_seconds"),
        }
    }

    pub fn record_tick(&self, duration_seconds: f64) {
        self.ticks_total.increment(1);
        self.tick_duration.record(duration_seconds);
    }

    pub fn record_dispatch(&self) {
        self.dispatches_total.increment(1);
    }

    pub fn record_publish(&self, duration_seconds: f64) {
        self.publish_duration.record(duration_seconds);
    }

    pub fn record_publish_failure(&self) {
        self.publish_failures_total.increment(1);
    }

    pub fn record_lock_denied(&self) {
        self.lock_denied_total.increment(1);
    }

    pub fn record_dependency_blocked(&self) {
        self.dependency_blocked_total.increment(1);
    }

    pub fn record_schedule_stuck(&self) {
        self.schedules_stuck_total.increment(1);
    }

    pub fn record_retry(&self) {
        self.retries_total.increment(1);
    }

    pub fn record_terminal_failure(&self) {
        self.terminal_failures_total.increment(1);
    }

    /// Record a handled response, labelled by the resulting ledger status
    pub fn record_response(&self, status: &str, duration_seconds: f64) {
        counter!("scheduler_responses_total", "status" => status.to_string()).increment(1);
        self.response_handling_duration.record(duration_seconds);
    }

    pub fn record_response_discarded(&self, reason: &'static str) {
        counter!("scheduler_responses_discarded_total", "reason" => reason).increment(1);
    }
}
