//! Mock implementations for the repository, lock and queue traits
//!
//! Every mock keeps its state behind an `Arc`, so clones share one table.
//! Cloning a mock is how tests simulate several scheduler replicas talking
//! to the same database and broker.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scheduler_core::{
    models::{ExecutionUpdate, Message, ScheduleStatus, ScheduledTask, TaskExecution, TaskSchedule},
    traits::{
        DistributedLock, MessageQueue, ResourceLock, ScheduledTaskRepository,
        TaskExecutionRepository, TaskScheduleRepository,
    },
    SchedulerError, SchedulerResult,
};
use uuid::Uuid;

/// Mock implementation of ScheduledTaskRepository
#[derive(Debug, Clone, Default)]
pub struct MockScheduledTaskRepository {
    tasks: Arc<Mutex<HashMap<i64, ScheduledTask>>>,
}

impl MockScheduledTaskRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tasks(tasks: Vec<ScheduledTask>) -> Self {
        let repo = Self::new();
        for task in tasks {
            repo.insert(task);
        }
        repo
    }

    pub fn insert(&self, task: ScheduledTask) {
        self.tasks.lock().unwrap().insert(task.id, task);
    }
}

#[async_trait]
impl ScheduledTaskRepository for MockScheduledTaskRepository {
    async fn get_by_id(&self, id: i64) -> SchedulerResult<Option<ScheduledTask>> {
        Ok(self.tasks.lock().unwrap().get(&id).cloned())
    }

    async fn get_all(&self) -> SchedulerResult<Vec<ScheduledTask>> {
        let mut tasks: Vec<_> = self.tasks.lock().unwrap().values().cloned().collect();
        tasks.sort_by_key(|t| t.id);
        Ok(tasks)
    }
}

/// Mock implementation of TaskScheduleRepository
#[derive(Debug, Clone, Default)]
pub struct MockTaskScheduleRepository {
    schedules: Arc<Mutex<HashMap<i64, TaskSchedule>>>,
}

impl MockTaskScheduleRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_schedules(schedules: Vec<TaskSchedule>) -> Self {
        let repo = Self::new();
        for schedule in schedules {
            repo.insert(schedule);
        }
        repo
    }

    pub fn insert(&self, schedule: TaskSchedule) {
        self.schedules.lock().unwrap().insert(schedule.id, schedule);
    }

    pub fn get(&self, id: i64) -> Option<TaskSchedule> {
        self.schedules.lock().unwrap().get(&id).cloned()
    }
}

#[async_trait]
impl TaskScheduleRepository for MockTaskScheduleRepository {
    async fn get_by_id(&self, id: i64) -> SchedulerResult<Option<TaskSchedule>> {
        Ok(self.get(id))
    }

    async fn get_all(&self) -> SchedulerResult<Vec<TaskSchedule>> {
        let mut schedules: Vec<_> = self.schedules.lock().unwrap().values().cloned().collect();
        schedules.sort_by_key(|s| s.id);
        Ok(schedules)
    }

    async fn get_due_schedules(&self, now: DateTime<Utc>) -> SchedulerResult<Vec<TaskSchedule>> {
        let mut due: Vec<_> = self
            .schedules
            .lock()
            .unwrap()
            .values()
            .filter(|s| s.is_due(now))
            .cloned()
            .collect();
        due.sort_by_key(|s| (s.next_run, s.id));
        Ok(due)
    }

    async fn advance_next_run(
        &self,
        id: i64,
        expected: DateTime<Utc>,
        new_next_run: DateTime<Utc>,
    ) -> SchedulerResult<bool> {
        if new_next_run <= expected {
            return Err(SchedulerError::ScheduleAdvancementError {
                schedule_id: id,
                message: format!("{new_next_run} is not after {expected}"),
            });
        }
        let mut schedules = self.schedules.lock().unwrap();
        let schedule = schedules
            .get_mut(&id)
            .ok_or(SchedulerError::ScheduleNotFound { id })?;
        if schedule.next_run != expected {
            return Ok(false);
        }
        schedule.next_run = new_next_run;
        schedule.updated_at = Utc::now();
        Ok(true)
    }

    async fn update_status(&self, id: i64, status: ScheduleStatus) -> SchedulerResult<()> {
        let mut schedules = self.schedules.lock().unwrap();
        let schedule = schedules
            .get_mut(&id)
            .ok_or(SchedulerError::ScheduleNotFound { id })?;
        schedule.status = status;
        schedule.updated_at = Utc::now();
        Ok(())
    }
}

/// Mock implementation of TaskExecutionRepository
///
/// Enforces the same rules as the Postgres ledger: one open execution per
/// (task, date), and conditional updates keyed on attempt.
#[derive(Debug, Clone, Default)]
pub struct MockTaskExecutionRepository {
    executions: Arc<Mutex<HashMap<Uuid, TaskExecution>>>,
}

impl MockTaskExecutionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert without the open-execution check, for seeding history
    pub fn insert(&self, execution: TaskExecution) {
        self.executions
            .lock()
            .unwrap()
            .insert(execution.id, execution);
    }

    pub fn get(&self, id: Uuid) -> Option<TaskExecution> {
        self.executions.lock().unwrap().get(&id).cloned()
    }

    pub fn all(&self) -> Vec<TaskExecution> {
        let mut executions: Vec<_> = self.executions.lock().unwrap().values().cloned().collect();
        executions.sort_by_key(|e| e.dispatched_at);
        executions
    }

    pub fn for_task(&self, task_id: i64) -> Vec<TaskExecution> {
        self.all()
            .into_iter()
            .filter(|e| e.task_id == task_id)
            .collect()
    }

    pub fn count(&self) -> usize {
        self.executions.lock().unwrap().len()
    }
}

#[async_trait]
impl TaskExecutionRepository for MockTaskExecutionRepository {
    async fn create(&self, execution: &TaskExecution) -> SchedulerResult<TaskExecution> {
        let mut executions = self.executions.lock().unwrap();
        let open_duplicate = executions.values().any(|e| {
            e.task_id == execution.task_id
                && e.execution_date == execution.execution_date
                && !e.is_terminal()
        });
        if open_duplicate && !execution.is_terminal() {
            return Err(SchedulerError::DuplicateExecution {
                task_id: execution.task_id,
                execution_date: execution.execution_date.to_rfc3339(),
            });
        }
        executions.insert(execution.id, execution.clone());
        Ok(execution.clone())
    }

    async fn get_by_id(&self, id: Uuid) -> SchedulerResult<Option<TaskExecution>> {
        Ok(self.get(id))
    }

    async fn find_by_task_and_date(
        &self,
        task_id: i64,
        execution_date: DateTime<Utc>,
    ) -> SchedulerResult<Vec<TaskExecution>> {
        Ok(self
            .all()
            .into_iter()
            .filter(|e| e.task_id == task_id && e.execution_date == execution_date)
            .collect())
    }

    async fn get_oldest_open_for_schedule(
        &self,
        schedule_id: i64,
    ) -> SchedulerResult<Option<TaskExecution>> {
        Ok(self
            .all()
            .into_iter()
            .filter(|e| e.schedule_id == schedule_id && !e.is_terminal())
            .min_by_key(|e| e.dispatched_at))
    }

    async fn apply_update(&self, update: &ExecutionUpdate) -> SchedulerResult<bool> {
        let mut executions = self.executions.lock().unwrap();
        let Some(execution) = executions.get_mut(&update.execution_id) else {
            return Ok(false);
        };
        if execution.is_terminal() || execution.attempt != update.expected_attempt {
            return Ok(false);
        }
        update.apply_to(execution);
        Ok(true)
    }

    async fn delete(&self, id: Uuid) -> SchedulerResult<()> {
        self.executions
            .lock()
            .unwrap()
            .remove(&id)
            .map(|_| ())
            .ok_or(SchedulerError::ExecutionNotFound { id })
    }
}

/// In-memory DistributedLock with a lock table shared between clones
#[derive(Debug, Clone, Default)]
pub struct InMemoryDistributedLock {
    held: Arc<Mutex<HashMap<i64, Uuid>>>,
    acquisitions: Arc<AtomicUsize>,
    denials: Arc<AtomicUsize>,
}

impl InMemoryDistributedLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_held(&self, key: i64) -> bool {
        self.held.lock().unwrap().contains_key(&key)
    }

    /// Simulate another process holding the lock
    pub fn hold_externally(&self, key: i64) -> ResourceLock {
        let lock = ResourceLock::new(key);
        self.held.lock().unwrap().insert(key, lock.token);
        lock
    }

    pub fn acquisitions(&self) -> usize {
        self.acquisitions.load(Ordering::SeqCst)
    }

    pub fn denials(&self) -> usize {
        self.denials.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DistributedLock for InMemoryDistributedLock {
    async fn try_acquire(&self, key: i64) -> SchedulerResult<Option<ResourceLock>> {
        // let concurrently polled replicas interleave here
        tokio::task::yield_now().await;
        let mut held = self.held.lock().unwrap();
        if held.contains_key(&key) {
            self.denials.fetch_add(1, Ordering::SeqCst);
            return Ok(None);
        }
        let lock = ResourceLock::new(key);
        held.insert(key, lock.token);
        self.acquisitions.fetch_add(1, Ordering::SeqCst);
        Ok(Some(lock))
    }

    async fn release(&self, lock: &ResourceLock) -> SchedulerResult<()> {
        let mut held = self.held.lock().unwrap();
        match held.get(&lock.key) {
            Some(token) if *token == lock.token => {
                held.remove(&lock.key);
                Ok(())
            }
            _ => Err(SchedulerError::LockNotFound { key: lock.key }),
        }
    }
}

#[derive(Debug, Default)]
struct QueueState {
    queues: HashMap<String, Vec<Message>>,
    in_flight: HashMap<String, VecDeque<(String, Message)>>,
    acked: Vec<String>,
    nacked: Vec<(String, bool)>,
}

impl QueueState {
    /// Oldest outstanding delivery of `message_id`
    fn take_in_flight(&mut self, message_id: &str) -> Option<(String, Message)> {
        let deliveries = self.in_flight.get_mut(message_id)?;
        let delivery = deliveries.pop_front();
        if deliveries.is_empty() {
            self.in_flight.remove(message_id);
        }
        delivery
    }
}

/// Mock implementation of MessageQueue that records every publish
#[derive(Debug, Clone, Default)]
pub struct MockMessageQueue {
    state: Arc<Mutex<QueueState>>,
    fail_publish: Arc<AtomicBool>,
    publish_attempts: Arc<AtomicUsize>,
}

impl MockMessageQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent publish fail until reset
    pub fn set_publish_failure(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }

    pub fn publish_attempts(&self) -> usize {
        self.publish_attempts.load(Ordering::SeqCst)
    }

    /// Messages currently waiting in `queue`
    pub fn messages(&self, queue: &str) -> Vec<Message> {
        self.state
            .lock()
            .unwrap()
            .queues
            .get(queue)
            .cloned()
            .unwrap_or_default()
    }

    /// Drain and return everything waiting in `queue`
    pub fn take_messages(&self, queue: &str) -> Vec<Message> {
        self.state
            .lock()
            .unwrap()
            .queues
            .remove(queue)
            .unwrap_or_default()
    }

    pub fn acked(&self) -> Vec<String> {
        self.state.lock().unwrap().acked.clone()
    }

    pub fn nacked(&self) -> Vec<(String, bool)> {
        self.state.lock().unwrap().nacked.clone()
    }
}

#[async_trait]
impl MessageQueue for MockMessageQueue {
    async fn publish_message(&self, queue: &str, message: &Message) -> SchedulerResult<()> {
        self.publish_attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(SchedulerError::MessageQueue("broker unavailable".to_string()));
        }
        self.state
            .lock()
            .unwrap()
            .queues
            .entry(queue.to_string())
            .or_default()
            .push(message.clone());
        Ok(())
    }

    async fn consume_messages(&self, queue: &str) -> SchedulerResult<Vec<Message>> {
        let mut state = self.state.lock().unwrap();
        let messages = state.queues.remove(queue).unwrap_or_default();
        for message in &messages {
            state
                .in_flight
                .entry(message.id.clone())
                .or_default()
                .push_back((queue.to_string(), message.clone()));
        }
        Ok(messages)
    }

    async fn ack_message(&self, message_id: &str) -> SchedulerResult<()> {
        let mut state = self.state.lock().unwrap();
        state.take_in_flight(message_id);
        state.acked.push(message_id.to_string());
        Ok(())
    }

    async fn nack_message(&self, message_id: &str, requeue: bool) -> SchedulerResult<()> {
        let mut state = self.state.lock().unwrap();
        if let Some((queue, message)) = state.take_in_flight(message_id) {
            if requeue {
                state.queues.entry(queue).or_default().insert(0, message);
            }
        }
        state.nacked.push((message_id.to_string(), requeue));
        Ok(())
    }

    async fn create_queue(&self, queue: &str, _durable: bool) -> SchedulerResult<()> {
        self.state
            .lock()
            .unwrap()
            .queues
            .entry(queue.to_string())
            .or_default();
        Ok(())
    }

    async fn get_queue_size(&self, queue: &str) -> SchedulerResult<u32> {
        Ok(self.messages(queue).len() as u32)
    }

    async fn purge_queue(&self, queue: &str) -> SchedulerResult<()> {
        if let Some(messages) = self.state.lock().unwrap().queues.get_mut(queue) {
            messages.clear();
        }
        Ok(())
    }
}
