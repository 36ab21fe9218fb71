use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::SchedulerResult;

/// 持有中的跨实例互斥句柄，只存在于一次临界区内，不持久化
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceLock {
    pub key: i64,
    pub token: Uuid,
    pub acquired_at: DateTime<Utc>,
}

impl ResourceLock {
    pub fn new(key: i64) -> Self {
        Self {
            key,
            token: Uuid::new_v4(),
            acquired_at: Utc::now(),
        }
    }
}

/// 以整型资源ID为键的跨实例非阻塞互斥锁
#[async_trait]
pub trait DistributedLock: Send + Sync {
    /// 尝试获取锁，不等待。被其他实例持有时返回 `Ok(None)`。
    async fn try_acquire(&self, key: i64) -> SchedulerResult<Option<ResourceLock>>;

    /// 释放锁。释放从未获取或已释放的锁返回 `SchedulerError::LockNotFound`。
    async fn release(&self, lock: &ResourceLock) -> SchedulerResult<()>;
}
