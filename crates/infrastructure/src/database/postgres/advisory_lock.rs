//! 基于 Postgres 会话级咨询锁的分布式锁
//!
//! 咨询锁归属于数据库会话，因此每把锁独占一个连接池连接，直到释放。
//! 进程崩溃时连接断开，锁随会话一起释放。

use std::collections::HashMap;

use async_trait::async_trait;
use scheduler_core::{
    traits::{DistributedLock, ResourceLock},
    SchedulerError, SchedulerResult,
};
use sqlx::{pool::PoolConnection, PgPool, Postgres};
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

use crate::error_handling::{OperationContext, RepositoryErrorHelpers, RepositoryOperation};

struct HeldLock {
    token: uuid::Uuid,
    connection: PoolConnection<Postgres>,
}

pub struct PostgresAdvisoryLock {
    pool: PgPool,
    held: Mutex<HashMap<i64, HeldLock>>,
}

impl PostgresAdvisoryLock {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            held: Mutex::new(HashMap::new()),
        }
    }

    /// 本实例当前持有的锁数量
    pub async fn held_count(&self) -> usize {
        self.held.lock().await.len()
    }
}

#[async_trait]
impl DistributedLock for PostgresAdvisoryLock {
    #[instrument(skip(self), fields(lock_key = %key))]
    async fn try_acquire(&self, key: i64) -> SchedulerResult<Option<ResourceLock>> {
        if self.held.lock().await.contains_key(&key) {
            debug!("资源 {} 的锁已由本实例持有", key);
            return Ok(None);
        }

        let context = OperationContext::new(RepositoryOperation::Lock, "咨询锁").with_id(key);
        let mut connection = self
            .pool
            .acquire()
            .await
            .map_err(|e| RepositoryErrorHelpers::database_error(&context, e))?;

        let acquired: bool = sqlx::query_scalar("SELECT pg_try_advisory_lock($1)")
            .bind(key)
            .fetch_one(&mut *connection)
            .await
            .map_err(|e| RepositoryErrorHelpers::database_error(&context, e))?;

        if !acquired {
            debug!("资源 {} 的锁被其他实例持有", key);
            return Ok(None);
        }

        let lock = ResourceLock::new(key);
        self.held.lock().await.insert(
            key,
            HeldLock {
                token: lock.token,
                connection,
            },
        );
        debug!("获取资源 {} 的锁", key);
        Ok(Some(lock))
    }

    #[instrument(skip(self, lock), fields(lock_key = %lock.key))]
    async fn release(&self, lock: &ResourceLock) -> SchedulerResult<()> {
        let held = {
            let mut held = self.held.lock().await;
            match held.get(&lock.key) {
                Some(entry) if entry.token == lock.token => held.remove(&lock.key),
                _ => None,
            }
        };
        let Some(HeldLock { mut connection, .. }) = held else {
            return Err(SchedulerError::LockNotFound { key: lock.key });
        };

        let released = sqlx::query_scalar::<_, bool>("SELECT pg_advisory_unlock($1)")
            .bind(lock.key)
            .fetch_one(&mut *connection)
            .await;

        match released {
            Ok(true) => {
                debug!("释放资源 {} 的锁", lock.key);
                Ok(())
            }
            Ok(false) => Err(SchedulerError::LockNotFound { key: lock.key }),
            Err(e) => {
                // 关闭会话，由数据库回收该会话持有的咨询锁
                warn!("释放资源 {} 的锁失败，关闭所在连接: {}", lock.key, e);
                drop(connection.detach());
                Err(SchedulerError::Database(e))
            }
        }
    }
}
