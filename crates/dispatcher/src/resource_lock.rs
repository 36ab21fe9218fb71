use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use tracing::{error, warn};

use scheduler_core::{traits::DistributedLock, SchedulerError, SchedulerResult};

/// 在分布式锁保护下执行 `f`
///
/// 锁被其他实例持有时立即返回 `LockAcquireFailed`，`f` 不会被调用。
/// 获取成功后无论 `f` 成功、返回错误还是 panic，锁都会被释放；panic 在释放后继续传播。
/// 锁只用于减少竞争，`f` 自身仍需保持幂等。
pub async fn run_with_lock<L, F, Fut, T>(lock: &L, key: i64, f: F) -> SchedulerResult<T>
where
    L: DistributedLock + ?Sized,
    F: FnOnce() -> Fut,
    Fut: Future<Output = SchedulerResult<T>>,
{
    let Some(handle) = lock.try_acquire(key).await? else {
        return Err(SchedulerError::LockAcquireFailed { key });
    };

    let outcome = AssertUnwindSafe(f()).catch_unwind().await;
    let released = lock.release(&handle).await;

    match outcome {
        Ok(result) => {
            if let Err(e) = released {
                // 工作已完成，释放失败只记录；会话断开后锁会被数据库回收
                warn!("释放资源 {} 的锁失败: {}", key, e);
            }
            result
        }
        Err(panic) => {
            if let Err(e) = released {
                error!("临界区 panic 后释放资源 {} 的锁失败: {}", key, e);
            }
            std::panic::resume_unwind(panic)
        }
    }
}
