pub mod postgres;

use std::time::Duration;

use scheduler_core::{config::DatabaseConfig, SchedulerError, SchedulerResult};
use sqlx::{postgres::PgPoolOptions, PgPool};
use tracing::info;

/// 按配置创建 Postgres 连接池
pub async fn create_pool(config: &DatabaseConfig) -> SchedulerResult<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.connection_timeout_seconds))
        .idle_timeout(Duration::from_secs(config.idle_timeout_seconds))
        .max_lifetime(Duration::from_secs(1800))
        .connect(&config.url)
        .await
        .map_err(|e| SchedulerError::DatabaseOperation(format!("连接数据库失败: {e}")))?;

    info!(
        max_connections = config.max_connections,
        "数据库连接池已建立"
    );
    Ok(pool)
}

/// 检查数据库连接健康状态
pub async fn health_check(pool: &PgPool) -> SchedulerResult<()> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}
