use serde::{Deserialize, Serialize};

use super::validation::{ConfigValidator, ValidationUtils};
use crate::{SchedulerError, SchedulerResult};

/// 持有的咨询锁会独占一个连接，临界区内的账本读写需要另一个连接
pub const MIN_POOL_CONNECTIONS: u32 = 2;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    /// 至少为 [`MIN_POOL_CONNECTIONS`]
    pub max_connections: u32,
    pub min_connections: u32,
    pub connection_timeout_seconds: u64,
    pub idle_timeout_seconds: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgresql://localhost/payments_scheduler".to_string(),
            max_connections: 10,
            min_connections: 1,
            connection_timeout_seconds: 30,
            idle_timeout_seconds: 600,
        }
    }
}

impl ConfigValidator for DatabaseConfig {
    fn validate(&self) -> SchedulerResult<()> {
        ValidationUtils::validate_url_scheme(
            &self.url,
            "database.url",
            &["postgresql://", "postgres://"],
        )?;
        ValidationUtils::validate_count(self.max_connections as usize, "database.max_connections", 1000)?;
        if self.max_connections < MIN_POOL_CONNECTIONS {
            return Err(SchedulerError::Configuration(format!(
                "database.max_connections must be at least {MIN_POOL_CONNECTIONS}: a held schedule lock pins one connection"
            )));
        }

        if self.min_connections > self.max_connections {
            return Err(SchedulerError::Configuration(
                "database.min_connections must be less than or equal to max_connections"
                    .to_string(),
            ));
        }

        ValidationUtils::validate_timeout(self.connection_timeout_seconds, "database.connection_timeout_seconds")?;
        ValidationUtils::validate_timeout(self.idle_timeout_seconds, "database.idle_timeout_seconds")?;
        Ok(())
    }
}
