use serde::{Deserialize, Serialize};

use super::validation::{ConfigValidator, ValidationUtils};
use crate::SchedulerResult;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    pub enabled: bool,
    /// 调度循环轮询间隔
    pub poll_interval_seconds: u64,
    /// 可重试失败的最大尝试次数（含首次执行）
    pub max_attempts: i32,
    /// 响应处理并发上限
    pub response_workers: usize,
    /// 副本标识，为空时使用主机名
    #[serde(default)]
    pub instance_id: Option<String>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_seconds: 10,
            max_attempts: 5,
            response_workers: 8,
            instance_id: None,
        }
    }
}

impl DispatcherConfig {
    pub fn resolved_instance_id(&self) -> String {
        match &self.instance_id {
            Some(id) if !id.trim().is_empty() => id.clone(),
            _ => hostname::get()
                .ok()
                .and_then(|h| h.into_string().ok())
                .unwrap_or_else(|| "scheduler".to_string()),
        }
    }
}

impl ConfigValidator for DispatcherConfig {
    fn validate(&self) -> SchedulerResult<()> {
        ValidationUtils::validate_timeout(self.poll_interval_seconds, "dispatcher.poll_interval_seconds")?;
        ValidationUtils::validate_count(self.max_attempts.max(0) as usize, "dispatcher.max_attempts", 100)?;
        ValidationUtils::validate_count(self.response_workers, "dispatcher.response_workers", 1024)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatcher_config_validation() {
        let config = DispatcherConfig::default();
        assert!(config.validate().is_ok());

        let mut invalid_config = config.clone();
        invalid_config.poll_interval_seconds = 0;
        assert!(invalid_config.validate().is_err());

        let mut invalid_config = config.clone();
        invalid_config.max_attempts = 0;
        assert!(invalid_config.validate().is_err());

        let mut invalid_config = config.clone();
        invalid_config.response_workers = 0;
        assert!(invalid_config.validate().is_err());
    }

    #[test]
    fn test_instance_id_override() {
        let config = DispatcherConfig {
            instance_id: Some("replica-a".to_string()),
            ..Default::default()
        };
        assert_eq!(config.resolved_instance_id(), "replica-a");
        assert!(!DispatcherConfig::default().resolved_instance_id().is_empty());
    }
}
