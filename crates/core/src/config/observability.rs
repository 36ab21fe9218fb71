use serde::{Deserialize, Serialize};

use super::validation::{ConfigValidator, ValidationUtils};
use crate::{SchedulerError, SchedulerResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    pub log_level: String,
    pub metrics_enabled: bool,
    pub metrics_bind_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_bind_address: "0.0.0.0:9100".to_string(),
        }
    }
}

impl ConfigValidator for ObservabilityConfig {
    fn validate(&self) -> SchedulerResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(SchedulerError::Configuration(format!(
                "Invalid log level: {}. Valid options: {:?}",
                self.log_level, valid_levels
            )));
        }
        if self.metrics_enabled {
            ValidationUtils::validate_not_empty(
                &self.metrics_bind_address,
                "observability.metrics_bind_address",
            )?;
            self.metrics_bind_address
                .parse::<std::net::SocketAddr>()
                .map_err(|e| {
                    SchedulerError::Configuration(format!(
                        "observability.metrics_bind_address 无效: {e}"
                    ))
                })?;
        }
        Ok(())
    }
}
