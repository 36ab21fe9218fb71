use crate::{SchedulerError, SchedulerResult};

/// 配置验证接口
pub trait ConfigValidator {
    fn validate(&self) -> SchedulerResult<()>;
}

/// 通用配置校验工具
pub struct ValidationUtils;

impl ValidationUtils {
    /// 验证字符串非空
    pub fn validate_not_empty(value: &str, field_name: &str) -> SchedulerResult<()> {
        if value.trim().is_empty() {
            return Err(SchedulerError::Configuration(format!(
                "{field_name} cannot be empty"
            )));
        }
        Ok(())
    }

    /// 验证超时值
    pub fn validate_timeout(timeout_seconds: u64, field_name: &str) -> SchedulerResult<()> {
        if timeout_seconds == 0 {
            return Err(SchedulerError::Configuration(format!(
                "{field_name} must be greater than 0"
            )));
        }
        if timeout_seconds > 3600 {
            return Err(SchedulerError::Configuration(format!(
                "{field_name} must be less than or equal to 3600 seconds"
            )));
        }
        Ok(())
    }

    /// 验证计数值
    pub fn validate_count(count: usize, field_name: &str, max_value: usize) -> SchedulerResult<()> {
        if count == 0 {
            return Err(SchedulerError::Configuration(format!(
                "{field_name} must be greater than 0"
            )));
        }
        if count > max_value {
            return Err(SchedulerError::Configuration(format!(
                "{field_name} must be less than or equal to {max_value}"
            )));
        }
        Ok(())
    }

    /// 验证URL前缀
    pub fn validate_url_scheme(url: &str, field_name: &str, schemes: &[&str]) -> SchedulerResult<()> {
        Self::validate_not_empty(url, field_name)?;
        if !schemes.iter().any(|scheme| url.starts_with(scheme)) {
            return Err(SchedulerError::Configuration(format!(
                "{field_name} must start with one of {schemes:?}"
            )));
        }
        Ok(())
    }
}
