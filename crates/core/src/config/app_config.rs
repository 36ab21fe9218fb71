use std::path::Path;

use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use super::{
    database::DatabaseConfig,
    dispatcher::DispatcherConfig,
    message_queue::MessageQueueConfig,
    observability::ObservabilityConfig,
    validation::ConfigValidator,
};
use crate::{SchedulerError, SchedulerResult};

/// 进程级配置，启动时读取一次，之后只读
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub message_queue: MessageQueueConfig,
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// 加载配置：TOML文件（可选）+ SCHEDULER_ 前缀环境变量覆盖
    pub fn load(config_path: Option<&str>) -> SchedulerResult<Self> {
        let mut builder = ConfigBuilder::builder();

        let defaults = toml::to_string(&AppConfig::default())
            .map_err(|e| SchedulerError::Configuration(format!("序列化默认配置失败: {e}")))?;
        builder = builder.add_source(File::from_str(&defaults, FileFormat::Toml));

        match config_path {
            Some(path) if Path::new(path).exists() => {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            }
            Some(path) => {
                return Err(SchedulerError::Configuration(format!(
                    "配置文件不存在: {path}"
                )));
            }
            None => {
                let default_paths = ["config/scheduler.toml", "scheduler.toml"];
                if let Some(path) = default_paths.iter().find(|p| Path::new(p).exists()) {
                    builder = builder.add_source(File::new(path, FileFormat::Toml));
                }
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("SCHEDULER")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .map_err(|e| SchedulerError::Configuration(format!("构建配置失败: {e}")))?
            .try_deserialize()
            .map_err(|e| SchedulerError::Configuration(format!("反序列化配置失败: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(toml_str: &str) -> SchedulerResult<Self> {
        let config: AppConfig = toml::from_str(toml_str)
            .map_err(|e| SchedulerError::Configuration(format!("解析TOML配置失败: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> SchedulerResult<String> {
        toml::to_string_pretty(self)
            .map_err(|e| SchedulerError::Configuration(format!("序列化配置为TOML失败: {e}")))
    }
}

impl ConfigValidator for AppConfig {
    fn validate(&self) -> SchedulerResult<()> {
        self.database.validate()?;
        self.message_queue.validate()?;
        self.dispatcher.validate()?;
        self.observability.validate()?;
        Ok(())
    }
}
