use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Arg, Command};
use scheduler_core::AppConfig;
use scheduler_infrastructure::observability::{
    init_metrics, init_structured_logging, LogFormat, LoggingConfig,
};
use tokio::signal;
use tracing::{error, info};

use payment_task_scheduler::app::Application;
use payment_task_scheduler::shutdown::ShutdownManager;

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("scheduler")
        .version(env!("CARGO_PKG_VERSION"))
        .about("支付平台分布式任务编排服务")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("配置文件路径，缺省时查找 config/scheduler.toml"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("日志级别，覆盖配置文件")
                .value_parser(["trace", "debug", "info", "warn", "error"]),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .help("日志格式")
                .value_parser(["json", "pretty", "compact"])
                .default_value("json"),
        )
        .arg(
            Arg::new("instance-id")
                .long("instance-id")
                .value_name("ID")
                .help("副本标识，覆盖配置文件"),
        )
        .get_matches();

    let config_path = matches.get_one::<String>("config").map(String::as_str);
    let mut config = AppConfig::load(config_path).context("加载配置失败")?;
    if let Some(id) = matches.get_one::<String>("instance-id") {
        config.dispatcher.instance_id = Some(id.clone());
    }

    let log_level = matches
        .get_one::<String>("log-level")
        .cloned()
        .unwrap_or_else(|| config.observability.log_level.clone());
    let log_format = matches
        .get_one::<String>("log-format")
        .map_or(Ok(LogFormat::Json), |f| LogFormat::from_str(f))
        .map_err(anyhow::Error::msg)?;
    init_structured_logging(LoggingConfig {
        level: log_level,
        format: log_format,
        include_location: true,
    })
    .context("初始化日志失败")?;

    if config.observability.metrics_enabled {
        init_metrics(&config.observability.metrics_bind_address).context("初始化指标导出失败")?;
    }

    let instance_id = config.dispatcher.resolved_instance_id();
    info!(instance_id = %instance_id, "启动任务编排服务");

    let app = match Application::new(config, instance_id).await {
        Ok(app) => Arc::new(app),
        Err(e) => {
            error!("启动失败: {:#}", e);
            return Err(e);
        }
    };

    let shutdown_manager = ShutdownManager::default();
    let app_handle = {
        let app = Arc::clone(&app);
        let shutdown_rx = shutdown_manager.subscribe().await;
        tokio::spawn(async move {
            if let Err(e) = app.run(shutdown_rx).await {
                error!("应用运行失败: {:#}", e);
            }
        })
    };

    wait_for_shutdown_signal().await;
    info!("收到关闭信号，开始优雅关闭");
    shutdown_manager.shutdown().await;

    if shutdown_manager.wait_for(app_handle).await {
        info!("应用已优雅关闭");
    }
    Ok(())
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("监听Ctrl+C信号失败: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("安装SIGTERM信号处理器失败: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("收到Ctrl+C信号"),
        _ = terminate => info!("收到SIGTERM信号"),
    }
}
