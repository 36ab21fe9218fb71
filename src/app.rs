use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use scheduler_core::{
    traits::{DistributedLock, ScheduledTaskRepository, TaskExecutionRepository, TaskScheduleRepository},
    AppConfig,
};
use scheduler_dispatcher::{
    DependencyChecker, DependencyGraph, ResponseHandler, ResponseListener, ScheduleEvaluator,
    TaskDispatcher, TaskScheduler,
};
use scheduler_infrastructure::{
    create_pool, health_check, MessageQueueFactory, MetricsCollector, PostgresAdvisoryLock,
    PostgresScheduledTaskRepository, PostgresTaskExecutionRepository,
    PostgresTaskScheduleRepository,
};
use sqlx::PgPool;
use tokio::sync::broadcast;
use tracing::{error, info};

/// 进程内组装好的调度副本
pub struct Application {
    pool: PgPool,
    scheduler: Option<Arc<TaskScheduler>>,
    listener: Arc<ResponseListener>,
}

impl Application {
    /// 连接存储与消息队列，加载任务图并校验所有调度
    ///
    /// 循环依赖、无效的调度表达式或配置错误都会使启动失败。
    pub async fn new(config: AppConfig, instance_id: String) -> Result<Self> {
        info!(instance_id = %instance_id, "初始化调度副本");

        let pool = create_pool(&config.database)
            .await
            .context("创建数据库连接池失败")?;
        health_check(&pool).await.context("数据库健康检查失败")?;
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("执行数据库迁移失败")?;

        let task_repo: Arc<dyn ScheduledTaskRepository> =
            Arc::new(PostgresScheduledTaskRepository::new(pool.clone()));
        let schedule_repo: Arc<dyn TaskScheduleRepository> =
            Arc::new(PostgresTaskScheduleRepository::new(pool.clone()));
        let execution_repo: Arc<dyn TaskExecutionRepository> =
            Arc::new(PostgresTaskExecutionRepository::new(pool.clone()));
        let lock: Arc<dyn DistributedLock> = Arc::new(PostgresAdvisoryLock::new(pool.clone()));

        let message_queue = MessageQueueFactory::create(&config.message_queue)
            .await
            .context("创建消息队列失败")?;
        let metrics = Arc::new(MetricsCollector::new());

        let graph = Arc::new(
            DependencyGraph::load(task_repo.as_ref())
                .await
                .context("加载任务依赖图失败")?,
        );
        let evaluator = Arc::new(ScheduleEvaluator::new(schedule_repo, execution_repo.clone()));
        let schedule_count = evaluator
            .validate_all()
            .await
            .context("校验调度配置失败")?;
        info!("已加载 {} 个任务，{} 个调度", graph.len(), schedule_count);

        let dispatcher = Arc::new(TaskDispatcher::new(
            execution_repo.clone(),
            message_queue.clone(),
            config.message_queue.request_queue.clone(),
            metrics.clone(),
        ));

        let scheduler = config.dispatcher.enabled.then(|| {
            Arc::new(TaskScheduler::new(
                evaluator,
                Arc::new(DependencyChecker::new(graph.clone(), execution_repo.clone())),
                dispatcher.clone(),
                lock,
                instance_id,
                Duration::from_secs(config.dispatcher.poll_interval_seconds),
                metrics.clone(),
            ))
        });

        let handler = Arc::new(ResponseHandler::new(
            execution_repo,
            dispatcher,
            graph,
            config.dispatcher.max_attempts,
            metrics,
        ));
        let listener = Arc::new(ResponseListener::new(
            handler,
            message_queue,
            config.message_queue.response_queue.clone(),
            config.dispatcher.response_workers,
        ));

        Ok(Self {
            pool,
            scheduler,
            listener,
        })
    }

    /// 运行调度循环与响应监听器，直到两者都退出
    pub async fn run(&self, shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let scheduler_handle = self.scheduler.as_ref().map(|scheduler| {
            let scheduler = Arc::clone(scheduler);
            let shutdown_rx = shutdown_rx.resubscribe();
            tokio::spawn(async move { scheduler.run(shutdown_rx).await })
        });
        if scheduler_handle.is_none() {
            info!("调度循环已在配置中禁用，本副本只处理响应");
        }

        let listener_handle = {
            let listener = Arc::clone(&self.listener);
            tokio::spawn(async move { listener.run(shutdown_rx).await })
        };

        if let Some(handle) = scheduler_handle {
            match handle.await {
                Ok(Ok(())) => info!("调度循环已停止"),
                Ok(Err(e)) => error!("调度循环异常退出: {}", e),
                Err(e) => error!("调度循环任务失败: {}", e),
            }
        }
        match listener_handle.await {
            Ok(Ok(())) => info!("响应监听器已停止"),
            Ok(Err(e)) => error!("响应监听器异常退出: {}", e),
            Err(e) => error!("响应监听器任务失败: {}", e),
        }

        self.pool.close().await;
        Ok(())
    }
}
