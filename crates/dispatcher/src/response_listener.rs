use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use scheduler_core::{models::Message, traits::MessageQueue, SchedulerError, SchedulerResult};

use crate::response_handler::{should_requeue, ResponseHandler};

/// 队列为空时的轮询间隔
const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// 消费响应主题，每条消息交给有界工作池处理
///
/// 处理成功（包括被丢弃的重复响应）后确认消息；可恢复的失败重新入队。
pub struct ResponseListener {
    handler: Arc<ResponseHandler>,
    message_queue: Arc<dyn MessageQueue>,
    response_queue: String,
    workers: usize,
}

impl ResponseListener {
    pub fn new(
        handler: Arc<ResponseHandler>,
        message_queue: Arc<dyn MessageQueue>,
        response_queue: String,
        workers: usize,
    ) -> Self {
        Self {
            handler,
            message_queue,
            response_queue,
            workers: workers.max(1),
        }
    }

    /// 运行直到收到关闭信号，退出前等待在途处理完成
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) -> SchedulerResult<()> {
        info!(
            queue = %self.response_queue,
            workers = self.workers,
            "响应监听器启动"
        );
        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut in_flight = JoinSet::new();

        loop {
            while let Some(joined) = in_flight.try_join_next() {
                if let Err(e) = joined {
                    error!("响应处理任务异常退出: {}", e);
                }
            }

            let idle = tokio::select! {
                _ = shutdown.recv() => break,
                batch = self.message_queue.consume_messages(&self.response_queue) => match batch {
                    Ok(messages) if messages.is_empty() => true,
                    Ok(messages) => {
                        debug!("拉取到 {} 条响应", messages.len());
                        for message in messages {
                            let permit = semaphore
                                .clone()
                                .acquire_owned()
                                .await
                                .map_err(|e| SchedulerError::Internal(format!("工作池已关闭: {e}")))?;
                            let handler = self.handler.clone();
                            let queue = self.message_queue.clone();
                            in_flight.spawn(async move {
                                let _permit = permit;
                                Self::handle_delivery(&handler, queue.as_ref(), message).await;
                            });
                        }
                        false
                    }
                    Err(e) => {
                        error!("从 {} 拉取响应失败: {}", self.response_queue, e);
                        true
                    }
                },
            };

            if idle {
                tokio::select! {
                    _ = shutdown.recv() => break,
                    _ = tokio::time::sleep(IDLE_POLL_INTERVAL) => {}
                }
            }
        }

        info!("响应监听器停止，等待 {} 个在途处理完成", in_flight.len());
        while let Some(joined) = in_flight.join_next().await {
            if let Err(e) = joined {
                error!("响应处理任务异常退出: {}", e);
            }
        }
        Ok(())
    }

    async fn handle_delivery(handler: &ResponseHandler, queue: &dyn MessageQueue, message: Message) {
        let settled = match handler.process_message(&message).await {
            Ok(outcome) => {
                debug!(message_id = %message.id, ?outcome, "响应处理完成");
                queue.ack_message(&message.id).await
            }
            Err(e) if should_requeue(&e) => {
                warn!(message_id = %message.id, "响应处理失败，重新入队: {}", e);
                queue.nack_message(&message.id, true).await
            }
            Err(e) => {
                error!(message_id = %message.id, "响应处理失败，丢弃: {}", e);
                queue.nack_message(&message.id, false).await
            }
        };

        if let Err(e) = settled {
            error!(message_id = %message.id, "确认响应消息失败: {}", e);
        }
    }
}
