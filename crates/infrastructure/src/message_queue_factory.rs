use std::sync::Arc;

use scheduler_core::{
    config::{MessageQueueConfig, MessageQueueType},
    traits::MessageQueue,
    SchedulerResult,
};
use tracing::{debug, info};

use crate::{InMemoryMessageQueue, RabbitMQMessageQueue};

pub struct MessageQueueFactory;

impl MessageQueueFactory {
    pub async fn create(config: &MessageQueueConfig) -> SchedulerResult<Arc<dyn MessageQueue>> {
        debug!("创建消息队列，类型: {:?}", config.r#type);

        let queue: Arc<dyn MessageQueue> = match config.r#type {
            MessageQueueType::Rabbitmq => {
                info!("初始化 RabbitMQ 消息队列");
                Arc::new(RabbitMQMessageQueue::new(config.clone()).await?)
            }
            MessageQueueType::InMemory => {
                info!("初始化内存消息队列");
                let queue = InMemoryMessageQueue::new();
                queue.create_queue(&config.request_queue, true).await?;
                queue.create_queue(&config.response_queue, true).await?;
                Arc::new(queue)
            }
        };
        Ok(queue)
    }
}
