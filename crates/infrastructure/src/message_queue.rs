use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lapin::{
    options::*, types::FieldTable, BasicProperties, Channel, Connection, ConnectionProperties,
    Queue,
};
use scheduler_core::{
    config::MessageQueueConfig, models::Message, traits::MessageQueue, SchedulerError,
    SchedulerResult,
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// 单次 `consume_messages` 最多拉取的消息数
const CONSUME_BATCH_SIZE: usize = 16;

/// RabbitMQ消息队列实现
///
/// 拉取到的消息在调用 `ack_message` / `nack_message` 之前保持未确认状态，
/// 连接断开时由 broker 重新投递。
pub struct RabbitMQMessageQueue {
    connection: Connection,
    channel: Arc<Mutex<Channel>>,
    /// 消息ID -> 按投递顺序排列的 delivery_tag。
    /// 同一消息ID可能在一批中被投递多次，每次确认只消耗最早的一个。
    pending: Mutex<HashMap<String, VecDeque<u64>>>,
    config: MessageQueueConfig,
}

impl RabbitMQMessageQueue {
    /// 创建新的RabbitMQ消息队列实例
    pub async fn new(config: MessageQueueConfig) -> SchedulerResult<Self> {
        let connect = Connection::connect(&config.url, ConnectionProperties::default());
        let connection = tokio::time::timeout(
            Duration::from_secs(config.connection_timeout_seconds),
            connect,
        )
        .await
        .map_err(|_| SchedulerError::MessageQueue("连接RabbitMQ超时".to_string()))?
        .map_err(|e| SchedulerError::MessageQueue(format!("连接RabbitMQ失败: {e}")))?;

        let channel = connection
            .create_channel()
            .await
            .map_err(|e| SchedulerError::MessageQueue(format!("创建通道失败: {e}")))?;

        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| SchedulerError::MessageQueue(format!("开启发布确认失败: {e}")))?;

        info!("成功连接到RabbitMQ");

        let queue = Self {
            connection,
            channel: Arc::new(Mutex::new(channel)),
            pending: Mutex::new(HashMap::new()),
            config,
        };

        queue.initialize_queues().await?;

        Ok(queue)
    }

    /// 声明请求与响应队列
    async fn initialize_queues(&self) -> SchedulerResult<()> {
        let channel = self.channel.lock().await;
        Self::declare_queue(&channel, &self.config.request_queue, true).await?;
        Self::declare_queue(&channel, &self.config.response_queue, true).await?;
        info!(
            request_queue = %self.config.request_queue,
            response_queue = %self.config.response_queue,
            "队列初始化完成"
        );
        Ok(())
    }

    async fn declare_queue(channel: &Channel, queue_name: &str, durable: bool) -> SchedulerResult<Queue> {
        let queue = channel
            .queue_declare(
                queue_name,
                QueueDeclareOptions {
                    durable,
                    exclusive: false,
                    auto_delete: false,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| {
                SchedulerError::MessageQueue(format!("声明队列 {queue_name} 失败: {e}"))
            })?;

        debug!("队列 {} 声明成功", queue_name);
        Ok(queue)
    }

    fn is_not_found(error: &lapin::Error) -> bool {
        let error_msg = error.to_string();
        error_msg.contains("NOT_FOUND") || error_msg.contains("404")
    }

    async fn take_delivery_tag(&self, message_id: &str) -> SchedulerResult<u64> {
        let mut pending = self.pending.lock().await;
        let tags = pending.get_mut(message_id).ok_or_else(|| {
            SchedulerError::MessageQueue(format!("消息 {message_id} 不在未确认列表中"))
        })?;
        let delivery_tag = tags.pop_front();
        if tags.is_empty() {
            pending.remove(message_id);
        }
        delivery_tag.ok_or_else(|| {
            SchedulerError::MessageQueue(format!("消息 {message_id} 不在未确认列表中"))
        })
    }

    /// 获取连接状态
    pub fn is_connected(&self) -> bool {
        self.connection.status().connected()
    }

    /// 关闭连接，未确认的消息由 broker 重新投递
    pub async fn close(&self) -> SchedulerResult<()> {
        self.connection
            .close(200, "正常关闭")
            .await
            .map_err(|e| SchedulerError::MessageQueue(format!("关闭连接失败: {e}")))?;

        info!("RabbitMQ连接已关闭");
        Ok(())
    }
}

#[async_trait]
impl MessageQueue for RabbitMQMessageQueue {
    async fn publish_message(&self, queue: &str, message: &Message) -> SchedulerResult<()> {
        let payload = message.serialize_bytes()?;
        let channel = self.channel.lock().await;

        let confirm = channel
            .basic_publish(
                "",
                queue,
                BasicPublishOptions::default(),
                &payload,
                BasicProperties::default()
                    .with_delivery_mode(2)
                    .with_content_type("application/json".into()),
            )
            .await
            .map_err(|e| {
                SchedulerError::MessageQueue(format!("发布消息到队列 {queue} 失败: {e}"))
            })?;

        let confirmation = confirm
            .await
            .map_err(|e| SchedulerError::MessageQueue(format!("消息发布确认失败: {e}")))?;
        if confirmation.is_nack() {
            return Err(SchedulerError::MessageQueue(format!(
                "broker 拒绝了发往队列 {queue} 的消息"
            )));
        }

        debug!(message_id = %message.id, "消息已发布到队列: {}", queue);
        Ok(())
    }

    async fn consume_messages(&self, queue: &str) -> SchedulerResult<Vec<Message>> {
        let channel = self.channel.lock().await;
        let mut messages = Vec::new();

        while messages.len() < CONSUME_BATCH_SIZE {
            let delivery = match channel.basic_get(queue, BasicGetOptions::default()).await {
                Ok(Some(delivery)) => delivery,
                Ok(None) => break,
                Err(e) if Self::is_not_found(&e) => {
                    debug!("队列 {} 不存在，返回空结果", queue);
                    break;
                }
                Err(e) => {
                    return Err(SchedulerError::MessageQueue(format!(
                        "从队列 {queue} 获取消息失败: {e}"
                    )))
                }
            };

            match Message::deserialize_bytes(&delivery.data) {
                Ok(message) => {
                    self.pending
                        .lock()
                        .await
                        .entry(message.id.clone())
                        .or_default()
                        .push_back(delivery.delivery_tag);
                    messages.push(message);
                }
                Err(e) => {
                    // 无法解析的消息不再投递
                    warn!("丢弃无法解析的消息: {}", e);
                    channel
                        .basic_reject(delivery.delivery_tag, BasicRejectOptions { requeue: false })
                        .await
                        .map_err(|e| {
                            SchedulerError::MessageQueue(format!("拒绝消息失败: {e}"))
                        })?;
                }
            }
        }

        Ok(messages)
    }

    async fn ack_message(&self, message_id: &str) -> SchedulerResult<()> {
        let delivery_tag = self.take_delivery_tag(message_id).await?;
        let channel = self.channel.lock().await;
        channel
            .basic_ack(delivery_tag, BasicAckOptions::default())
            .await
            .map_err(|e| SchedulerError::MessageQueue(format!("确认消息失败: {e}")))?;

        debug!("确认消息: {}", message_id);
        Ok(())
    }

    async fn nack_message(&self, message_id: &str, requeue: bool) -> SchedulerResult<()> {
        let delivery_tag = self.take_delivery_tag(message_id).await?;
        let channel = self.channel.lock().await;
        channel
            .basic_nack(
                delivery_tag,
                BasicNackOptions {
                    multiple: false,
                    requeue,
                },
            )
            .await
            .map_err(|e| SchedulerError::MessageQueue(format!("拒绝消息失败: {e}")))?;

        debug!("拒绝消息: {}, 重新入队: {}", message_id, requeue);
        Ok(())
    }

    async fn create_queue(&self, queue: &str, durable: bool) -> SchedulerResult<()> {
        let channel = self.channel.lock().await;
        Self::declare_queue(&channel, queue, durable).await?;
        Ok(())
    }

    async fn get_queue_size(&self, queue: &str) -> SchedulerResult<u32> {
        let channel = self.channel.lock().await;
        let queue_info = channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    passive: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await;

        match queue_info {
            Ok(info) => Ok(info.message_count()),
            Err(e) if Self::is_not_found(&e) => {
                debug!("队列 {} 不存在，返回大小为0", queue);
                Ok(0)
            }
            Err(e) => Err(SchedulerError::MessageQueue(format!(
                "获取队列 {queue} 信息失败: {e}"
            ))),
        }
    }

    async fn purge_queue(&self, queue: &str) -> SchedulerResult<()> {
        let channel = self.channel.lock().await;
        channel
            .queue_purge(queue, QueuePurgeOptions::default())
            .await
            .map_err(|e| SchedulerError::MessageQueue(format!("清空队列 {queue} 失败: {e}")))?;

        debug!("队列 {} 已清空", queue);
        Ok(())
    }
}
