use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use scheduler_core::{models::Message, traits::MessageQueue, SchedulerError, SchedulerResult};
use tokio::sync::Mutex;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct InMemoryQueueConfig {
    /// 队列最大容量（0表示无限制）
    pub max_queue_size: usize,
    /// 单次消费最多取出的消息数
    pub consume_batch_size: usize,
}

impl Default for InMemoryQueueConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 10000,
            consume_batch_size: 16,
        }
    }
}

#[derive(Debug, Default)]
struct QueueState {
    queues: HashMap<String, VecDeque<Message>>,
    /// 已取出未确认的消息：消息ID -> 按取出顺序排列的 (队列名, 消息)。
    /// 重复投递的同ID消息各自占一项。
    in_flight: HashMap<String, VecDeque<(String, Message)>>,
}

impl QueueState {
    fn take_in_flight(&mut self, message_id: &str) -> SchedulerResult<(String, Message)> {
        let not_in_flight =
            || SchedulerError::MessageQueue(format!("消息 {message_id} 不在未确认列表中"));
        let deliveries = self.in_flight.get_mut(message_id).ok_or_else(not_in_flight)?;
        let delivery = deliveries.pop_front();
        if deliveries.is_empty() {
            self.in_flight.remove(message_id);
        }
        delivery.ok_or_else(not_in_flight)
    }
}

/// 内存消息队列实现
///
/// 单进程部署与测试使用。与 RabbitMQ 实现保持相同的确认语义：
/// 取出的消息在确认前保留，`nack_message(.., true)` 将其放回队首。
#[derive(Debug)]
pub struct InMemoryMessageQueue {
    state: Mutex<QueueState>,
    config: InMemoryQueueConfig,
}

impl Default for InMemoryMessageQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryMessageQueue {
    pub fn new() -> Self {
        Self::with_config(InMemoryQueueConfig::default())
    }

    pub fn with_config(config: InMemoryQueueConfig) -> Self {
        info!("创建内存消息队列: {:?}", config);
        Self {
            state: Mutex::new(QueueState::default()),
            config,
        }
    }

    /// 已取出但尚未确认的消息数
    pub async fn in_flight_count(&self) -> usize {
        self.state.lock().await.in_flight.values().map(VecDeque::len).sum()
    }
}

#[async_trait]
impl MessageQueue for InMemoryMessageQueue {
    async fn publish_message(&self, queue: &str, message: &Message) -> SchedulerResult<()> {
        let mut state = self.state.lock().await;
        let entries = state.queues.entry(queue.to_string()).or_default();

        if self.config.max_queue_size > 0 && entries.len() >= self.config.max_queue_size {
            return Err(SchedulerError::MessageQueue(format!(
                "队列 {queue} 已满 (容量: {})",
                self.config.max_queue_size
            )));
        }

        entries.push_back(message.clone());
        debug!(message_id = %message.id, "消息已发布到内存队列: {}", queue);
        Ok(())
    }

    async fn consume_messages(&self, queue: &str) -> SchedulerResult<Vec<Message>> {
        let mut state = self.state.lock().await;
        let Some(entries) = state.queues.get_mut(queue) else {
            return Ok(Vec::new());
        };

        let take = entries.len().min(self.config.consume_batch_size);
        let messages: Vec<Message> = entries.drain(..take).collect();
        for message in &messages {
            state
                .in_flight
                .entry(message.id.clone())
                .or_default()
                .push_back((queue.to_string(), message.clone()));
        }
        Ok(messages)
    }

    async fn ack_message(&self, message_id: &str) -> SchedulerResult<()> {
        self.state.lock().await.take_in_flight(message_id)?;
        debug!("确认消息: {}", message_id);
        Ok(())
    }

    async fn nack_message(&self, message_id: &str, requeue: bool) -> SchedulerResult<()> {
        let mut state = self.state.lock().await;
        let (queue, message) = state.take_in_flight(message_id)?;
        if requeue {
            state.queues.entry(queue).or_default().push_front(message);
        }
        debug!("拒绝消息: {}, 重新入队: {}", message_id, requeue);
        Ok(())
    }

    async fn create_queue(&self, queue: &str, _durable: bool) -> SchedulerResult<()> {
        self.state
            .lock()
            .await
            .queues
            .entry(queue.to_string())
            .or_default();
        Ok(())
    }

    async fn get_queue_size(&self, queue: &str) -> SchedulerResult<u32> {
        let state = self.state.lock().await;
        Ok(state.queues.get(queue).map_or(0, |q| q.len() as u32))
    }

    async fn purge_queue(&self, queue: &str) -> SchedulerResult<()> {
        if let Some(entries) = self.state.lock().await.queues.get_mut(queue) {
            entries.clear();
        }
        debug!("队列 {} 已清空", queue);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scheduler_core::models::TaskResponseMessage;
    use uuid::Uuid;

    fn response() -> Message {
        Message::task_response(TaskResponseMessage::succeeded(Uuid::new_v4(), 1, 10))
    }

    #[tokio::test]
    async fn test_consume_then_ack_removes_message() {
        let queue = InMemoryMessageQueue::new();
        let message = response();
        queue.publish_message("responses", &message).await.unwrap();

        let consumed = queue.consume_messages("responses").await.unwrap();
        assert_eq!(consumed.len(), 1);
        assert_eq!(queue.get_queue_size("responses").await.unwrap(), 0);
        assert_eq!(queue.in_flight_count().await, 1);

        queue.ack_message(&message.id).await.unwrap();
        assert_eq!(queue.in_flight_count().await, 0);
        assert!(queue.ack_message(&message.id).await.is_err());
    }

    #[tokio::test]
    async fn test_nack_with_requeue_redelivers_first() {
        let queue = InMemoryMessageQueue::new();
        let first = response();
        let second = response();
        queue.publish_message("responses", &first).await.unwrap();
        queue.publish_message("responses", &second).await.unwrap();

        let consumed = queue.consume_messages("responses").await.unwrap();
        assert_eq!(consumed.len(), 2);
        queue.ack_message(&second.id).await.unwrap();
        queue.nack_message(&first.id, true).await.unwrap();

        let redelivered = queue.consume_messages("responses").await.unwrap();
        assert_eq!(redelivered.len(), 1);
        assert_eq!(redelivered[0].id, first.id);
    }

    #[tokio::test]
    async fn test_nack_without_requeue_drops_message() {
        let queue = InMemoryMessageQueue::new();
        let message = response();
        queue.publish_message("responses", &message).await.unwrap();
        queue.consume_messages("responses").await.unwrap();
        queue.nack_message(&message.id, false).await.unwrap();
        assert!(queue.consume_messages("responses").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_deliveries_are_acked_independently() {
        let queue = InMemoryMessageQueue::new();
        let message = response();
        queue.publish_message("responses", &message).await.unwrap();
        queue.publish_message("responses", &message).await.unwrap();

        let consumed = queue.consume_messages("responses").await.unwrap();
        assert_eq!(consumed.len(), 2);
        assert_eq!(queue.in_flight_count().await, 2);

        queue.ack_message(&message.id).await.unwrap();
        assert_eq!(queue.in_flight_count().await, 1);
        queue.ack_message(&message.id).await.unwrap();
        assert_eq!(queue.in_flight_count().await, 0);
        assert!(queue.ack_message(&message.id).await.is_err());
    }

    #[tokio::test]
    async fn test_duplicate_delivery_nack_requeues_one_copy() {
        let queue = InMemoryMessageQueue::new();
        let message = response();
        queue.publish_message("responses", &message).await.unwrap();
        queue.publish_message("responses", &message).await.unwrap();
        queue.consume_messages("responses").await.unwrap();

        queue.ack_message(&message.id).await.unwrap();
        queue.nack_message(&message.id, true).await.unwrap();

        let redelivered = queue.consume_messages("responses").await.unwrap();
        assert_eq!(redelivered.len(), 1);
        assert_eq!(redelivered[0].id, message.id);
        assert_eq!(queue.in_flight_count().await, 1);
    }

    #[tokio::test]
    async fn test_capacity_limit() {
        let queue = InMemoryMessageQueue::with_config(InMemoryQueueConfig {
            max_queue_size: 1,
            consume_batch_size: 16,
        });
        queue.publish_message("requests", &response()).await.unwrap();
        assert!(queue.publish_message("requests", &response()).await.is_err());
    }
}
