use async_trait::async_trait;

use crate::{models::Message, SchedulerResult};

/// 消息队列抽象接口
///
/// 投递语义为至少一次：`consume_messages` 取出的消息在 `ack_message` 之前
/// 不会被视为已处理，`nack_message(.., true)` 会让消息重新投递。
#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// 发布消息到指定队列
    async fn publish_message(&self, queue: &str, message: &Message) -> SchedulerResult<()>;

    /// 从指定队列消费消息
    async fn consume_messages(&self, queue: &str) -> SchedulerResult<Vec<Message>>;

    /// 确认消息处理完成
    async fn ack_message(&self, message_id: &str) -> SchedulerResult<()>;

    /// 拒绝消息，可选择重新入队
    async fn nack_message(&self, message_id: &str, requeue: bool) -> SchedulerResult<()>;

    /// 创建队列
    async fn create_queue(&self, queue: &str, durable: bool) -> SchedulerResult<()>;

    /// 获取队列中的消息数量
    async fn get_queue_size(&self, queue: &str) -> SchedulerResult<u32>;

    /// 清空队列
    async fn purge_queue(&self, queue: &str) -> SchedulerResult<()>;
}
