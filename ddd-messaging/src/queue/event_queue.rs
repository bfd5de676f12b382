//! 具名事件队列（EventQueue）
//!
//! 多个互相独立的 FIFO，按队列名懒创建。出队即移除，不做确认与重投，
//! 适用于不需要至少一次语义的简单生产者/消费者解耦。
//!
use crate::error::MessagingResult;
use crate::event::{Event, EventProperties, SerializedEvent};
use crate::sync::lock;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Mutex;

/// 未指定队列名时使用的默认队列
pub const DEFAULT_QUEUE_NAME: &str = "events";

/// 具名事件队列
#[async_trait]
pub trait EventQueue: Send + Sync {
    /// 当前已知的队列名
    async fn queues(&self) -> MessagingResult<Vec<String>>;

    /// 追加到指定队列尾部（队列不存在时创建）
    async fn enqueue(&self, queue_name: &str, event: SerializedEvent) -> MessagingResult<bool>;

    /// 取出指定队列的队首事件；队列为空或不存在时返回 `None`
    async fn dequeue(&self, queue_name: &str) -> MessagingResult<Option<SerializedEvent>>;

    /// 移除整个队列（连同其中未消费的事件）
    async fn remove_queue(&self, queue_name: &str) -> MessagingResult<bool>;
}

/// 强类型入队与默认队列的便捷方法
#[async_trait]
pub trait EventQueueExt: EventQueue {
    async fn enqueue_event<E>(
        &self,
        queue_name: &str,
        event: &E,
        properties: Option<EventProperties>,
    ) -> MessagingResult<bool>
    where
        E: Event + Serialize,
    {
        let serialized = SerializedEvent::from_event(event, properties)?;
        self.enqueue(queue_name, serialized).await
    }

    async fn enqueue_default(&self, event: SerializedEvent) -> MessagingResult<bool> {
        self.enqueue(DEFAULT_QUEUE_NAME, event).await
    }

    async fn dequeue_default(&self) -> MessagingResult<Option<SerializedEvent>> {
        self.dequeue(DEFAULT_QUEUE_NAME).await
    }
}

impl<Q: EventQueue + ?Sized> EventQueueExt for Q {}

/// 内存版具名队列
#[derive(Default)]
pub struct InMemoryEventQueue {
    queues: DashMap<String, Mutex<VecDeque<SerializedEvent>>>,
}

impl InMemoryEventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// 指定队列当前长度
    pub fn len(&self, queue_name: &str) -> usize {
        self.queues
            .get(queue_name)
            .map(|q| lock(q.value()).len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl EventQueue for InMemoryEventQueue {
    async fn queues(&self) -> MessagingResult<Vec<String>> {
        Ok(self.queues.iter().map(|e| e.key().clone()).collect())
    }

    async fn enqueue(&self, queue_name: &str, mut event: SerializedEvent) -> MessagingResult<bool> {
        event.ensure_identity();
        let queue = self.queues.entry(queue_name.to_string()).or_default();
        lock(queue.value()).push_back(event);
        Ok(true)
    }

    async fn dequeue(&self, queue_name: &str) -> MessagingResult<Option<SerializedEvent>> {
        Ok(self
            .queues
            .get(queue_name)
            .and_then(|q| lock(q.value()).pop_front()))
    }

    async fn remove_queue(&self, queue_name: &str) -> MessagingResult<bool> {
        Ok(self.queues.remove(queue_name).is_some())
    }
}
