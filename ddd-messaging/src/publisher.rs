//! 事件发布方（EventPublisher）
//!
//! 统一“发布一个事件”的入口：`EventBus` 进程内即时分发，
//! `EventQueuePublisher` 则写入具名队列供拉取式消费。
//!
use crate::dispatch::EventBus;
use crate::error::MessagingResult;
use crate::event::{Event, SerializedEvent};
use crate::queue::{DEFAULT_QUEUE_NAME, EventQueue};
use async_trait::async_trait;
use bon::Builder;
use serde::Serialize;
use std::sync::Arc;

#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// 发布事件，返回是否被接受
    async fn publish<E>(&self, event: E) -> MessagingResult<bool>
    where
        E: Event + Serialize;
}

#[async_trait]
impl EventPublisher for EventBus {
    async fn publish<E>(&self, event: E) -> MessagingResult<bool>
    where
        E: Event + Serialize,
    {
        Ok(EventBus::publish(self, event, None))
    }
}

/// 队列名解析：事件类型 → 队列名
pub type QueueNameResolver = Arc<dyn Fn(&str) -> String + Send + Sync>;

fn default_queue_name_resolver() -> QueueNameResolver {
    Arc::new(|_event_type: &str| DEFAULT_QUEUE_NAME.to_string())
}

/// 写入事件队列的发布方
#[derive(Builder)]
pub struct EventQueuePublisher {
    queue: Arc<dyn EventQueue>,
    #[builder(default = default_queue_name_resolver())]
    queue_name_resolver: QueueNameResolver,
}

impl EventQueuePublisher {
    pub fn queue_name(&self, event_type: &str) -> String {
        let name = (self.queue_name_resolver)(event_type);
        if name.is_empty() {
            DEFAULT_QUEUE_NAME.to_string()
        } else {
            name
        }
    }
}

#[async_trait]
impl EventPublisher for EventQueuePublisher {
    async fn publish<E>(&self, event: E) -> MessagingResult<bool>
    where
        E: Event + Serialize,
    {
        let serialized = SerializedEvent::from_event(&event, None)?;
        let queue_name = self.queue_name(event.event_type());
        self.queue.enqueue(&queue_name, serialized).await
    }
}
