//! 事件存储（EventStore）
//!
//! 以事件ID为键保存已序列化的事件，重复ID不会覆盖已有记录。
//!
use crate::error::MessagingResult;
use crate::event::SerializedEvent;
use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

#[async_trait]
pub trait EventStore: Send + Sync {
    /// 保存事件，返回新写入的数量（已存在的ID被忽略）
    async fn save_events(&self, events: Vec<SerializedEvent>) -> MessagingResult<usize>;

    /// 按ID删除事件，返回实际删除的数量
    async fn delete_events(&self, event_ids: &[String]) -> MessagingResult<usize>;

    async fn get_event(&self, event_id: &str) -> MessagingResult<Option<SerializedEvent>>;
}

#[derive(Default)]
pub struct InMemoryEventStore {
    events: DashMap<String, SerializedEvent>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn save_events(&self, events: Vec<SerializedEvent>) -> MessagingResult<usize> {
        let mut saved = 0;
        for mut event in events {
            event.ensure_identity();
            if let Entry::Vacant(slot) = self.events.entry(event.event_id().to_string()) {
                slot.insert(event);
                saved += 1;
            }
        }
        Ok(saved)
    }

    async fn delete_events(&self, event_ids: &[String]) -> MessagingResult<usize> {
        Ok(event_ids
            .iter()
            .filter(|id| self.events.remove(id.as_str()).is_some())
            .count())
    }

    async fn get_event(&self, event_id: &str) -> MessagingResult<Option<SerializedEvent>> {
        Ok(self.events.get(event_id).map(|e| e.value().clone()))
    }
}
