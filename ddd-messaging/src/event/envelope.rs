use super::properties::EventProperties;

/// 事件信封，包含事件载荷与事件属性
#[derive(Debug, Clone)]
pub struct EventEnvelope<T> {
    pub data: T,
    pub properties: EventProperties,
}

impl<T> EventEnvelope<T> {
    /// 封装事件；属性缺省时生成新的ID与时间
    pub fn new(data: T, properties: Option<EventProperties>) -> Self {
        Self {
            data,
            properties: properties.unwrap_or_default().normalized(),
        }
    }

    pub fn event_id(&self) -> &str {
        self.properties.event_id()
    }

    pub fn into_parts(self) -> (T, EventProperties) {
        (self.data, self.properties)
    }
}
