//! 类型擦除的事件形态（SerializedEvent）
//!
//! 命名队列与事件存储需要存放任意类型的事件，这里以 JSON 载荷 + 事件类型
//! 的形式保存，并在消费端按目标类型还原。
//!
use crate::error::{MessagingError, MessagingResult};
use crate::event::{Event, EventProperties};
use bon::Builder;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Builder, Serialize, Deserialize)]
pub struct SerializedEvent {
    /// 事件类型，用于区分不同的事件
    #[builder(into)]
    event_type: String,
    /// 事件属性（ID、时间、链路信息等）
    #[builder(default)]
    properties: EventProperties,
    /// 事件负载
    payload: Value,
}

impl SerializedEvent {
    /// 将强类型事件序列化为可入队的形态，保留调用方提供的ID/时间
    pub fn from_event<E>(event: &E, properties: Option<EventProperties>) -> MessagingResult<Self>
    where
        E: Event + Serialize,
    {
        let mut properties = properties.unwrap_or_default().normalized();
        properties.set_event_type(event.event_type());

        Ok(Self {
            event_type: event.event_type().to_string(),
            properties,
            payload: serde_json::to_value(event)?,
        })
    }

    pub fn event_id(&self) -> &str {
        self.properties.event_id()
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn properties(&self) -> &EventProperties {
        &self.properties
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    /// 按目标类型还原事件，事件类型不一致时返回 `TypeMismatch`
    pub fn decode<E>(&self) -> MessagingResult<E>
    where
        E: Event + DeserializeOwned,
    {
        if self.event_type != E::EVENT_TYPE {
            return Err(MessagingError::TypeMismatch {
                expected: E::EVENT_TYPE.to_string(),
                found: self.event_type.clone(),
            });
        }
        Ok(serde_json::from_value(self.payload.clone())?)
    }

    /// 补全缺失的事件ID
    pub(crate) fn ensure_identity(&mut self) {
        self.properties.ensure_identity();
    }
}
