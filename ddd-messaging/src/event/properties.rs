use bon::Builder;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

/// 生成新的事件ID（UUID v4 字符串）
pub fn new_event_id() -> String {
    Uuid::new_v4().to_string()
}

/// 事件属性：随事件一起流转的标识、时间与链路信息
#[derive(Builder, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventProperties {
    /// 事件唯一标识，缺省时自动生成
    #[builder(default = new_event_id(), into)]
    #[serde(default)]
    event_id: String,
    /// 事件创建时间（UTC），缺省时取当前时间
    #[builder(default = Utc::now())]
    #[serde(default = "Utc::now")]
    event_at: DateTime<Utc>,
    /// 链路追踪ID
    #[builder(into)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    trace_id: Option<String>,
    /// 事件来源
    #[builder(into)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    event_source: Option<String>,
    /// 事件类型，由发布/入队方填充
    #[builder(into)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    event_type: Option<String>,
    /// 扩展头信息
    #[builder(default)]
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    headers: HashMap<String, Value>,
}

impl Default for EventProperties {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl EventProperties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    pub fn event_at(&self) -> DateTime<Utc> {
        self.event_at
    }

    pub fn trace_id(&self) -> Option<&str> {
        self.trace_id.as_deref()
    }

    pub fn event_source(&self) -> Option<&str> {
        self.event_source.as_deref()
    }

    pub fn event_type(&self) -> Option<&str> {
        self.event_type.as_deref()
    }

    pub fn headers(&self) -> &HashMap<String, Value> {
        &self.headers
    }

    pub fn header(&self, key: &str) -> Option<&Value> {
        self.headers.get(key)
    }

    pub fn insert_header(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.headers.insert(key.into(), value.into());
    }

    pub fn set_trace_id(&mut self, trace_id: impl Into<String>) {
        self.trace_id = Some(trace_id.into());
    }

    pub fn set_event_type(&mut self, event_type: impl Into<String>) {
        self.event_type = Some(event_type.into());
    }

    /// 补全缺失的事件ID，保证事件在被任何消费方观察前具备非空标识
    ///
    /// 事件时间在类型层面始终存在（构建或反序列化时缺省为当前时间）。
    pub fn ensure_identity(&mut self) {
        if self.event_id.trim().is_empty() {
            self.event_id = new_event_id();
        }
    }

    /// 消费自身并返回补全标识后的属性
    pub fn normalized(mut self) -> Self {
        self.ensure_identity();
        self
    }
}
