//! 事件（Event）与事件属性
//!
//! 定义事件载荷需要实现的最小接口（`Event`）、随事件流转的 `EventProperties`，
//! 以及将二者封装后的 `EventEnvelope` 与可跨类型存放的 `SerializedEvent`。

mod envelope;
mod event_trait;
mod properties;
mod serialized_event;

pub use envelope::EventEnvelope;
pub use event_trait::Event;
pub use properties::{EventProperties, new_event_id};
pub use serialized_event::SerializedEvent;
