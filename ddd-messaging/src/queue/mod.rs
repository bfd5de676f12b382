//! 拉取式队列（queue）
//!
//! - `AckQueue`：单一队列，至少一次投递：待投递 FIFO + 在途表 + 超时回收；
//! - `EventQueue`：多个具名的尽力而为 FIFO，出队即移除，无确认与重投。
//!
pub mod ack_queue;
pub mod event_queue;

pub use ack_queue::{AckQueue, AckQueueConfig, AckQueueEntry};
pub use event_queue::{DEFAULT_QUEUE_NAME, EventQueue, EventQueueExt, InMemoryEventQueue};
