//! 进程内事件与消息队列核心（ddd-messaging）
//!
//! 提供应用内部解耦所需的消息构件：
//! - 事件分发（`dispatch`）：订阅表、处理器解析、尽力而为的并发分发与失败观察；
//! - 拉取式队列（`queue`）：至少一次投递的确认队列与具名尽力而为队列；
//! - 消息流（`stream`）：按名称划分的只追加日志，支持区间统计、裁剪与连续读取；
//! - 事件存储（`store`）与统一的发布入口（`publisher`）。
//!
//! 所有状态仅在进程生命周期内有效，不提供持久化、跨进程投递或恰好一次语义。
//!
//! 典型用法：
//! 1. 为事件类型实现 `Event`，为处理器实现 `EventHandler<E>`；
//! 2. 通过 `EventBus::subscribe_handler` 或 `subscribe` + `HandlerResolver` 建立订阅；
//! 3. `publish` 即时分发；需要确认与重投时改用 `AckQueue`。
//!
pub mod dispatch;
pub mod error;
pub mod event;
pub mod publisher;
pub mod queue;
pub mod store;
pub mod stream;

mod sync;
