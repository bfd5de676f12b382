//! 进程内事件分发（dispatch）
//!
//! 提供发布/订阅的基础抽象与运行时：
//! - `SubscriptionManager`：事件类型 → 处理器类型集合，幂等增删；
//! - `HandlerResolver`：按处理器注册信息解析出可执行的处理器实例；
//! - `EventHandler`：对某类事件进行处理；
//! - `DispatchObserver`：接收被隔离的处理器失败与分发报告；
//! - `EventBus`：查找订阅、解析处理器并发执行，失败互不影响且不回传给发布方。
//!
pub mod bus;
pub mod handler;
pub mod observer;
pub mod resolver;
pub mod subscription;

pub use bus::{EventBus, SPAN_ID_HEADER};
pub use handler::{DelegateEventHandler, DynEventHandler, EventHandler, TypedEventHandler};
pub use observer::{
    DispatchObserver, DispatchReport, HandlerFailure, HandlerOutcome, HandlerReport,
    TracingDispatchObserver,
};
pub use resolver::{HandlerResolver, InMemoryHandlerResolver};
pub use subscription::{
    HandlerRegistration, HandlerType, InMemorySubscriptionManager, SubscriptionManager,
};
