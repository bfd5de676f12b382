//! 进程内事件总线（EventBus）
//!
//! 统一编排“查找订阅 → 解析处理器 → 并发处理 → 上报结果”：
//! - `publish` 不等待处理器完成，仅表示事件已被接受分发；
//! - 每个处理器的解析/执行失败互相隔离，只流向 `DispatchObserver`；
//! - 所有处理任务都被跟踪，`wait_idle` 可等待其全部结束（用于优雅关闭与测试）。
//!
use super::handler::{DynEventHandler, EventHandler};
use super::observer::{
    DispatchObserver, DispatchReport, HandlerFailure, HandlerOutcome, HandlerReport,
    TracingDispatchObserver,
};
use super::resolver::{HandlerResolver, InMemoryHandlerResolver};
use super::subscription::{
    HandlerRegistration, HandlerType, InMemorySubscriptionManager, SubscriptionManager,
};
use crate::error::MessagingError;
use crate::event::{Event, EventProperties};
use bon::Builder;
use futures_util::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinSet;
use tokio_util::task::TaskTracker;

/// 发布时记录当前 span ID 的头名称
pub const SPAN_ID_HEADER: &str = "span_id";

/// EventBus：
/// - 订阅关系由 `SubscriptionManager` 维护
/// - 处理器实例优先取自总线内登记的实例，其次交给外部 `HandlerResolver`
/// - 处理结果交给 `DispatchObserver`
#[derive(Builder)]
pub struct EventBus {
    #[builder(default = Arc::new(InMemorySubscriptionManager::new()))]
    subscriptions: Arc<dyn SubscriptionManager>,
    #[builder(default = Arc::new(InMemoryHandlerResolver::new()))]
    resolver: Arc<dyn HandlerResolver>,
    #[builder(default = Arc::new(TracingDispatchObserver))]
    observer: Arc<dyn DispatchObserver>,
    #[builder(skip = Arc::new(InMemoryHandlerResolver::new()))]
    instances: Arc<InMemoryHandlerResolver>,
    #[builder(skip = TaskTracker::new())]
    tracker: TaskTracker,
    #[builder(skip = AsyncMutex::new(()))]
    idle_gate: AsyncMutex<()>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// 发布事件
    ///
    /// 无订阅时返回 `false` 且不触发任何解析；否则为每个处理器派生一个任务并立即返回 `true`。
    /// 返回 `true` 仅代表事件已被接受分发，不代表任何处理器执行成功。
    ///
    /// 当前线程没有 Tokio 运行时时不会执行处理器，每个处理器以 `RuntimeUnavailable`
    /// 失败上报给观察者。
    ///
    /// 当前 `tracing` span 的ID会写入 `span_id` 头，仅用于进程内日志关联；
    /// `trace_id` 保留给调用方传入的链路追踪ID。
    pub fn publish<E: Event>(&self, event: E, properties: Option<EventProperties>) -> bool {
        let event_type = event.event_type();
        let handler_types = self.subscriptions.handler_types(event_type);
        if handler_types.is_empty() {
            tracing::trace!(event_type, "no handlers subscribed");
            return false;
        }

        let mut properties = properties.unwrap_or_default().normalized();
        if properties.event_type().is_none() {
            properties.set_event_type(event_type);
        }
        if properties.header(SPAN_ID_HEADER).is_none() {
            if let Some(span_id) = tracing::Span::current().id() {
                properties.insert_header(SPAN_ID_HEADER, format!("{:016x}", span_id.into_u64()));
            }
        }

        let dispatch = Dispatch {
            event_type,
            event: Arc::new(event),
            properties: Arc::new(properties),
            instances: self.instances.clone(),
            resolver: self.resolver.clone(),
            observer: self.observer.clone(),
        };
        let handler_types: Vec<_> = handler_types.into_iter().collect();
        match Handle::try_current() {
            Ok(runtime) => {
                self.tracker.spawn_on(dispatch.run(handler_types), &runtime);
            }
            Err(_) => dispatch.reject(handler_types),
        }
        true
    }

    /// 订阅：事件类型 E 由处理器类型 H 处理，处理器实例由解析器提供
    pub fn subscribe<E, H>(&self) -> bool
    where
        E: Event,
        H: EventHandler<E>,
    {
        self.subscriptions
            .subscribe(E::EVENT_TYPE, HandlerType::of::<H>())
    }

    /// 订阅：直接登记处理器实例
    pub fn subscribe_handler<E, H>(&self, handler: Arc<H>) -> bool
    where
        E: Event,
        H: EventHandler<E>,
    {
        let handler_type = self.instances.register_singleton::<E, H>(handler);
        self.subscriptions.subscribe(E::EVENT_TYPE, handler_type)
    }

    /// 退订；同时移除总线内登记的实例
    pub fn unsubscribe<E, H>(&self) -> bool
    where
        E: Event,
        H: EventHandler<E>,
    {
        self.unsubscribe_type(E::EVENT_TYPE, &HandlerType::of::<H>())
    }

    /// 以字符串标识订阅（处理器由外部容器管理时使用）
    pub fn subscribe_type(&self, event_type: &str, handler_type: HandlerType) -> bool {
        self.subscriptions.subscribe(event_type, handler_type)
    }

    pub fn unsubscribe_type(&self, event_type: &str, handler_type: &HandlerType) -> bool {
        let removed = self.subscriptions.unsubscribe(event_type, handler_type);
        self.instances.deregister(&HandlerRegistration::new(
            event_type.to_string(),
            handler_type.clone(),
        ));
        removed
    }

    pub fn handler_types(&self, event_type: &str) -> Vec<HandlerType> {
        let mut types: Vec<_> = self.subscriptions.handler_types(event_type).into_iter().collect();
        types.sort();
        types
    }

    /// 尚未结束的分发任务数
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// 等待当前所有分发任务结束
    ///
    /// 并发调用按顺序排队，每个调用方都会等到调用时刻之前发起的分发结束。
    pub async fn wait_idle(&self) {
        let _gate = self.idle_gate.lock().await;
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }
}

/// 一次发布的分发上下文
struct Dispatch {
    event_type: &'static str,
    event: Arc<dyn Any + Send + Sync>,
    properties: Arc<EventProperties>,
    instances: Arc<InMemoryHandlerResolver>,
    resolver: Arc<dyn HandlerResolver>,
    observer: Arc<dyn DispatchObserver>,
}

impl Dispatch {
    async fn run(self, handler_types: Vec<HandlerType>) {
        let mut tasks = JoinSet::new();

        for handler_type in handler_types {
            let registration = HandlerRegistration::new(self.event_type, handler_type);
            let event = self.event.clone();
            let properties = self.properties.clone();
            let handler = self.resolve(&registration);

            tasks.spawn(async move {
                let started = Instant::now();
                let outcome = match handler {
                    Ok(handler) => invoke(&*handler, &registration, &*event, &properties).await,
                    Err(err) => HandlerOutcome::Failed(err),
                };
                HandlerReport {
                    handler_type: registration.handler_type().clone(),
                    outcome,
                    elapsed: started.elapsed(),
                }
            });
        }

        let mut report = DispatchReport {
            event_type: self.event_type.to_string(),
            event_id: self.properties.event_id().to_string(),
            handlers: Vec::with_capacity(tasks.len()),
        };
        // 失败随完成即时上报，不等待其他处理器
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(handler_report) => {
                    if let Some(error) = handler_report.outcome.error() {
                        self.observer.on_handler_failed(HandlerFailure {
                            event_type: &report.event_type,
                            event_id: &report.event_id,
                            handler_type: &handler_report.handler_type,
                            error,
                        });
                    }
                    report.handlers.push(handler_report);
                }
                // 仅在运行时关闭时发生，此时已无观察意义
                Err(err) => tracing::warn!(error = %err, "dispatch task aborted"),
            }
        }

        self.observer.on_dispatch_completed(&report);
    }

    /// 没有运行时可用：所有处理器直接判定失败
    fn reject(self, handler_types: Vec<HandlerType>) {
        let report = DispatchReport {
            event_type: self.event_type.to_string(),
            event_id: self.properties.event_id().to_string(),
            handlers: handler_types
                .into_iter()
                .map(|handler_type| HandlerReport {
                    outcome: HandlerOutcome::Failed(MessagingError::RuntimeUnavailable {
                        handler: handler_type.to_string(),
                    }),
                    handler_type,
                    elapsed: Duration::ZERO,
                })
                .collect(),
        };
        for failure in report.failures() {
            self.observer.on_handler_failed(failure);
        }
        self.observer.on_dispatch_completed(&report);
    }

    fn resolve(
        &self,
        registration: &HandlerRegistration,
    ) -> Result<Arc<dyn DynEventHandler>, MessagingError> {
        match self.instances.try_resolve(registration) {
            Some(handler) => Ok(handler),
            None => std::panic::catch_unwind(AssertUnwindSafe(|| self.resolver.resolve(registration)))
                .unwrap_or_else(|panic| {
                    Err(MessagingError::HandlerPanicked {
                        handler: registration.handler_type().to_string(),
                        reason: panic_reason(panic),
                    })
                }),
        }
    }
}

async fn invoke(
    handler: &dyn DynEventHandler,
    registration: &HandlerRegistration,
    event: &(dyn Any + Send + Sync),
    properties: &EventProperties,
) -> HandlerOutcome {
    let handler_name = registration.handler_type().as_str();
    match AssertUnwindSafe(handler.handle_dyn(event, properties))
        .catch_unwind()
        .await
    {
        Ok(Ok(())) => HandlerOutcome::Succeeded,
        Ok(Err(err)) => HandlerOutcome::Failed(MessagingError::event_handler(handler_name, &err)),
        Err(panic) => HandlerOutcome::Failed(MessagingError::HandlerPanicked {
            handler: handler_name.to_string(),
            reason: panic_reason(panic),
        }),
    }
}

fn panic_reason(panic: Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
