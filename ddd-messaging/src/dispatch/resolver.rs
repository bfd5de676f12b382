//! 处理器解析（HandlerResolver）
//!
//! 给定一条订阅关系，产出可执行的处理器实例。解析可能失败（处理器未注册），
//! 分发器会将失败隔离在单个处理器粒度。
//!
use super::handler::{DynEventHandler, EventHandler, TypedEventHandler};
use super::subscription::{HandlerRegistration, HandlerType};
use crate::error::{MessagingError, MessagingResult};
use crate::event::Event;
use dashmap::DashMap;
use std::sync::Arc;

/// 处理器解析器
pub trait HandlerResolver: Send + Sync {
    fn resolve(&self, registration: &HandlerRegistration)
    -> MessagingResult<Arc<dyn DynEventHandler>>;
}

impl<F> HandlerResolver for F
where
    F: Fn(&HandlerRegistration) -> MessagingResult<Arc<dyn DynEventHandler>> + Send + Sync,
{
    fn resolve(
        &self,
        registration: &HandlerRegistration,
    ) -> MessagingResult<Arc<dyn DynEventHandler>> {
        self(registration)
    }
}

type HandlerFactory = Arc<dyn Fn() -> Arc<dyn DynEventHandler> + Send + Sync>;

/// 基于内存的处理器解析器
/// - 单例：每次解析返回同一实例；
/// - 工厂：每次解析构造新实例。
#[derive(Default)]
pub struct InMemoryHandlerResolver {
    factories: DashMap<HandlerRegistration, HandlerFactory>,
}

impl InMemoryHandlerResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册单例处理器，返回其处理器类型标识
    pub fn register_singleton<E, H>(&self, handler: Arc<H>) -> HandlerType
    where
        E: Event,
        H: EventHandler<E>,
    {
        let handler_type = HandlerType::of::<H>();
        let instance = TypedEventHandler::<E, H>::boxed(handler);
        self.factories.insert(
            HandlerRegistration::new(E::EVENT_TYPE, handler_type.clone()),
            Arc::new(move || instance.clone()),
        );
        handler_type
    }

    /// 注册处理器工厂，每次解析时构造新实例
    pub fn register_factory<E, H, F>(&self, factory: F) -> HandlerType
    where
        E: Event,
        H: EventHandler<E>,
        F: Fn() -> H + Send + Sync + 'static,
    {
        let handler_type = HandlerType::of::<H>();
        self.factories.insert(
            HandlerRegistration::new(E::EVENT_TYPE, handler_type.clone()),
            Arc::new(move || TypedEventHandler::<E, H>::boxed(Arc::new(factory()))),
        );
        handler_type
    }

    /// 移除注册，返回是否存在
    pub fn deregister(&self, registration: &HandlerRegistration) -> bool {
        self.factories.remove(registration).is_some()
    }

    pub fn contains(&self, registration: &HandlerRegistration) -> bool {
        self.factories.contains_key(registration)
    }

    pub(crate) fn try_resolve(
        &self,
        registration: &HandlerRegistration,
    ) -> Option<Arc<dyn DynEventHandler>> {
        // 先克隆工厂再调用，避免在分片锁内执行用户代码
        let factory = self.factories.get(registration).map(|f| f.clone())?;
        Some(factory())
    }
}

impl HandlerResolver for InMemoryHandlerResolver {
    fn resolve(
        &self,
        registration: &HandlerRegistration,
    ) -> MessagingResult<Arc<dyn DynEventHandler>> {
        self.try_resolve(registration)
            .ok_or_else(|| MessagingError::handler_not_registered(registration.handler_type().as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventProperties;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Shipped;
    impl Event for Shipped {
        const EVENT_TYPE: &'static str = "order.shipped";
    }

    struct Notify {
        hits: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl EventHandler<Shipped> for Notify {
        async fn handle(&self, _event: &Shipped, _props: &EventProperties) -> anyhow::Result<()> {
            self.hits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn singleton_and_factory_resolution() {
        let resolver = InMemoryHandlerResolver::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let ht = resolver.register_singleton::<Shipped, _>(Arc::new(Notify { hits: hits.clone() }));
        assert_eq!(ht, HandlerType::of::<Notify>());

        let reg = HandlerRegistration::new(Shipped::EVENT_TYPE, ht);
        let a = resolver.resolve(&reg).unwrap();
        let b = resolver.resolve(&reg).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        a.handle_dyn(&Shipped, &EventProperties::new()).await.unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        let built = Arc::new(AtomicUsize::new(0));
        let resolver = InMemoryHandlerResolver::new();
        let counter = built.clone();
        let shared_hits = hits.clone();
        let ht = resolver.register_factory::<Shipped, _, _>(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Notify { hits: shared_hits.clone() }
        });
        let reg = HandlerRegistration::new(Shipped::EVENT_TYPE, ht);
        resolver.resolve(&reg).unwrap();
        resolver.resolve(&reg).unwrap();
        assert_eq!(built.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn unknown_handler_is_reported() {
        let resolver = InMemoryHandlerResolver::new();
        let reg = HandlerRegistration::new("order.shipped", HandlerType::named("ghost"));
        match resolver.resolve(&reg) {
            Err(MessagingError::HandlerNotRegistered { handler_type }) => {
                assert_eq!(handler_type, "ghost")
            }
            Err(other) => panic!("unexpected error: {other:?}"),
            Ok(_) => panic!("ghost handler should not resolve"),
        }
    }
}
