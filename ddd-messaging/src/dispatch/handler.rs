//! 事件处理器（EventHandler）
//!
//! `EventHandler<E>` 为强类型处理契约；`DynEventHandler` 为分发器使用的类型擦除形态，
//! 二者通过 `TypedEventHandler` 适配。
//!
use crate::error::MessagingError;
use crate::event::{Event, EventProperties};
use async_trait::async_trait;
use std::any::{Any, type_name};
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

/// 事件处理器：处理某一类型的事件
#[async_trait]
pub trait EventHandler<E: Event>: Send + Sync + 'static {
    /// 处理事件
    async fn handle(&self, event: &E, properties: &EventProperties) -> anyhow::Result<()>;
}

/// 类型擦除后的事件处理器
#[async_trait]
pub trait DynEventHandler: Send + Sync {
    async fn handle_dyn(
        &self,
        event: &(dyn Any + Send + Sync),
        properties: &EventProperties,
    ) -> anyhow::Result<()>;
}

/// 将 `EventHandler<E>` 适配为 `DynEventHandler`
pub struct TypedEventHandler<E, H> {
    inner: Arc<H>,
    _event: PhantomData<fn(E)>,
}

impl<E, H> TypedEventHandler<E, H>
where
    E: Event,
    H: EventHandler<E>,
{
    pub fn new(inner: Arc<H>) -> Self {
        Self {
            inner,
            _event: PhantomData,
        }
    }

    /// 直接得到可交给分发器的处理器对象
    pub fn boxed(inner: Arc<H>) -> Arc<dyn DynEventHandler> {
        Arc::new(Self::new(inner))
    }
}

#[async_trait]
impl<E, H> DynEventHandler for TypedEventHandler<E, H>
where
    E: Event,
    H: EventHandler<E>,
{
    async fn handle_dyn(
        &self,
        event: &(dyn Any + Send + Sync),
        properties: &EventProperties,
    ) -> anyhow::Result<()> {
        // 订阅键与适配器同为 E::EVENT_TYPE，正常情况下不会失败
        let Some(event) = event.downcast_ref::<E>() else {
            return Err(MessagingError::TypeMismatch {
                expected: type_name::<E>().to_string(),
                found: "unknown".to_string(),
            }
            .into());
        };
        self.inner.handle(event, properties).await
    }
}

/// 以闭包形式提供的事件处理器
///
/// ```rust
/// use ddd_messaging::dispatch::DelegateEventHandler;
/// use ddd_messaging::event::{Event, EventProperties};
///
/// #[derive(Clone)]
/// struct Ping;
/// impl Event for Ping {
///     const EVENT_TYPE: &'static str = "ping";
/// }
///
/// let handler = DelegateEventHandler::new(|_ping: Ping, props: EventProperties| async move {
///     let _ = props.event_id();
///     anyhow::Ok(())
/// });
/// # let _ = handler;
/// ```
pub struct DelegateEventHandler<E, F> {
    func: F,
    _event: PhantomData<fn(E)>,
}

impl<E, F, Fut> DelegateEventHandler<E, F>
where
    E: Event + Clone,
    F: Fn(E, EventProperties) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    pub fn new(func: F) -> Self {
        Self {
            func,
            _event: PhantomData,
        }
    }
}

#[async_trait]
impl<E, F, Fut> EventHandler<E> for DelegateEventHandler<E, F>
where
    E: Event + Clone,
    F: Fn(E, EventProperties) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(&self, event: &E, properties: &EventProperties) -> anyhow::Result<()> {
        (self.func)(event.clone(), properties.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone, Debug)]
    struct Deposited {
        amount: i64,
    }
    impl Event for Deposited {
        const EVENT_TYPE: &'static str = "account.deposited";
    }

    struct Withdrawn;
    impl Event for Withdrawn {
        const EVENT_TYPE: &'static str = "account.withdrawn";
    }

    #[tokio::test]
    async fn typed_adapter_downcasts_and_forwards() {
        let total = Arc::new(AtomicUsize::new(0));
        let t = total.clone();
        let delegate = DelegateEventHandler::new(move |ev: Deposited, _props: EventProperties| {
            let t = t.clone();
            async move {
                t.fetch_add(ev.amount as usize, Ordering::SeqCst);
                anyhow::Ok(())
            }
        });

        let dyn_handler = TypedEventHandler::boxed(Arc::new(delegate));
        let props = EventProperties::new();
        dyn_handler
            .handle_dyn(&Deposited { amount: 7 }, &props)
            .await
            .unwrap();
        assert_eq!(total.load(Ordering::SeqCst), 7);
    }

    #[tokio::test]
    async fn typed_adapter_rejects_foreign_events() {
        let delegate = DelegateEventHandler::new(|_ev: Deposited, _props: EventProperties| async {
            anyhow::Ok(())
        });
        let dyn_handler = TypedEventHandler::boxed(Arc::new(delegate));

        let err = dyn_handler
            .handle_dyn(&Withdrawn, &EventProperties::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<MessagingError>(),
            Some(MessagingError::TypeMismatch { .. })
        ));
    }
}
