//! 订阅表（SubscriptionManager）
//!
//! 维护「事件类型 → 处理器类型集合」的映射，支持并发、幂等的订阅与退订。
//!
use dashmap::{DashMap, DashSet};
use std::any::type_name;
use std::borrow::Cow;
use std::collections::HashSet;
use std::fmt;

/// 处理器类型标识（默认取处理器的类型名）
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerType(Cow<'static, str>);

impl HandlerType {
    /// 以处理器的 Rust 类型名作为标识
    pub fn of<H: ?Sized>() -> Self {
        Self(Cow::Borrowed(type_name::<H>()))
    }

    /// 自定义名称（例如由外部容器管理的处理器）
    pub fn named(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HandlerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 一条订阅关系：(事件类型, 处理器类型)
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct HandlerRegistration {
    event_type: Cow<'static, str>,
    handler_type: HandlerType,
}

impl HandlerRegistration {
    pub fn new(event_type: impl Into<Cow<'static, str>>, handler_type: HandlerType) -> Self {
        Self {
            event_type: event_type.into(),
            handler_type,
        }
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn handler_type(&self) -> &HandlerType {
        &self.handler_type
    }
}

/// 订阅管理：事件类型与处理器类型的多对多关系
pub trait SubscriptionManager: Send + Sync {
    /// 添加订阅；已存在时返回 `false`
    fn subscribe(&self, event_type: &str, handler_type: HandlerType) -> bool;

    /// 移除订阅；订阅不存在或事件类型未知时返回 `false`
    fn unsubscribe(&self, event_type: &str, handler_type: &HandlerType) -> bool;

    /// 获取某事件类型的处理器类型集合，无订阅时返回空集合
    fn handler_types(&self, event_type: &str) -> HashSet<HandlerType>;
}

/// 基于 DashMap 的内存订阅表
#[derive(Default)]
pub struct InMemorySubscriptionManager {
    handlers: DashMap<String, DashSet<HandlerType>>,
}

impl InMemorySubscriptionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前存在订阅的事件类型
    pub fn event_types(&self) -> Vec<String> {
        self.handlers.iter().map(|e| e.key().clone()).collect()
    }
}

impl SubscriptionManager for InMemorySubscriptionManager {
    fn subscribe(&self, event_type: &str, handler_type: HandlerType) -> bool {
        self.handlers
            .entry(event_type.to_string())
            .or_default()
            .insert(handler_type)
    }

    fn unsubscribe(&self, event_type: &str, handler_type: &HandlerType) -> bool {
        let removed = match self.handlers.get(event_type) {
            Some(set) => set.remove(handler_type).is_some(),
            None => return false,
        };

        // 集合清空后回收事件类型键；判空与删除在同一分片锁内完成
        if removed {
            self.handlers.remove_if(event_type, |_, set| set.is_empty());
        }
        removed
    }

    fn handler_types(&self, event_type: &str) -> HashSet<HandlerType> {
        self.handlers
            .get(event_type)
            .map(|set| set.iter().map(|h| h.key().clone()).collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::task::JoinSet;

    struct AuditHandler;
    struct MailHandler;

    #[test]
    fn subscribe_is_idempotent() {
        let subs = InMemorySubscriptionManager::new();
        assert!(subs.subscribe("order.created", HandlerType::of::<AuditHandler>()));
        assert!(!subs.subscribe("order.created", HandlerType::of::<AuditHandler>()));

        let handlers = subs.handler_types("order.created");
        assert_eq!(handlers.len(), 1);
        assert!(handlers.contains(&HandlerType::of::<AuditHandler>()));
    }

    #[test]
    fn unsubscribe_removes_only_the_given_handler() {
        let subs = InMemorySubscriptionManager::new();
        subs.subscribe("order.created", HandlerType::of::<AuditHandler>());
        subs.subscribe("order.created", HandlerType::of::<MailHandler>());

        assert!(subs.unsubscribe("order.created", &HandlerType::of::<AuditHandler>()));
        let handlers = subs.handler_types("order.created");
        assert!(!handlers.contains(&HandlerType::of::<AuditHandler>()));
        assert!(handlers.contains(&HandlerType::of::<MailHandler>()));
    }

    #[test]
    fn unknown_subscriptions_are_not_errors() {
        let subs = InMemorySubscriptionManager::new();
        assert!(subs.handler_types("nope").is_empty());
        assert!(!subs.unsubscribe("nope", &HandlerType::of::<AuditHandler>()));

        subs.subscribe("order.created", HandlerType::of::<AuditHandler>());
        assert!(!subs.unsubscribe("order.created", &HandlerType::of::<MailHandler>()));
    }

    #[test]
    fn empty_event_types_are_reclaimed() {
        let subs = InMemorySubscriptionManager::new();
        subs.subscribe("order.created", HandlerType::named("audit"));
        subs.unsubscribe("order.created", &HandlerType::named("audit"));
        assert!(subs.event_types().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_subscribe_adds_each_pair_once() {
        let subs = Arc::new(InMemorySubscriptionManager::new());
        let mut set = JoinSet::new();
        for i in 0..64 {
            let subs = subs.clone();
            set.spawn(async move { subs.subscribe("tick", HandlerType::named(format!("h{}", i % 8))) });
        }

        let mut added = 0;
        while let Some(res) = set.join_next().await {
            if res.unwrap() {
                added += 1;
            }
        }
        assert_eq!(added, 8);
        assert_eq!(subs.handler_types("tick").len(), 8);
    }
}
