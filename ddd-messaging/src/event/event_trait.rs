/// 事件载荷需要满足的能力边界
///
/// 事件类型标识由事件自身声明（而非运行时反射），订阅表以其为键。
pub trait Event: Send + Sync + 'static {
    /// 事件类型（形如 `order.created` 或自定义类型名），需在进程内保持唯一
    const EVENT_TYPE: &'static str;

    /// 实例级的事件类型，默认与 `EVENT_TYPE` 一致
    fn event_type(&self) -> &'static str {
        Self::EVENT_TYPE
    }
}
