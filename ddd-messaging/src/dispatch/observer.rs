//! 分发观察者（DispatchObserver）
//!
//! 分发边界上被吞掉的处理器失败只会出现在这里：每个处理器的执行结果收集为
//! `HandlerReport`，汇总为 `DispatchReport` 交给观察者，不回传给发布方。
//!
use super::subscription::HandlerType;
use crate::error::MessagingError;
use std::time::Duration;

/// 单个处理器的执行结果
#[derive(Debug)]
pub enum HandlerOutcome {
    Succeeded,
    Failed(MessagingError),
}

impl HandlerOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, HandlerOutcome::Succeeded)
    }

    pub fn error(&self) -> Option<&MessagingError> {
        match self {
            HandlerOutcome::Succeeded => None,
            HandlerOutcome::Failed(err) => Some(err),
        }
    }
}

#[derive(Debug)]
pub struct HandlerReport {
    pub handler_type: HandlerType,
    pub outcome: HandlerOutcome,
    pub elapsed: Duration,
}

/// 一次发布的汇总结果
#[derive(Debug)]
pub struct DispatchReport {
    pub event_type: String,
    pub event_id: String,
    pub handlers: Vec<HandlerReport>,
}

impl DispatchReport {
    pub fn succeeded(&self) -> usize {
        self.handlers.iter().filter(|h| h.outcome.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.handlers.len() - self.succeeded()
    }

    /// 失败明细
    pub fn failures(&self) -> impl Iterator<Item = HandlerFailure<'_>> + '_ {
        self.handlers.iter().filter_map(move |h| {
            h.outcome.error().map(|error| HandlerFailure {
                event_type: &self.event_type,
                event_id: &self.event_id,
                handler_type: &h.handler_type,
                error,
            })
        })
    }
}

/// 处理器失败：(错误, 事件类型, 处理器类型)
#[derive(Debug, Clone, Copy)]
pub struct HandlerFailure<'a> {
    pub event_type: &'a str,
    pub event_id: &'a str,
    pub handler_type: &'a HandlerType,
    pub error: &'a MessagingError,
}

/// 错误/遥测接收方
pub trait DispatchObserver: Send + Sync {
    /// 某个处理器解析或执行失败
    fn on_handler_failed(&self, failure: HandlerFailure<'_>);

    /// 一次发布的全部处理器均已结束
    fn on_dispatch_completed(&self, _report: &DispatchReport) {}
}

/// 默认观察者：将失败写入 tracing 日志
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingDispatchObserver;

impl DispatchObserver for TracingDispatchObserver {
    fn on_handler_failed(&self, failure: HandlerFailure<'_>) {
        tracing::error!(
            event_type = failure.event_type,
            event_id = failure.event_id,
            handler_type = %failure.handler_type,
            error = %failure.error,
            "handle event failed"
        );
    }

    fn on_dispatch_completed(&self, report: &DispatchReport) {
        tracing::debug!(
            event_type = %report.event_type,
            event_id = %report.event_id,
            succeeded = report.succeeded(),
            failed = report.failed(),
            "event dispatched"
        );
    }
}
