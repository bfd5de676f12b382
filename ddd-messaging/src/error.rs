//! 消息核心统一错误定义
//!
//! 覆盖处理器解析/执行、类型还原、序列化与参数校验等最小必要集合。
//! 注意：分发边界上的处理器错误只会流向遥测观察者，不会返回给发布方。
//!
use thiserror::Error;

/// 统一错误类型
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum MessagingError {
    // --- 序列化 ---
    #[error("serialization error: {source}")]
    Serde {
        #[from]
        source: serde_json::Error,
    },
    #[error("type mismatch: expected={expected}, found={found}")]
    TypeMismatch { expected: String, found: String },

    // --- 处理器 ---
    #[error("handler not registered: {handler_type}")]
    HandlerNotRegistered { handler_type: String },
    #[error("event handler error: handler={handler}, reason={reason}")]
    EventHandler { handler: String, reason: String },
    #[error("event handler panicked: handler={handler}, reason={reason}")]
    HandlerPanicked { handler: String, reason: String },
    #[error("no tokio runtime available to run handler: {handler}")]
    RuntimeUnavailable { handler: String },

    // --- 队列/流 ---
    #[error("invalid argument: {reason}")]
    InvalidArgument { reason: String },
}

impl MessagingError {
    pub fn handler_not_registered(handler_type: impl Into<String>) -> Self {
        MessagingError::HandlerNotRegistered {
            handler_type: handler_type.into(),
        }
    }

    pub fn event_handler(handler: impl Into<String>, err: &anyhow::Error) -> Self {
        MessagingError::EventHandler {
            handler: handler.into(),
            reason: format!("{err:#}"),
        }
    }

    pub fn invalid_argument(reason: impl Into<String>) -> Self {
        MessagingError::InvalidArgument {
            reason: reason.into(),
        }
    }
}

/// 统一 Result 类型别名
pub type MessagingResult<T> = Result<T, MessagingError>;
