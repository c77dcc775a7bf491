//! Agent 错误类型与失败分级
//!
//! 与编排器配合：Transient 失败在预算内重试，Permanent 直接升级；
//! InvalidTransition 属于编程契约违规，任何策略都不捕获它。

use thiserror::Error;

use crate::core::state::{Event, Phase};

/// 工具失败分级：Transient 可重试（超时、限流等），Permanent 不可（参数非法等）
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum FailureKind {
    Transient,
    Permanent,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::Transient => write!(f, "transient"),
            FailureKind::Permanent => write!(f, "permanent"),
        }
    }
}

/// 单次工具调用的失败：分级 + 描述
#[derive(Debug, Clone, Error)]
#[error("{kind} failure: {message}")]
pub struct ToolFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl ToolFailure {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Transient,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Permanent,
            message: message.into(),
        }
    }
}

/// Agent 运行过程中可能出现的错误（状态机、工具、校验、记忆后端等）
#[derive(Error, Debug)]
pub enum AgentError {
    /// 状态机契约违规：当前 Phase 没有该事件的出边。正确用法下不应出现
    #[error("invalid transition: no edge from {phase:?} on {event:?}")]
    InvalidTransition { phase: Phase, event: Event },

    #[error("tool '{tool}' failed ({kind}): {message}")]
    ToolFailure {
        tool: String,
        kind: FailureKind,
        message: String,
    },

    #[error("validation failed: {0}")]
    ValidationFailure(String),

    #[error("retry budget exhausted")]
    RetryBudgetExhausted,

    /// 记忆/嵌入后端不可用：检索降级为空结果，不中断整个请求
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("memory item not found: {0}")]
    MemoryNotFound(uuid::Uuid),

    /// 请求级整体超时（单次调用超时作为 Transient 归入 ToolFailure）
    #[error("request deadline exceeded")]
    Timeout,

    #[error("request cancelled")]
    Cancelled,

    #[error("LLM error: {0}")]
    LlmError(String),

    #[error("config error: {0}")]
    ConfigError(String),
}
