//! 工具箱：Tool trait、调用记录与并发协调器
//!
//! 所有工具实现 Tool trait（name / description / invoke），失败必须分级为
//! Transient / Permanent，由各适配器负责翻译自家 API 的传输错误。

pub mod card;
pub mod coordinator;
pub mod fx;
pub mod registry;
pub mod search;
pub mod translation;
pub mod weather;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

pub use crate::core::error::{FailureKind, ToolFailure};
pub use card::CardTool;
pub use coordinator::{CoordinatorConfig, ToolCoordinator};
pub use fx::FxTool;
pub use registry::ToolRegistry;
pub use search::SearchTool;
pub use translation::TranslationTool;
pub use weather::WeatherTool;

/// 工具 trait：名称、描述、异步执行（args 与结果都是 JSON）
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    async fn invoke(&self, args: Value) -> Result<Value, ToolFailure>;
}

/// 调用状态；离开 Pending 即为终态
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum InvocationStatus {
    Pending,
    Succeeded,
    Failed(FailureKind),
    TimedOut,
}

/// 一次工具调用：由协调器派发，终态后不再变化（重试前显式重置）
#[derive(Debug, Clone, serde::Serialize)]
pub struct ToolInvocation {
    pub id: Uuid,
    pub tool: String,
    pub args: Value,
    pub status: InvocationStatus,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
}

impl ToolInvocation {
    pub fn new(tool: impl Into<String>, args: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            tool: tool.into(),
            args,
            status: InvocationStatus::Pending,
            result: None,
            error: None,
            attempts: 0,
            created_at: Utc::now(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status != InvocationStatus::Pending
    }

    pub fn is_succeeded(&self) -> bool {
        self.status == InvocationStatus::Succeeded
    }

    pub fn is_failed(&self) -> bool {
        matches!(
            self.status,
            InvocationStatus::Failed(_) | InvocationStatus::TimedOut
        )
    }

    /// 失败分级；TimedOut 视为 Transient
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self.status {
            InvocationStatus::Failed(kind) => Some(kind),
            InvocationStatus::TimedOut => Some(FailureKind::Transient),
            _ => None,
        }
    }

    pub fn mark_succeeded(&mut self, result: Value) {
        self.status = InvocationStatus::Succeeded;
        self.result = Some(result);
        self.error = None;
    }

    pub fn mark_failed(&mut self, failure: &ToolFailure) {
        self.status = InvocationStatus::Failed(failure.kind);
        self.result = None;
        self.error = Some(failure.message.clone());
    }

    pub fn mark_timed_out(&mut self) {
        self.status = InvocationStatus::TimedOut;
        self.result = None;
        self.error = Some("invocation timed out".to_string());
    }

    /// 重新派发前重置为 Pending 并累加尝试次数
    pub fn reset_for_retry(&mut self) {
        self.status = InvocationStatus::Pending;
        self.error = None;
        self.attempts += 1;
    }
}

/// 将 reqwest 错误翻译为失败分级：超时/连接/5xx/429 可重试，其余 4xx 不可
pub(crate) fn classify_http_error(err: &reqwest::Error) -> ToolFailure {
    if err.is_timeout() || err.is_connect() {
        return ToolFailure::transient(err.to_string());
    }
    if let Some(status) = err.status() {
        if status.is_server_error() || status.as_u16() == 429 {
            return ToolFailure::transient(format!("HTTP {}", status));
        }
        return ToolFailure::permanent(format!("HTTP {}", status));
    }
    ToolFailure::transient(err.to_string())
}

/// 校验 HTTP 状态码（用于 error_for_status 不便使用的场合）
pub(crate) fn classify_status(status: reqwest::StatusCode) -> Option<ToolFailure> {
    if status.is_success() {
        return None;
    }
    if status.is_server_error() || status.as_u16() == 429 {
        Some(ToolFailure::transient(format!("HTTP {}", status)))
    } else {
        Some(ToolFailure::permanent(format!("HTTP {}", status)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invocation_lifecycle() {
        let mut inv = ToolInvocation::new("weather", serde_json::json!({"destination": "Paris"}));
        assert!(!inv.is_terminal());
        assert_eq!(inv.attempts, 0);

        inv.mark_failed(&ToolFailure::transient("rate limited"));
        assert!(inv.is_terminal());
        assert!(inv.is_failed());
        assert_eq!(inv.failure_kind(), Some(FailureKind::Transient));

        inv.reset_for_retry();
        assert!(!inv.is_terminal());
        assert_eq!(inv.attempts, 1);

        inv.mark_succeeded(serde_json::json!({"ok": true}));
        assert!(inv.is_succeeded());
        assert!(inv.error.is_none());
    }

    #[test]
    fn test_timed_out_counts_as_transient() {
        let mut inv = ToolInvocation::new("search", serde_json::json!({}));
        inv.mark_timed_out();
        assert!(inv.is_failed());
        assert_eq!(inv.failure_kind(), Some(FailureKind::Transient));
    }
}
