//! 单请求上下文：需求字段、工具计划、重试预算、调用结果
//!
//! RequestContext 在 Init 创建、Done 后丢弃，仅由编排器变更；
//! advance 按显式转移表推进 Phase，非法事件返回 InvalidTransition。

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::core::error::AgentError;
use crate::core::state::{transition, Event, Phase};
use crate::tools::ToolInvocation;

/// 从用户输入中抽取出的出行需求字段；缺失字段为 None
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Requirements {
    pub destination: Option<String>,
    pub dates: Option<String>,
    pub card: Option<String>,
}

impl Requirements {
    /// 目的地是规划的最低要求；缺了它只能向用户澄清
    pub fn sufficient(&self) -> bool {
        self.destination.is_some()
    }

    /// 用另一份抽取结果补全缺失字段（用于澄清回复与历史回忆合并）
    pub fn merge(&mut self, other: &Requirements) {
        if self.destination.is_none() {
            self.destination = other.destination.clone();
        }
        if self.dates.is_none() {
            self.dates = other.dates.clone();
        }
        if self.card.is_none() {
            self.card = other.card.clone();
        }
    }
}

/// 重试预算：全局计数 + 每工具计数，上限来自配置
#[derive(Debug, Clone)]
pub struct RetryBudget {
    max_retries: u32,
    global_used: u32,
    per_tool_used: HashMap<String, u32>,
}

impl RetryBudget {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            global_used: 0,
            per_tool_used: HashMap::new(),
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn global_used(&self) -> u32 {
        self.global_used
    }

    pub fn tool_used(&self, tool: &str) -> u32 {
        self.per_tool_used.get(tool).copied().unwrap_or(0)
    }

    /// 全局与指定工具的计数都未达上限时才允许再来一轮
    pub fn can_retry(&self, tool: &str) -> bool {
        self.global_used < self.max_retries && self.tool_used(tool) < self.max_retries
    }

    /// 记一次重试；计数永不越过上限（越过即是编排器的 bug）
    pub fn consume(&mut self, tool: &str) {
        debug_assert!(self.can_retry(tool));
        self.global_used += 1;
        *self.per_tool_used.entry(tool.to_string()).or_insert(0) += 1;
    }
}

/// 单请求的可变记录：当前阶段与沿途积累的一切
#[derive(Debug)]
pub struct RequestContext {
    pub session_id: String,
    phase: Phase,
    pub requirements: Requirements,
    /// 已选定的工具计划（工具名 + 参数），PlanTools 阶段产出
    pub plan: Vec<(String, serde_json::Value)>,
    pub invocations: Vec<ToolInvocation>,
    pub retry_budget: RetryBudget,
    pub validation_errors: Vec<String>,
    /// 待用户回答的澄清问题（AwaitingClarification 时为 Some）
    pub clarification: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl RequestContext {
    pub fn new(session_id: impl Into<String>, max_retries: u32) -> Self {
        Self {
            session_id: session_id.into(),
            phase: Phase::Init,
            requirements: Requirements::default(),
            plan: Vec::new(),
            invocations: Vec::new(),
            retry_budget: RetryBudget::new(max_retries),
            validation_errors: Vec::new(),
            clarification: None,
            created_at: Utc::now(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// 按转移表推进阶段；无对应边即编程契约违规
    pub fn advance(&mut self, event: Event) -> Result<Phase, AgentError> {
        match transition(self.phase, event) {
            Some(next) => {
                tracing::debug!(from = ?self.phase, ?event, to = ?next, "phase transition");
                self.phase = next;
                Ok(next)
            }
            None => Err(AgentError::InvalidTransition {
                phase: self.phase,
                event,
            }),
        }
    }

    /// 成功调用的 (工具名, 结果) 视图，供校验与合成使用
    pub fn succeeded_results(&self) -> Vec<(&str, &serde_json::Value)> {
        self.invocations
            .iter()
            .filter(|inv| inv.is_succeeded())
            .filter_map(|inv| inv.result.as_ref().map(|r| (inv.tool.as_str(), r)))
            .collect()
    }

    /// 失败调用列表（Failed 或 TimedOut）
    pub fn failed_invocations(&self) -> Vec<&ToolInvocation> {
        self.invocations.iter().filter(|inv| inv.is_failed()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requirements_sufficiency() {
        let mut req = Requirements::default();
        assert!(!req.sufficient());
        req.destination = Some("Paris".to_string());
        assert!(req.sufficient());
    }

    #[test]
    fn test_requirements_merge_keeps_existing() {
        let mut a = Requirements {
            destination: Some("Tokyo".to_string()),
            dates: None,
            card: None,
        };
        let b = Requirements {
            destination: Some("Paris".to_string()),
            dates: Some("2026-06-01 to 2026-06-08".to_string()),
            card: Some("BankGold".to_string()),
        };
        a.merge(&b);
        assert_eq!(a.destination.as_deref(), Some("Tokyo"));
        assert_eq!(a.dates.as_deref(), Some("2026-06-01 to 2026-06-08"));
        assert_eq!(a.card.as_deref(), Some("BankGold"));
    }

    #[test]
    fn test_retry_budget_limits() {
        let mut budget = RetryBudget::new(2);
        assert!(budget.can_retry("weather"));
        budget.consume("weather");
        budget.consume("weather");
        assert!(!budget.can_retry("weather"));
        // 全局计数已满，其他工具同样不可重试
        assert!(!budget.can_retry("fx"));
        assert_eq!(budget.global_used(), 2);
    }

    #[test]
    fn test_advance_rejects_undefined_edge() {
        let mut ctx = RequestContext::new("s1", 3);
        let err = ctx.advance(Event::PlanProduced).unwrap_err();
        assert!(matches!(err, AgentError::InvalidTransition { .. }));
        // 失败的 advance 不应改变阶段
        assert_eq!(ctx.phase(), Phase::Init);
    }

    #[test]
    fn test_advance_happy_path() {
        let mut ctx = RequestContext::new("s1", 3);
        ctx.advance(Event::RequirementsExtracted).unwrap();
        ctx.advance(Event::RequirementsSufficient).unwrap();
        ctx.advance(Event::PlanProduced).unwrap();
        ctx.advance(Event::ToolsSucceeded).unwrap();
        ctx.advance(Event::ValidationPassed).unwrap();
        ctx.advance(Event::PlanGenerated).unwrap();
        assert!(ctx.phase().is_terminal());
    }
}
