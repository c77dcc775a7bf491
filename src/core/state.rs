//! 请求生命周期状态机
//!
//! Phase 为请求在编排器中的离散阶段，Event 为驱动转移的输入事件；
//! transition 将全部合法边收敛为一张显式表，便于穷举测试。
//! 未定义的 (Phase, Event) 组合即 InvalidTransition，属编程错误而非运行时可恢复情况。

use serde::Serialize;

/// 请求生命周期阶段；每个在途请求恰有一个，归编排器独占
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Phase {
    Init,
    ClarifyRequirements,
    AwaitingClarification,
    PlanTools,
    ExecuteTools,
    HandlingToolError,
    RetryingTools,
    ValidatingResults,
    EscalatingError,
    Synthesize,
    Done,
}

impl Phase {
    /// 全部阶段，供穷举测试使用
    pub fn all() -> [Phase; 11] {
        [
            Phase::Init,
            Phase::ClarifyRequirements,
            Phase::AwaitingClarification,
            Phase::PlanTools,
            Phase::ExecuteTools,
            Phase::HandlingToolError,
            Phase::RetryingTools,
            Phase::ValidatingResults,
            Phase::EscalatingError,
            Phase::Synthesize,
            Phase::Done,
        ]
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Done)
    }
}

/// 驱动状态机转移的事件
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Event {
    /// 需求字段已从用户输入中抽取
    RequirementsExtracted,
    /// 需求充分，可进入工具规划
    RequirementsSufficient,
    /// 需求不足，需要向用户澄清
    RequirementsInsufficient,
    /// 收到用户的澄清回复
    UserReplied,
    /// 工具计划已产出（可为空）
    PlanProduced,
    /// 本批全部调用终态且全部成功
    ToolsSucceeded,
    /// 本批存在失败调用
    ToolsFailed,
    /// 重试预算尚有余量
    RetriesRemaining,
    /// 重试预算耗尽
    RetriesExhausted,
    /// 重新派发失败调用
    Redispatch,
    /// 结果校验通过
    ValidationPassed,
    /// 校验失败且预算有余
    ValidationFailedRetryable,
    /// 校验失败且预算耗尽
    ValidationFailedExhausted,
    /// 最终行程计划已生成
    PlanGenerated,
    /// 降级错误响应已构建
    ErrorResponseBuilt,
}

impl Event {
    /// 全部事件，供穷举测试使用
    pub fn all() -> [Event; 15] {
        [
            Event::RequirementsExtracted,
            Event::RequirementsSufficient,
            Event::RequirementsInsufficient,
            Event::UserReplied,
            Event::PlanProduced,
            Event::ToolsSucceeded,
            Event::ToolsFailed,
            Event::RetriesRemaining,
            Event::RetriesExhausted,
            Event::Redispatch,
            Event::ValidationPassed,
            Event::ValidationFailedRetryable,
            Event::ValidationFailedExhausted,
            Event::PlanGenerated,
            Event::ErrorResponseBuilt,
        ]
    }
}

/// 显式转移表：(当前阶段, 事件) -> 下一阶段；无对应边返回 None
///
/// 工具失败（HandlingToolError）与校验失败（ValidatingResults 的失败边）
/// 共享同一重试预算，且都汇入 EscalatingError，保证下游错误处理路径唯一。
pub fn transition(phase: Phase, event: Event) -> Option<Phase> {
    use Event::*;
    use Phase::*;

    match (phase, event) {
        (Init, RequirementsExtracted) => Some(ClarifyRequirements),
        (ClarifyRequirements, RequirementsSufficient) => Some(PlanTools),
        (ClarifyRequirements, RequirementsInsufficient) => Some(AwaitingClarification),
        (AwaitingClarification, UserReplied) => Some(ClarifyRequirements),
        (PlanTools, PlanProduced) => Some(ExecuteTools),
        (ExecuteTools, ToolsSucceeded) => Some(ValidatingResults),
        (ExecuteTools, ToolsFailed) => Some(HandlingToolError),
        (HandlingToolError, RetriesRemaining) => Some(RetryingTools),
        (HandlingToolError, RetriesExhausted) => Some(EscalatingError),
        (RetryingTools, Redispatch) => Some(ExecuteTools),
        (ValidatingResults, ValidationPassed) => Some(Synthesize),
        (ValidatingResults, ValidationFailedRetryable) => Some(RetryingTools),
        (ValidatingResults, ValidationFailedExhausted) => Some(EscalatingError),
        (Synthesize, PlanGenerated) => Some(Done),
        (EscalatingError, ErrorResponseBuilt) => Some(Done),
        // Done 为终态，无出边
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 表中定义的全部边
    fn defined_edges() -> Vec<(Phase, Event, Phase)> {
        use Event::*;
        use Phase::*;
        vec![
            (Init, RequirementsExtracted, ClarifyRequirements),
            (ClarifyRequirements, RequirementsSufficient, PlanTools),
            (ClarifyRequirements, RequirementsInsufficient, AwaitingClarification),
            (AwaitingClarification, UserReplied, ClarifyRequirements),
            (PlanTools, PlanProduced, ExecuteTools),
            (ExecuteTools, ToolsSucceeded, ValidatingResults),
            (ExecuteTools, ToolsFailed, HandlingToolError),
            (HandlingToolError, RetriesRemaining, RetryingTools),
            (HandlingToolError, RetriesExhausted, EscalatingError),
            (RetryingTools, Redispatch, ExecuteTools),
            (ValidatingResults, ValidationPassed, Synthesize),
            (ValidatingResults, ValidationFailedRetryable, RetryingTools),
            (ValidatingResults, ValidationFailedExhausted, EscalatingError),
            (Synthesize, PlanGenerated, Done),
            (EscalatingError, ErrorResponseBuilt, Done),
        ]
    }

    #[test]
    fn test_defined_edges_advance() {
        for (from, event, to) in defined_edges() {
            assert_eq!(transition(from, event), Some(to), "{:?} --{:?}-->", from, event);
        }
    }

    /// 穷举：表外的任何 (Phase, Event) 组合都无出边
    #[test]
    fn test_undefined_pairs_rejected() {
        let defined: Vec<(Phase, Event)> = defined_edges()
            .into_iter()
            .map(|(from, event, _)| (from, event))
            .collect();
        for phase in Phase::all() {
            for event in Event::all() {
                if defined.contains(&(phase, event)) {
                    continue;
                }
                assert_eq!(
                    transition(phase, event),
                    None,
                    "unexpected edge {:?} --{:?}-->",
                    phase,
                    event
                );
            }
        }
    }

    #[test]
    fn test_done_is_terminal() {
        assert!(Phase::Done.is_terminal());
        for event in Event::all() {
            assert_eq!(transition(Phase::Done, event), None);
        }
    }

    /// 两类失败都汇入同一个 EscalatingError 终结点
    #[test]
    fn test_failures_converge_on_escalation() {
        assert_eq!(
            transition(Phase::HandlingToolError, Event::RetriesExhausted),
            Some(Phase::EscalatingError)
        );
        assert_eq!(
            transition(Phase::ValidatingResults, Event::ValidationFailedExhausted),
            Some(Phase::EscalatingError)
        );
        assert_eq!(
            transition(Phase::EscalatingError, Event::ErrorResponseBuilt),
            Some(Phase::Done)
        );
    }
}
