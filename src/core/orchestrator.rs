//! 请求编排器：驱动单请求从 Init 到 Done
//!
//! 澄清 -> 规划 -> 执行 -> 校验 -> 合成/升级，每步产出事件交给转移表推进；
//! 编排器自身不直接调外部服务：工具批交给协调器，抽取与合成走各自协作方。
//! 工具失败与校验失败共享同一重试预算，预算耗尽一律汇入 EscalatingError，
//! 升级响应仍是结构化输出（成功的部分结果 + 错误说明），绝不裸失败。

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::core::context::{RequestContext, Requirements};
use crate::core::error::{AgentError, FailureKind};
use crate::core::state::{Event, Phase};
use crate::extract::RequirementExtractor;
use crate::memory::{LongTermMemory, Retriever, ShortTermMemory};
use crate::synthesis::{Synthesizer, TripPlan};
use crate::tools::{ToolCoordinator, ToolInvocation};

/// 目的地元信息：(名称, 国家, 货币, 常用语言)；语言为空表示不附短语手册
const DESTINATIONS: &[(&str, &str, &str, &str)] = &[
    ("paris", "FR", "EUR", "fr"),
    ("tokyo", "JP", "JPY", "ja"),
    ("london", "GB", "GBP", ""),
    ("new york", "US", "USD", ""),
    ("rome", "IT", "EUR", ""),
    ("barcelona", "ES", "EUR", "es"),
    ("sydney", "AU", "AUD", ""),
    ("bangkok", "TH", "THB", ""),
    ("berlin", "DE", "EUR", ""),
    ("lisbon", "PT", "EUR", ""),
];

fn destination_meta(destination: &str) -> Option<(&'static str, &'static str, &'static str)> {
    let key = destination.trim().to_lowercase();
    DESTINATIONS
        .iter()
        .find(|(name, _, _, _)| key.contains(name))
        .map(|(_, country, currency, language)| (*country, *currency, *language))
}

/// 编排配置
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub max_retries: u32,
    pub request_timeout: Duration,
    /// 澄清前从长期记忆回忆的条数
    pub recall_k: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            request_timeout: Duration::from_secs(60),
            recall_k: 3,
        }
    }
}

/// 单请求的最终产出
#[derive(Debug)]
pub enum AgentResponse {
    /// 完整行程计划
    Plan(TripPlan),
    /// 降级但结构完整的计划（含 error_note）
    Degraded(TripPlan),
    /// 需求不足，等待用户补充
    NeedsClarification { question: String },
}

/// 编排器：组合协调器、抽取器、合成器与记忆层
pub struct Orchestrator {
    coordinator: Arc<ToolCoordinator>,
    extractor: RequirementExtractor,
    synthesizer: Synthesizer,
    memory: Arc<LongTermMemory>,
    retriever: Arc<Retriever>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        coordinator: Arc<ToolCoordinator>,
        extractor: RequirementExtractor,
        memory: Arc<LongTermMemory>,
        retriever: Arc<Retriever>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            coordinator,
            extractor,
            synthesizer: Synthesizer::new(),
            memory,
            retriever,
            config,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// 驱动请求直至产出响应；ctx 可能停在 AwaitingClarification 供下次续跑
    pub async fn run(
        &self,
        ctx: &mut RequestContext,
        input: &str,
        session: &Arc<Mutex<ShortTermMemory>>,
        cancel: &CancellationToken,
    ) -> Result<AgentResponse, AgentError> {
        let deadline = Instant::now() + self.config.request_timeout;

        loop {
            if cancel.is_cancelled() && !matches!(ctx.phase(), Phase::Done) {
                // 工具批内的取消由协调器转成 TimedOut 走升级；批外直接取消
                if ctx.invocations.is_empty() {
                    return Err(AgentError::Cancelled);
                }
            }

            match ctx.phase() {
                Phase::Init => {
                    ctx.requirements = self.extractor.extract(input).await;
                    ctx.advance(Event::RequirementsExtracted)?;
                }

                Phase::ClarifyRequirements => {
                    if !ctx.requirements.sufficient() {
                        let recalled = self.recall_requirements(input).await;
                        ctx.requirements.merge(&recalled);
                    }
                    if ctx.requirements.sufficient() {
                        ctx.advance(Event::RequirementsSufficient)?;
                    } else {
                        let question =
                            "Which destination would you like to travel to?".to_string();
                        ctx.clarification = Some(question.clone());
                        ctx.advance(Event::RequirementsInsufficient)?;
                        return Ok(AgentResponse::NeedsClarification { question });
                    }
                }

                Phase::AwaitingClarification => {
                    // 续跑：本次输入即用户的澄清回复
                    let reply = self.extractor.extract(input).await;
                    ctx.requirements.merge(&reply);
                    ctx.clarification = None;
                    ctx.advance(Event::UserReplied)?;
                }

                Phase::PlanTools => {
                    ctx.plan = build_plan(&ctx.requirements);
                    ctx.invocations = ctx
                        .plan
                        .iter()
                        .map(|(tool, args)| ToolInvocation::new(tool.clone(), args.clone()))
                        .collect();
                    tracing::info!(tools = ctx.plan.len(), "tool plan produced");
                    ctx.advance(Event::PlanProduced)?;
                }

                Phase::ExecuteTools => {
                    self.coordinator
                        .execute(&mut ctx.invocations, session, cancel, Some(deadline))
                        .await;
                    let all_ok = ctx.invocations.iter().all(|inv| inv.is_succeeded());
                    if all_ok {
                        ctx.advance(Event::ToolsSucceeded)?;
                    } else {
                        ctx.advance(Event::ToolsFailed)?;
                    }
                }

                Phase::HandlingToolError => {
                    let out_of_time = Instant::now() >= deadline || cancel.is_cancelled();
                    let retryable: Vec<String> = ctx
                        .failed_invocations()
                        .iter()
                        .filter(|inv| inv.failure_kind() == Some(FailureKind::Transient))
                        .map(|inv| inv.tool.clone())
                        .collect();
                    let has_budget = retryable
                        .iter()
                        .any(|tool| ctx.retry_budget.can_retry(tool));
                    if !out_of_time && has_budget {
                        ctx.advance(Event::RetriesRemaining)?;
                    } else {
                        ctx.advance(Event::RetriesExhausted)?;
                    }
                }

                Phase::RetryingTools => {
                    let mut redispatched = 0usize;
                    for idx in 0..ctx.invocations.len() {
                        let (transient, tool) = {
                            let inv = &ctx.invocations[idx];
                            (
                                inv.failure_kind() == Some(FailureKind::Transient),
                                inv.tool.clone(),
                            )
                        };
                        if transient && ctx.retry_budget.can_retry(&tool) {
                            ctx.retry_budget.consume(&tool);
                            ctx.invocations[idx].reset_for_retry();
                            redispatched += 1;
                        }
                    }
                    tracing::info!(redispatched, "re-dispatching failed invocations");
                    ctx.advance(Event::Redispatch)?;
                }

                Phase::ValidatingResults => {
                    let errors = validate_results(&ctx.invocations);
                    if errors.is_empty() {
                        ctx.advance(Event::ValidationPassed)?;
                    } else {
                        tracing::warn!(count = errors.len(), "validation failed");
                        // 未通过的调用按 Transient 失败处理，走同一重试预算
                        let mut retryable = false;
                        for idx in 0..ctx.invocations.len() {
                            let tool = ctx.invocations[idx].tool.clone();
                            let offending = errors.iter().any(|(t, _)| t == &tool);
                            if offending {
                                ctx.invocations[idx].mark_failed(
                                    &crate::core::error::ToolFailure::transient(
                                        "result failed validation",
                                    ),
                                );
                                retryable |= ctx.retry_budget.can_retry(&tool);
                            }
                        }
                        ctx.validation_errors =
                            errors.iter().map(|(t, e)| format!("{t}: {e}")).collect();
                        let out_of_time = Instant::now() >= deadline || cancel.is_cancelled();
                        if retryable && !out_of_time {
                            ctx.advance(Event::ValidationFailedRetryable)?;
                        } else {
                            ctx.advance(Event::ValidationFailedExhausted)?;
                        }
                    }
                }

                Phase::Synthesize => {
                    let plan = {
                        let results = ctx.succeeded_results();
                        self.synthesizer.synthesize(&results, &ctx.requirements, None)
                    };
                    self.remember_outcome(ctx, true).await;
                    ctx.advance(Event::PlanGenerated)?;
                    return Ok(AgentResponse::Plan(plan));
                }

                Phase::EscalatingError => {
                    let note = escalation_note(ctx, cancel.is_cancelled());
                    let plan = {
                        let results = ctx.succeeded_results();
                        self.synthesizer
                            .synthesize(&results, &ctx.requirements, Some(note.clone()))
                    };
                    session.lock().unwrap().add_system_event(note);
                    self.remember_outcome(ctx, false).await;
                    ctx.advance(Event::ErrorResponseBuilt)?;
                    return Ok(AgentResponse::Degraded(plan));
                }

                Phase::Done => {
                    // run 的两个出口都在 advance 到 Done 前返回；到这说明调用方复用了已完结的 ctx
                    return Err(AgentError::InvalidTransition {
                        phase: Phase::Done,
                        event: Event::RequirementsExtracted,
                    });
                }
            }
        }
    }

    /// 从长期记忆回忆历史偏好补全需求字段
    async fn recall_requirements(&self, query: &str) -> Requirements {
        let mut merged = Requirements::default();
        for content in self
            .retriever
            .recall_content(query, self.config.recall_k)
            .await
        {
            merged.merge(&parse_remembered(&content));
        }
        merged
    }

    /// 将本次请求的结果沉淀进长期记忆；成功的行程权重更高
    async fn remember_outcome(&self, ctx: &RequestContext, success: bool) {
        let req = &ctx.requirements;
        let mut parts = vec!["trip preferences".to_string()];
        if let Some(d) = &req.destination {
            parts.push(format!("destination={d}"));
        }
        if let Some(d) = &req.dates {
            parts.push(format!("dates={d}"));
        }
        if let Some(c) = &req.card {
            parts.push(format!("card={c}"));
        }
        if parts.len() == 1 {
            return;
        }
        let importance = if success { 0.8 } else { 0.4 };
        if let Err(err) = self.memory.write(&parts.join(" | "), importance).await {
            tracing::warn!(error = %err, "failed to persist trip outcome");
        }
    }
}

/// 由需求决定工具计划；无目的地时计划为空
fn build_plan(requirements: &Requirements) -> Vec<(String, serde_json::Value)> {
    let Some(destination) = &requirements.destination else {
        return Vec::new();
    };
    let mut plan = Vec::new();
    plan.push((
        "weather".to_string(),
        serde_json::json!({"destination": destination}),
    ));
    plan.push((
        "search".to_string(),
        serde_json::json!({"query": format!("best restaurants in {destination}")}),
    ));

    let meta = destination_meta(destination);
    if let Some((country, currency, language)) = meta {
        if currency != "USD" {
            plan.push((
                "fx".to_string(),
                serde_json::json!({"amount": 100.0, "base": "USD", "target": currency}),
            ));
        }
        let mut card_args = serde_json::json!({
            "mcc": "5812",
            "amount": 100.0,
            "country": country,
        });
        if let Some(card) = &requirements.card {
            card_args["preferred_card"] = serde_json::Value::String(card.clone());
        }
        plan.push(("card".to_string(), card_args));
        if !language.is_empty() {
            plan.push((
                "translate".to_string(),
                serde_json::json!({"language": language, "category": "restaurant"}),
            ));
        }
    } else {
        // 未知目的地：仍可推荐卡（按境外保守处理）
        let mut card_args = serde_json::json!({
            "mcc": "5812",
            "amount": 100.0,
            "country": "FR",
        });
        if let Some(card) = &requirements.card {
            card_args["preferred_card"] = serde_json::Value::String(card.clone());
        }
        plan.push(("card".to_string(), card_args));
    }
    plan
}

/// 校验成功结果：载荷缺失或带 error 字段即不合格
fn validate_results(invocations: &[ToolInvocation]) -> Vec<(String, String)> {
    let mut errors = Vec::new();
    for inv in invocations.iter().filter(|inv| inv.is_succeeded()) {
        match &inv.result {
            None => errors.push((inv.tool.clone(), "missing payload".to_string())),
            Some(value) => {
                if value.get("error").is_some() {
                    errors.push((inv.tool.clone(), "payload carries an error field".to_string()));
                } else if value.is_null() {
                    errors.push((inv.tool.clone(), "null payload".to_string()));
                }
            }
        }
    }
    errors
}

/// 升级说明：失败工具、分级与校验错误的汇总
fn escalation_note(ctx: &RequestContext, cancelled: bool) -> String {
    if cancelled {
        return "Request cancelled before all tools completed; returning partial results.".to_string();
    }
    let mut parts: Vec<String> = ctx
        .failed_invocations()
        .iter()
        .map(|inv| {
            format!(
                "{} failed after {} attempt(s): {}",
                inv.tool,
                inv.attempts + 1,
                inv.error.as_deref().unwrap_or("unknown error")
            )
        })
        .collect();
    parts.extend(ctx.validation_errors.iter().cloned());
    if parts.is_empty() {
        "Request degraded for an unknown reason.".to_string()
    } else {
        format!("Some tools could not complete: {}", parts.join("; "))
    }
}

/// 解析沉淀格式 "trip preferences | destination=X | dates=Y | card=Z"
fn parse_remembered(content: &str) -> Requirements {
    let mut req = Requirements::default();
    for part in content.split('|').map(str::trim) {
        if let Some(v) = part.strip_prefix("destination=") {
            req.destination = Some(v.trim().to_string());
        } else if let Some(v) = part.strip_prefix("dates=") {
            req.dates = Some(v.trim().to_string());
        } else if let Some(v) = part.strip_prefix("card=") {
            req.card = Some(v.trim().to_string());
        }
    }
    req
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_plan_for_known_destination() {
        let req = Requirements {
            destination: Some("Paris".to_string()),
            dates: None,
            card: Some("BankGold".to_string()),
        };
        let plan = build_plan(&req);
        let names: Vec<&str> = plan.iter().map(|(t, _)| t.as_str()).collect();
        assert_eq!(names, vec!["weather", "search", "fx", "card", "translate"]);
        let card_args = &plan.iter().find(|(t, _)| t == "card").unwrap().1;
        assert_eq!(card_args["preferred_card"], "BankGold");
        assert_eq!(card_args["country"], "FR");
    }

    #[test]
    fn test_build_plan_empty_without_destination() {
        assert!(build_plan(&Requirements::default()).is_empty());
    }

    #[test]
    fn test_build_plan_skips_fx_for_usd_destination() {
        let req = Requirements {
            destination: Some("New York".to_string()),
            dates: None,
            card: None,
        };
        let plan = build_plan(&req);
        assert!(!plan.iter().any(|(t, _)| t == "fx"));
    }

    #[test]
    fn test_parse_remembered_roundtrip() {
        let req = parse_remembered(
            "trip preferences | destination=New York | dates=2026-01-01 to 2026-01-05 | card=Amex Platinum",
        );
        assert_eq!(req.destination.as_deref(), Some("New York"));
        assert_eq!(req.dates.as_deref(), Some("2026-01-01 to 2026-01-05"));
        assert_eq!(req.card.as_deref(), Some("Amex Platinum"));
    }

    #[test]
    fn test_validate_results_flags_error_payloads() {
        let mut ok = ToolInvocation::new("weather", serde_json::json!({}));
        ok.mark_succeeded(serde_json::json!({"daily": {}}));
        let mut bad = ToolInvocation::new("fx", serde_json::json!({}));
        bad.mark_succeeded(serde_json::json!({"error": "upstream broke"}));

        let errors = validate_results(&[ok, bad]);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].0, "fx");
    }

    #[test]
    fn test_escalation_note_lists_failures() {
        let mut ctx = RequestContext::new("s", 1);
        let mut inv = ToolInvocation::new("weather", serde_json::json!({}));
        inv.mark_failed(&crate::core::error::ToolFailure::permanent("bad coords"));
        ctx.invocations.push(inv);
        let note = escalation_note(&ctx, false);
        assert!(note.contains("weather"));
        assert!(note.contains("bad coords"));
    }
}
