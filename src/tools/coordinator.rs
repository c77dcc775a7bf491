//! 工具执行协调器
//!
//! 将一批调用并发派发（Semaphore 限流），单调用超时标记 TimedOut（按 Transient 处理），
//! 单调用失败不影响同批其余调用；重派的调用在执行前按尝试次数做指数退避加抖动。
//! 整批在全部终态或整体截止时间到达时返回，未决者补记 TimedOut。
//! 每次调用输出结构化审计日志（JSON），并把调用记录追加进会话短期记忆。

use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::Rng;
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::core::error::ToolFailure;
use crate::memory::ShortTermMemory;
use crate::tools::{ToolInvocation, ToolRegistry};

/// 协调器配置：并发上限、单调用超时、退避参数
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub max_concurrency: usize,
    pub call_timeout: Duration,
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            call_timeout: Duration::from_secs(10),
            backoff_base_ms: 200,
            backoff_cap_ms: 5000,
        }
    }
}

/// 单次调用的内部结局
enum CallOutcome {
    Ok(Value),
    Fail(ToolFailure),
    TimedOut,
    Cancelled,
}

/// 工具执行协调器：持有注册表与并发许可
pub struct ToolCoordinator {
    registry: Arc<ToolRegistry>,
    semaphore: Arc<Semaphore>,
    config: CoordinatorConfig,
}

impl ToolCoordinator {
    pub fn new(registry: ToolRegistry, config: CoordinatorConfig) -> Self {
        let permits = config.max_concurrency.max(1);
        Self {
            registry: Arc::new(registry),
            semaphore: Arc::new(Semaphore::new(permits)),
            config,
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// 重派调用的退避延迟：base * 2^(attempts-1)，封顶后乘 0.5~1.5 抖动
    fn backoff_delay(&self, attempts: u32) -> Option<Duration> {
        if attempts == 0 {
            return None;
        }
        let shift = (attempts - 1).min(16);
        let exp = self.config.backoff_base_ms.saturating_mul(1u64 << shift);
        let capped = exp.min(self.config.backoff_cap_ms);
        let jitter: f64 = rand::thread_rng().gen_range(0.5..1.5);
        Some(Duration::from_millis((capped as f64 * jitter) as u64))
    }

    /// 并发执行本批中所有 Pending 调用；返回时每个调用要么终态、
    /// 要么因整体截止/取消被标记 TimedOut
    pub async fn execute(
        &self,
        invocations: &mut [ToolInvocation],
        session: &Arc<Mutex<ShortTermMemory>>,
        cancel: &CancellationToken,
        deadline: Option<Instant>,
    ) {
        let dispatched: Vec<usize> = invocations
            .iter()
            .enumerate()
            .filter(|(_, inv)| !inv.is_terminal())
            .map(|(idx, _)| idx)
            .collect();
        if dispatched.is_empty() {
            return;
        }

        let mut join_set: JoinSet<(usize, CallOutcome, u64)> = JoinSet::new();
        for &idx in &dispatched {
            let inv = &invocations[idx];
            let registry = Arc::clone(&self.registry);
            let semaphore = Arc::clone(&self.semaphore);
            let cancel = cancel.clone();
            let tool = inv.tool.clone();
            let args = inv.args.clone();
            let backoff = self.backoff_delay(inv.attempts);
            let call_timeout = self.config.call_timeout;

            join_set.spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore closed");
                if let Some(delay) = backoff {
                    tokio::select! {
                        _ = cancel.cancelled() => return (idx, CallOutcome::Cancelled, 0),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                let start = Instant::now();
                let outcome = tokio::select! {
                    _ = cancel.cancelled() => CallOutcome::Cancelled,
                    res = tokio::time::timeout(call_timeout, registry.invoke(&tool, args)) => {
                        match res {
                            Ok(Ok(value)) => CallOutcome::Ok(value),
                            Ok(Err(failure)) => CallOutcome::Fail(failure),
                            Err(_) => CallOutcome::TimedOut,
                        }
                    }
                };
                (idx, outcome, start.elapsed().as_millis() as u64)
            });
        }

        // 整体截止：先到则中止剩余任务，未决者按 TimedOut 计
        let collect = async {
            while let Some(joined) = join_set.join_next().await {
                if let Ok((idx, outcome, duration_ms)) = joined {
                    apply_outcome(&mut invocations[idx], outcome, duration_ms);
                }
            }
        };
        match deadline {
            Some(d) => {
                let elapsed = tokio::time::timeout_at(d, collect).await.is_err();
                if elapsed {
                    tracing::warn!("batch deadline elapsed, aborting outstanding invocations");
                    join_set.abort_all();
                    while join_set.join_next().await.is_some() {}
                }
            }
            None => collect.await,
        }

        for inv in invocations.iter_mut() {
            if !inv.is_terminal() {
                inv.mark_timed_out();
            }
        }

        // 可观测性：每个派发的调用都进会话记录，成功与否都记
        let mut stm = session.lock().unwrap();
        for &idx in &dispatched {
            let inv = &invocations[idx];
            let detail = if inv.is_succeeded() {
                format!("attempt {} ok", inv.attempts + 1)
            } else {
                format!(
                    "attempt {}: {}",
                    inv.attempts + 1,
                    inv.error.as_deref().unwrap_or("unresolved")
                )
            };
            stm.add_tool_call(&inv.tool, detail, inv.is_succeeded());
        }
    }
}

/// 把调用结局写回记录并输出审计日志
fn apply_outcome(inv: &mut ToolInvocation, outcome: CallOutcome, duration_ms: u64) {
    let outcome_label = match &outcome {
        CallOutcome::Ok(_) => "ok",
        CallOutcome::Fail(f) => match f.kind {
            crate::core::error::FailureKind::Transient => "transient_error",
            crate::core::error::FailureKind::Permanent => "permanent_error",
        },
        CallOutcome::TimedOut => "timeout",
        CallOutcome::Cancelled => "cancelled",
    };
    match outcome {
        CallOutcome::Ok(value) => inv.mark_succeeded(value),
        CallOutcome::Fail(failure) => inv.mark_failed(&failure),
        CallOutcome::TimedOut | CallOutcome::Cancelled => inv.mark_timed_out(),
    }
    let audit = serde_json::json!({
        "event": "tool_audit",
        "tool": inv.tool,
        "ok": inv.is_succeeded(),
        "outcome": outcome_label,
        "duration_ms": duration_ms,
        "attempt": inv.attempts + 1,
    });
    tracing::info!(audit = %audit.to_string(), "tool");
}
