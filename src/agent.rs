//! Agent 运行时：会话注册表与唯一入口 handle_request
//!
//! 每个会话持有独立的短期记忆与（澄清时）挂起的请求上下文；
//! 长期记忆与工具协调器跨会话共享。handle_request 把请求驱动到底，
//! 澄清中断时把上下文停在会话上，下一次同会话请求作为用户回复续跑。

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::core::{AgentError, AgentResponse, Orchestrator, OrchestratorConfig, RequestContext};
use crate::extract::RequirementExtractor;
use crate::llm::{
    EmbeddingProvider, LlmClient, MockEmbedder, MockLlmClient, OpenAiClient, OpenAiEmbedder,
};
use crate::memory::{
    InMemoryBackend, LongTermConfig, LongTermMemory, MemoryBackend, Retriever, ShortTermMemory,
    SqliteBackend,
};
use crate::tools::{
    CardTool, CoordinatorConfig, FxTool, SearchTool, ToolCoordinator, ToolRegistry,
    TranslationTool, WeatherTool,
};

/// 会话条目：短期记忆 + 可能挂起的澄清中请求
struct SessionEntry {
    stm: Arc<Mutex<ShortTermMemory>>,
    pending: Option<RequestContext>,
}

/// Agent：编排器 + 会话注册表
pub struct Agent {
    orchestrator: Orchestrator,
    memory: Arc<LongTermMemory>,
    sessions: Mutex<HashMap<String, SessionEntry>>,
    stm_max_items: usize,
    stm_max_tokens: usize,
    max_retries: u32,
}

/// 根据配置与环境变量选择 LLM 后端（OpenAI 兼容 / Mock）
pub fn create_llm_from_config(cfg: &AppConfig) -> Arc<dyn LlmClient> {
    let has_key = std::env::var("OPENAI_API_KEY").is_ok();
    if cfg.llm.provider.to_lowercase() == "openai" && has_key {
        tracing::info!("Using OpenAI-compatible LLM ({})", cfg.llm.model);
        Arc::new(OpenAiClient::new(
            cfg.llm.base_url.as_deref(),
            &cfg.llm.model,
            std::env::var("OPENAI_API_KEY").ok().as_deref(),
        ))
    } else {
        tracing::warn!("No API key set or provider is mock, using Mock LLM");
        Arc::new(MockLlmClient::new(
            r#"{"destination": "Not specified", "dates": "Not specified", "card": "Not specified"}"#,
        ))
    }
}

/// 嵌入提供方：有 Key 走 API，否则用本地确定性哈希嵌入保持检索可用
pub fn create_embedder_from_config(cfg: &AppConfig) -> Arc<dyn EmbeddingProvider> {
    if std::env::var("OPENAI_API_KEY").is_ok() {
        Arc::new(OpenAiEmbedder::new(
            cfg.llm.base_url.as_deref(),
            &cfg.llm.embed_model,
            std::env::var("OPENAI_API_KEY").ok().as_deref(),
        ))
    } else {
        tracing::warn!("No API key set, using local deterministic embedder");
        Arc::new(MockEmbedder)
    }
}

/// 默认工具箱：weather / fx / search / card / translate
pub fn default_registry(cfg: &AppConfig) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(WeatherTool::new(cfg.tools.tool_timeout_secs));
    registry.register(FxTool::new(cfg.tools.tool_timeout_secs));
    registry.register(SearchTool::new(
        cfg.tools.search_endpoint.clone(),
        cfg.tools.tool_timeout_secs,
        cfg.tools.max_search_results,
    ));
    registry.register(CardTool);
    registry.register(TranslationTool);
    registry
}

impl Agent {
    /// 从配置构建完整运行时（含长期记忆恢复）
    pub async fn from_config(cfg: &AppConfig) -> anyhow::Result<Self> {
        let llm = create_llm_from_config(cfg);
        let embedder = create_embedder_from_config(cfg);
        let backend: Arc<dyn MemoryBackend> = match &cfg.memory.sqlite_path {
            Some(path) => Arc::new(SqliteBackend::open(path)?),
            None => Arc::new(InMemoryBackend::new()),
        };
        let registry = default_registry(cfg);
        Ok(Self::assemble(llm, embedder, backend, registry, cfg).await)
    }

    /// 组装运行时；测试可注入自定义 LLM / 嵌入 / 后端 / 工具箱
    pub async fn assemble(
        llm: Arc<dyn LlmClient>,
        embedder: Arc<dyn EmbeddingProvider>,
        backend: Arc<dyn MemoryBackend>,
        registry: ToolRegistry,
        cfg: &AppConfig,
    ) -> Self {
        let ltm_config = LongTermConfig {
            capacity: cfg.memory.ltm_capacity,
            floor: cfg.memory.ltm_floor,
            protection_window_secs: cfg.memory.protection_window_secs,
            hybrid_weights: cfg.memory.hybrid.clone(),
        };
        let memory = Arc::new(
            LongTermMemory::new(backend, ltm_config)
                .with_embedder(embedder.clone())
                .with_rescorer(Arc::new(crate::memory::LlmRescorer::new(llm.clone()))),
        );
        match memory.restore().await {
            Ok(count) if count > 0 => tracing::info!(count, "restored long-term memories"),
            Ok(_) => {}
            Err(err) => tracing::warn!(error = %err, "long-term memory restore failed"),
        }
        let retriever = Arc::new(Retriever::new(memory.clone(), embedder));

        let coordinator = Arc::new(ToolCoordinator::new(
            registry,
            CoordinatorConfig {
                max_concurrency: cfg.tools.max_concurrency,
                call_timeout: Duration::from_secs(cfg.tools.tool_timeout_secs),
                backoff_base_ms: cfg.retry.backoff_base_ms,
                backoff_cap_ms: cfg.retry.backoff_cap_ms,
            },
        ));
        let extractor = RequirementExtractor::new(llm);
        let orchestrator = Orchestrator::new(
            coordinator,
            extractor,
            memory.clone(),
            retriever,
            OrchestratorConfig {
                max_retries: cfg.retry.max_retries,
                request_timeout: Duration::from_secs(cfg.app.request_timeout_secs),
                recall_k: cfg.app.recall_k,
            },
        );

        Self {
            orchestrator,
            memory,
            sessions: Mutex::new(HashMap::new()),
            stm_max_items: cfg.memory.stm_max_items,
            stm_max_tokens: cfg.memory.stm_max_tokens,
            max_retries: cfg.retry.max_retries,
        }
    }

    pub fn memory(&self) -> &Arc<LongTermMemory> {
        &self.memory
    }

    /// 会话的短期记忆句柄（不存在则创建）
    pub fn session_memory(&self, session_id: &str) -> Arc<Mutex<ShortTermMemory>> {
        let mut sessions = self.sessions.lock().unwrap();
        let max_items = self.stm_max_items;
        let max_tokens = self.stm_max_tokens;
        sessions
            .entry(session_id.to_string())
            .or_insert_with(|| SessionEntry {
                stm: Arc::new(Mutex::new(
                    ShortTermMemory::new(max_items, max_tokens).with_session_id(session_id),
                )),
                pending: None,
            })
            .stm
            .clone()
    }

    /// 结束会话：丢弃短期记忆与挂起的请求上下文
    pub fn end_session(&self, session_id: &str) {
        if self.sessions.lock().unwrap().remove(session_id).is_some() {
            tracing::info!(session_id, "session ended");
        }
    }

    /// 唯一入口：驱动编排器到底并返回结构化响应
    pub async fn handle_request(
        &self,
        query: &str,
        session_id: &str,
    ) -> Result<AgentResponse, AgentError> {
        let stm = self.session_memory(session_id);
        let pending = self
            .sessions
            .lock()
            .unwrap()
            .get_mut(session_id)
            .and_then(|entry| entry.pending.take());

        stm.lock().unwrap().add_turn("user", query);

        let mut ctx =
            pending.unwrap_or_else(|| RequestContext::new(session_id, self.max_retries));
        let cancel = CancellationToken::new();
        let result = self.orchestrator.run(&mut ctx, query, &stm, &cancel).await;

        match &result {
            Ok(AgentResponse::NeedsClarification { question }) => {
                stm.lock().unwrap().add_turn("assistant", question.clone());
                if let Some(entry) = self.sessions.lock().unwrap().get_mut(session_id) {
                    entry.pending = Some(ctx);
                }
            }
            Ok(AgentResponse::Plan(plan)) => {
                stm.lock()
                    .unwrap()
                    .add_turn("assistant", format!("Trip plan ready for {}", plan.destination));
            }
            Ok(AgentResponse::Degraded(plan)) => {
                stm.lock().unwrap().add_turn(
                    "assistant",
                    format!(
                        "Partial trip plan for {} (some tools unavailable)",
                        plan.destination
                    ),
                );
            }
            Err(err) => {
                stm.lock()
                    .unwrap()
                    .add_system_event(format!("request failed: {err}"));
            }
        }
        result
    }
}
