//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `VOYA__*` 覆盖（双下划线表示嵌套，
//! 如 `VOYA__LLM__MODEL=gpt-4o`）。

use std::path::PathBuf;

use serde::Deserialize;

use crate::memory::HybridWeights;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub tools: ToolsSection,
    pub retry: RetrySection,
    pub memory: MemorySection,
}

/// [app] 段：应用名、请求级超时、检索条数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: Option<String>,
    /// 单请求整体截止（秒），到点取消未决调用并升级
    pub request_timeout_secs: u64,
    /// 澄清前从长期记忆回忆的条数
    pub recall_k: usize,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: None,
            request_timeout_secs: 60,
            recall_k: 3,
        }
    }
}

/// [llm] 段：后端与模型选择
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// openai（兼容端点）/ mock
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    pub embed_model: String,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            base_url: None,
            embed_model: "text-embedding-3-small".to_string(),
        }
    }
}

/// [tools] 段：单调用超时、并发上限、检索端点
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    pub tool_timeout_secs: u64,
    pub max_concurrency: usize,
    /// 可选的 JSON 检索端点；未配置时 search 工具用本地回退
    pub search_endpoint: Option<String>,
    pub max_search_results: usize,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: 10,
            max_concurrency: 4,
            search_endpoint: None,
            max_search_results: 5,
        }
    }
}

/// [retry] 段：重试预算与退避参数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base_ms: 200,
            backoff_cap_ms: 5000,
        }
    }
}

/// [memory] 段：短期窗口上限、长期容量与剪枝参数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MemorySection {
    pub stm_max_items: usize,
    pub stm_max_tokens: usize,
    pub ltm_capacity: usize,
    pub ltm_floor: usize,
    pub protection_window_secs: i64,
    /// SQLite 持久化路径；未配置时用内存后端
    pub sqlite_path: Option<PathBuf>,
    pub hybrid: HybridWeights,
}

impl Default for MemorySection {
    fn default() -> Self {
        Self {
            stm_max_items: 50,
            stm_max_tokens: 4000,
            ltm_capacity: 1000,
            ltm_floor: 10,
            protection_window_secs: 300,
            sqlite_path: None,
            hybrid: HybridWeights::default(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 VOYA__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 VOYA__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("VOYA")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sane() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.retry.max_retries, 3);
        assert_eq!(cfg.tools.max_concurrency, 4);
        assert!(cfg.memory.stm_max_items > 0);
        assert!(cfg.memory.ltm_capacity >= cfg.memory.ltm_floor);
    }
}
