//! Voya - Rust 旅行管家智能体
//!
//! 模块划分：
//! - **agent**: 运行时与唯一入口（会话注册表 + handle_request）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误分级、请求状态机、上下文与编排器
//! - **extract**: 需求抽取（LLM JSON 契约）
//! - **llm**: LLM 客户端与嵌入抽象（OpenAI 兼容 / Mock）
//! - **memory**: 短期 / 长期记忆、剪枝与检索
//! - **synthesis**: 工具结果 -> 结构化行程计划
//! - **tools**: 工具箱（weather、fx、search、card、translate）与并发协调器

pub mod agent;
pub mod config;
pub mod core;
pub mod extract;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod synthesis;
pub mod tools;

pub use crate::core::{AgentError, AgentResponse};
pub use agent::Agent;
pub use synthesis::TripPlan;
