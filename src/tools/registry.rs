//! 工具注册表
//!
//! 按名称存储 Arc<dyn Tool>，协调器对工具内部一无所知，只通过 invoke 能力派发。

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::core::error::ToolFailure;
use crate::tools::Tool;

/// 工具注册表：register / get / invoke / tool_names
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        let name = tool.name().to_string();
        self.tools.insert(name, Arc::new(tool));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// 按名调用；未注册的工具名是 Permanent 失败（重试无意义）
    pub async fn invoke(&self, name: &str, args: Value) -> Result<Value, ToolFailure> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ToolFailure::permanent(format!("unknown tool: {name}")))?;
        tool.invoke(args).await
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// (name, description) 列表，供诊断输出
    pub fn tool_descriptions(&self) -> Vec<(String, String)> {
        self.tools
            .iter()
            .map(|(name, tool)| (name.clone(), tool.description().to_string()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct StaticTool;

    #[async_trait]
    impl Tool for StaticTool {
        fn name(&self) -> &str {
            "static"
        }

        fn description(&self) -> &str {
            "returns a constant"
        }

        async fn invoke(&self, _args: Value) -> Result<Value, ToolFailure> {
            Ok(serde_json::json!({"value": 42}))
        }
    }

    #[tokio::test]
    async fn test_register_and_invoke() {
        let mut registry = ToolRegistry::new();
        registry.register(StaticTool);
        assert!(registry.contains("static"));

        let out = registry.invoke("static", Value::Null).await.unwrap();
        assert_eq!(out["value"], 42);
    }

    #[tokio::test]
    async fn test_unknown_tool_is_permanent() {
        let registry = ToolRegistry::new();
        let err = registry.invoke("nope", Value::Null).await.unwrap_err();
        assert_eq!(err.kind, crate::core::error::FailureKind::Permanent);
    }
}
