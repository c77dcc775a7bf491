//! Search 工具：可配置 JSON 检索端点 + 确定性回退
//!
//! 配了 endpoint 就请求 {endpoint}?q=...&count=...，期望 JSON 数组
//! [{title, url, snippet}]；未配置或返回不可解析时回退到本地建议列表，
//! 保证规划流程在无外网检索时也能产出结果。

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use crate::core::error::ToolFailure;
use crate::tools::{classify_http_error, classify_status, Tool};

pub struct SearchTool {
    client: Client,
    endpoint: Option<String>,
    max_results: usize,
}

impl SearchTool {
    pub fn new(endpoint: Option<String>, timeout_secs: u64, max_results: usize) -> Self {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_default();
        Self {
            client,
            endpoint,
            max_results: max_results.max(1),
        }
    }

    /// 无端点时的本地建议（与线上结果同构，标注 fallback 来源）
    fn fallback_results(&self, query: &str) -> Value {
        let suggestions = [
            format!("Top rated spots for: {query}"),
            format!("Local favorites related to: {query}"),
            format!("Practical tips: {query}"),
        ];
        let results: Vec<Value> = suggestions
            .iter()
            .take(self.max_results)
            .enumerate()
            .map(|(i, title)| {
                json!({
                    "title": title,
                    "url": format!("https://example.com/travel/{}", i + 1),
                    "snippet": "Offline suggestion generated without web access.",
                    "source": "fallback",
                })
            })
            .collect();
        Value::Array(results)
    }

    async fn remote_search(&self, endpoint: &str, query: &str) -> Result<Value, ToolFailure> {
        let response = self
            .client
            .get(endpoint)
            .query(&[("q", query), ("count", &self.max_results.to_string())])
            .send()
            .await
            .map_err(|e| classify_http_error(&e))?;
        if let Some(failure) = classify_status(response.status()) {
            return Err(failure);
        }
        let body: Value = response
            .json()
            .await
            .map_err(|e| ToolFailure::permanent(format!("malformed search response: {e}")))?;
        match body {
            Value::Array(mut items) => {
                items.truncate(self.max_results);
                Ok(Value::Array(items))
            }
            other => Err(ToolFailure::permanent(format!(
                "unexpected search payload shape: {}",
                other
            ))),
        }
    }
}

#[async_trait]
impl Tool for SearchTool {
    fn name(&self) -> &str {
        "search"
    }

    fn description(&self) -> &str {
        "Search the web for restaurants, attractions, and travel info"
    }

    async fn invoke(&self, args: Value) -> Result<Value, ToolFailure> {
        let query = args["query"]
            .as_str()
            .ok_or_else(|| ToolFailure::permanent("missing 'query'"))?;
        match &self.endpoint {
            Some(endpoint) => self.remote_search(endpoint, query).await,
            None => {
                tracing::debug!("search endpoint not configured, using fallback suggestions");
                Ok(self.fallback_results(query))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fallback_when_unconfigured() {
        let tool = SearchTool::new(None, 5, 5);
        let out = tool
            .invoke(json!({"query": "best restaurants in Paris"}))
            .await
            .unwrap();
        let items = out.as_array().unwrap();
        assert!(!items.is_empty());
        assert_eq!(items[0]["source"], "fallback");
        assert!(items[0]["title"].as_str().unwrap().contains("Paris"));
    }

    #[tokio::test]
    async fn test_missing_query_is_permanent() {
        let tool = SearchTool::new(None, 5, 5);
        let err = tool.invoke(json!({})).await.unwrap_err();
        assert_eq!(err.kind, crate::core::error::FailureKind::Permanent);
    }

    #[tokio::test]
    async fn test_fallback_respects_max_results() {
        let tool = SearchTool::new(None, 5, 1);
        let out = tool.invoke(json!({"query": "x"})).await.unwrap();
        assert_eq!(out.as_array().unwrap().len(), 1);
    }
}
