//! Mock LLM 与嵌入（用于测试，无需 API）
//!
//! MockLlmClient 按脚本顺序吐出预置回复；MockEmbedder 用字符哈希生成
//! 确定性低维向量，保证余弦排序在测试里可复现。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::{EmbeddingProvider, LlmClient, Message};

/// Mock 客户端：依次返回预置回复，脚本耗尽后重复最后一条
pub struct MockLlmClient {
    responses: Mutex<VecDeque<String>>,
    last: Mutex<String>,
}

impl MockLlmClient {
    pub fn new(response: impl Into<String>) -> Self {
        let response = response.into();
        Self {
            responses: Mutex::new(VecDeque::new()),
            last: Mutex::new(response),
        }
    }

    pub fn scripted(responses: Vec<String>) -> Self {
        let last = responses.last().cloned().unwrap_or_default();
        Self {
            responses: Mutex::new(responses.into()),
            last: Mutex::new(last),
        }
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, _messages: &[Message]) -> Result<String, String> {
        let mut queue = self.responses.lock().unwrap();
        match queue.pop_front() {
            Some(r) => {
                *self.last.lock().unwrap() = r.clone();
                Ok(r)
            }
            None => Ok(self.last.lock().unwrap().clone()),
        }
    }
}

/// 总是失败的客户端，用于测试降级路径
#[derive(Default)]
pub struct FailingLlmClient;

#[async_trait]
impl LlmClient for FailingLlmClient {
    async fn complete(&self, _messages: &[Message]) -> Result<String, String> {
        Err("mock llm unavailable".to_string())
    }
}

/// 确定性嵌入：按字符位置哈希折叠到 8 维并归一化
#[derive(Default)]
pub struct MockEmbedder;

const MOCK_DIM: usize = 8;

#[async_trait]
impl EmbeddingProvider for MockEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, String> {
        let mut v = [0f32; MOCK_DIM];
        for (i, c) in text.chars().enumerate() {
            v[i % MOCK_DIM] += (c as u32 % 101) as f32 / 101.0;
        }
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in v.iter_mut() {
                *x /= norm;
            }
        }
        Ok(v.to_vec())
    }
}

/// 总是失败的嵌入，用于测试检索降级
#[derive(Default)]
pub struct FailingEmbedder;

#[async_trait]
impl EmbeddingProvider for FailingEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, String> {
        Err("mock embedder unavailable".to_string())
    }
}
