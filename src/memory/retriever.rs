//! 检索器：按查询向量对长期记忆做 top-k 余弦排名
//!
//! 排名委托后端近邻查询，降序、同分取最近访问；每个被命中的条目
//! 都会 touch 一次，使访问频率剪枝反映真实使用。
//! 嵌入或后端不可用时降级为空结果，绝不让整个请求失败。

use std::sync::Arc;

use uuid::Uuid;

use crate::llm::EmbeddingProvider;
use crate::memory::long_term::LongTermMemory;

/// 单条检索结果；逐查询生成，不持久化
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalResult {
    pub id: Uuid,
    pub similarity: f32,
    pub rank: usize,
}

/// 检索器：组合嵌入提供方与长期记忆
pub struct Retriever {
    memory: Arc<LongTermMemory>,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl Retriever {
    pub fn new(memory: Arc<LongTermMemory>, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self { memory, embedder }
    }

    /// 按查询向量检索 top-k；返回长度 ≤ k，k=0 为空
    pub async fn retrieve(&self, query: &[f32], k: usize) -> Vec<RetrievalResult> {
        if k == 0 || query.is_empty() {
            return Vec::new();
        }
        let ranked = match self.memory.nearest(query, k).await {
            Ok(r) => r,
            Err(err) => {
                tracing::warn!(error = %err, "nearest-neighbor query failed, degrading to empty recall");
                return Vec::new();
            }
        };

        let results: Vec<RetrievalResult> = ranked
            .into_iter()
            .enumerate()
            .map(|(rank, (id, similarity))| RetrievalResult { id, similarity, rank })
            .collect();

        // 被命中即被使用：逐条 touch
        for r in &results {
            if let Err(err) = self.memory.touch(r.id).await {
                tracing::warn!(id = %r.id, error = %err, "touch after retrieval failed");
            }
        }
        results
    }

    /// 文本检索：先嵌入再 retrieve；嵌入失败降级为空
    pub async fn retrieve_text(&self, query: &str, k: usize) -> Vec<RetrievalResult> {
        if k == 0 || query.trim().is_empty() {
            return Vec::new();
        }
        let embedding = match self.embedder.embed(query).await {
            Ok(v) if !v.is_empty() => v,
            Ok(_) => return Vec::new(),
            Err(err) => {
                tracing::warn!(error = %err, "query embedding failed, degrading to empty recall");
                return Vec::new();
            }
        };
        self.retrieve(&embedding, k).await
    }

    /// 便捷方法：返回命中条目的内容文本（保持排名顺序）
    pub async fn recall_content(&self, query: &str, k: usize) -> Vec<String> {
        self.retrieve_text(query, k)
            .await
            .into_iter()
            .filter_map(|r| self.memory.get(r.id).map(|item| item.content))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{FailingEmbedder, MockEmbedder};
    use crate::memory::backend::{InMemoryBackend, UnavailableBackend};
    use crate::memory::long_term::LongTermConfig;

    fn store() -> Arc<LongTermMemory> {
        let config = LongTermConfig {
            protection_window_secs: 0,
            floor: 0,
            ..Default::default()
        };
        Arc::new(
            LongTermMemory::new(Arc::new(InMemoryBackend::new()), config)
                .with_embedder(Arc::new(MockEmbedder)),
        )
    }

    #[tokio::test]
    async fn test_retrieve_sorted_and_bounded() {
        let memory = store();
        for text in [
            "best restaurants in Paris",
            "currency exchange USD to EUR",
            "weather forecast for Tokyo",
            "museum opening hours in Paris",
        ] {
            memory.write(text, 0.5).await.unwrap();
        }
        let retriever = Retriever::new(memory.clone(), Arc::new(MockEmbedder));

        let results = retriever.retrieve_text("restaurants in Paris", 3).await;
        assert_eq!(results.len(), 3);
        for pair in results.windows(2) {
            assert!(pair[0].similarity >= pair[1].similarity, "non-increasing order");
        }
        for (i, r) in results.iter().enumerate() {
            assert_eq!(r.rank, i);
        }
    }

    #[tokio::test]
    async fn test_k_zero_and_oversized_k() {
        let memory = store();
        memory.write("only one memory", 0.5).await.unwrap();
        let retriever = Retriever::new(memory.clone(), Arc::new(MockEmbedder));

        assert!(retriever.retrieve_text("anything", 0).await.is_empty());
        let all = retriever.retrieve_text("anything", 100).await;
        assert_eq!(all.len(), 1, "k beyond corpus yields full ranked corpus");
    }

    #[tokio::test]
    async fn test_retrieval_touches_items() {
        let memory = store();
        let id = memory.write("touched by recall", 0.5).await.unwrap();
        assert_eq!(memory.get(id).unwrap().access_count, 0);

        let retriever = Retriever::new(memory.clone(), Arc::new(MockEmbedder));
        let results = retriever.retrieve_text("touched by recall", 1).await;
        assert_eq!(results.len(), 1);
        assert_eq!(memory.get(id).unwrap().access_count, 1);
    }

    #[tokio::test]
    async fn test_embedder_failure_degrades_to_empty() {
        let memory = store();
        memory.write("some memory", 0.5).await.unwrap();
        let retriever = Retriever::new(memory, Arc::new(FailingEmbedder));
        assert!(retriever.retrieve_text("query", 5).await.is_empty());
    }

    #[tokio::test]
    async fn test_backend_failure_degrades_to_empty() {
        let config = LongTermConfig {
            protection_window_secs: 0,
            floor: 0,
            ..Default::default()
        };
        let memory = Arc::new(LongTermMemory::new(Arc::new(UnavailableBackend), config));
        let retriever = Retriever::new(memory, Arc::new(MockEmbedder));
        assert!(retriever.retrieve_text("query", 5).await.is_empty());
    }
}
