//! 长期记忆：跨会话持久化的带权记忆条目
//!
//! 条目含重要性评分、访问统计与可选过期时间；write/touch/prune 为仅有的
//! 变更操作，统一在一把 RwLock 后串行化，读取基于锁下快照。
//! 可插拔后端（内存 / SQLite）承担持久化与近邻查询，后端不可用只降级不拖垮请求。

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::core::error::AgentError;
use crate::llm::EmbeddingProvider;
use crate::memory::backend::MemoryBackend;
use crate::memory::pruning::{select_victims, HybridWeights, PruneStrategy, Rescorer};

/// 长期记忆条目；内容与评分只在 write 与显式重评分中变化，剪枝只删除
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct MemoryItem {
    pub id: Uuid,
    pub content: String,
    pub embedding: Vec<f32>,
    /// 保留优先级，始终落在 [0,1]
    pub importance: f32,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub access_count: u64,
    pub expires_at: Option<DateTime<Utc>>,
}

impl MemoryItem {
    pub fn new(content: impl Into<String>, importance: f32, embedding: Vec<f32>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            content: content.into(),
            embedding,
            importance: importance.clamp(0.0, 1.0),
            created_at: now,
            last_accessed: now,
            access_count: 0,
            expires_at: None,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|t| t <= now).unwrap_or(false)
    }
}

/// list 过滤条件
#[derive(Debug, Clone, Default)]
pub struct MemoryFilter {
    pub min_importance: Option<f32>,
    pub contains: Option<String>,
    pub limit: Option<usize>,
}

/// 长期记忆存储配置
#[derive(Debug, Clone)]
pub struct LongTermConfig {
    /// 硬容量上限；超过时在 write 路径强制剪枝
    pub capacity: usize,
    /// 剪枝保底条数：只要还有条目，存量不低于此值
    pub floor: usize,
    /// 保护窗口：窗口内访问过的条目非硬性需要不剪
    pub protection_window_secs: i64,
    pub hybrid_weights: HybridWeights,
}

impl Default for LongTermConfig {
    fn default() -> Self {
        Self {
            capacity: 1000,
            floor: 10,
            protection_window_secs: 300,
            hybrid_weights: HybridWeights::default(),
        }
    }
}

/// 长期记忆存储：内存索引为权威，写穿到后端
pub struct LongTermMemory {
    items: RwLock<HashMap<Uuid, MemoryItem>>,
    backend: Arc<dyn MemoryBackend>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    rescorer: Option<Arc<dyn Rescorer>>,
    config: LongTermConfig,
}

impl LongTermMemory {
    pub fn new(backend: Arc<dyn MemoryBackend>, config: LongTermConfig) -> Self {
        Self {
            items: RwLock::new(HashMap::new()),
            backend,
            embedder: None,
            rescorer: None,
            config,
        }
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// 可选外部重评分器（如 LLM 相关性判断），仅参与 Hybrid 剪枝排序
    pub fn with_rescorer(mut self, rescorer: Arc<dyn Rescorer>) -> Self {
        self.rescorer = Some(rescorer);
        self
    }

    /// 从后端恢复历史条目（启动时调用一次）
    pub async fn restore(&self) -> Result<usize, AgentError> {
        let loaded = self
            .backend
            .load_all()
            .await
            .map_err(AgentError::BackendUnavailable)?;
        let count = loaded.len();
        let mut items = self.items.write().unwrap();
        for item in loaded {
            items.insert(item.id, item);
        }
        Ok(count)
    }

    /// 写入一条记忆；嵌入由 embedder 计算，失败时留空向量（仍可按其余策略剪枝）
    pub async fn write(&self, content: &str, importance: f32) -> Result<Uuid, AgentError> {
        let embedding = match &self.embedder {
            Some(e) => match e.embed(content).await {
                Ok(v) => v,
                Err(err) => {
                    tracing::warn!(error = %err, "embedding failed, storing without vector");
                    Vec::new()
                }
            },
            None => Vec::new(),
        };
        self.write_item(MemoryItem::new(content, importance, embedding))
            .await
    }

    /// 写入一条已构建的条目（测试与导入路径）
    pub async fn write_item(&self, item: MemoryItem) -> Result<Uuid, AgentError> {
        let id = item.id;
        {
            let mut items = self.items.write().unwrap();
            items.insert(id, item.clone());
        }
        if let Err(err) = self.backend.upsert(&item).await {
            tracing::warn!(error = %err, "backend upsert failed, item kept in memory only");
        }
        // 容量硬上限：超限即强制剪枝（保护窗口在此让位）
        if self.len() > self.config.capacity {
            self.prune_internal(PruneStrategy::Hybrid, self.config.capacity, true)
                .await;
        }
        Ok(id)
    }

    /// 更新访问时间与计数；未知 id 返回 MemoryNotFound 且不影响其他条目
    pub async fn touch(&self, id: Uuid) -> Result<(), AgentError> {
        let item = {
            let mut items = self.items.write().unwrap();
            let item = items.get_mut(&id).ok_or(AgentError::MemoryNotFound(id))?;
            item.last_accessed = Utc::now();
            item.access_count += 1;
            item.clone()
        };
        if let Err(err) = self.backend.upsert(&item).await {
            tracing::warn!(error = %err, "backend upsert failed on touch");
        }
        Ok(())
    }

    pub fn get(&self, id: Uuid) -> Option<MemoryItem> {
        self.items.read().unwrap().get(&id).cloned()
    }

    /// 过滤列出条目，按创建时间降序
    pub fn list(&self, filter: &MemoryFilter) -> Vec<MemoryItem> {
        let items = self.items.read().unwrap();
        let mut out: Vec<MemoryItem> = items
            .values()
            .filter(|item| {
                filter
                    .min_importance
                    .map(|m| item.importance >= m)
                    .unwrap_or(true)
                    && filter
                        .contains
                        .as_deref()
                        .map(|q| item.content.to_lowercase().contains(&q.to_lowercase()))
                        .unwrap_or(true)
            })
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = filter.limit {
            out.truncate(limit);
        }
        out
    }

    pub async fn delete(&self, id: Uuid) -> Result<(), AgentError> {
        {
            let mut items = self.items.write().unwrap();
            items.remove(&id).ok_or(AgentError::MemoryNotFound(id))?;
        }
        if let Err(err) = self.backend.delete(id).await {
            tracing::warn!(error = %err, "backend delete failed");
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.items.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.read().unwrap().is_empty()
    }

    /// 近邻查询，委托后端；失败上抛 BackendUnavailable 由调用方降级
    pub async fn nearest(&self, query: &[f32], k: usize) -> Result<Vec<(Uuid, f32)>, AgentError> {
        self.backend
            .nearest(query, k)
            .await
            .map_err(AgentError::BackendUnavailable)
    }

    /// 按策略剪枝到 target_count；返回删除条数。保护窗口内的条目不会被剪
    pub async fn prune(&self, strategy: PruneStrategy, target_count: usize) -> usize {
        self.prune_internal(strategy, target_count, false).await
    }

    async fn prune_internal(&self, strategy: PruneStrategy, target_count: usize, hard: bool) -> usize {
        let snapshot: Vec<MemoryItem> = {
            let items = self.items.read().unwrap();
            items.values().cloned().collect()
        };

        // Hybrid 的外部重评分：失败只告警并回退确定性组合分。
        // 容量硬上限触发的快速剪枝不走外部评分
        let mut rescored: HashMap<Uuid, f32> = HashMap::new();
        if matches!(strategy, PruneStrategy::Hybrid) && !hard {
            if let Some(rescorer) = &self.rescorer {
                for item in &snapshot {
                    match rescorer.relevance(item).await {
                        Ok(score) => {
                            rescored.insert(item.id, score.clamp(0.0, 1.0));
                        }
                        Err(err) => {
                            tracing::warn!(error = %err, "rescorer unavailable, falling back to composite score");
                            rescored.clear();
                            break;
                        }
                    }
                }
            }
        }

        let protection = Duration::seconds(self.config.protection_window_secs);
        let victims = select_victims(
            &snapshot,
            strategy,
            target_count,
            self.config.floor,
            protection,
            hard,
            &self.config.hybrid_weights,
            &rescored,
            Utc::now(),
        );

        if victims.is_empty() {
            return 0;
        }
        {
            let mut items = self.items.write().unwrap();
            for id in &victims {
                items.remove(id);
            }
        }
        for id in &victims {
            if let Err(err) = self.backend.delete(*id).await {
                tracing::warn!(error = %err, "backend delete failed during prune");
            }
        }
        tracing::info!(evicted = victims.len(), ?strategy, "long-term memory pruned");
        victims.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::backend::InMemoryBackend;

    fn store() -> LongTermMemory {
        let config = LongTermConfig {
            capacity: 1000,
            floor: 0,
            protection_window_secs: 0,
            hybrid_weights: HybridWeights::default(),
        };
        LongTermMemory::new(Arc::new(InMemoryBackend::new()), config)
    }

    #[tokio::test]
    async fn test_importance_clamped() {
        let ltm = store();
        let id = ltm.write("over the top", 7.5).await.unwrap();
        assert!((ltm.get(id).unwrap().importance - 1.0).abs() < f32::EPSILON);
        let id = ltm.write("below zero", -3.0).await.unwrap();
        assert_eq!(ltm.get(id).unwrap().importance, 0.0);
    }

    #[tokio::test]
    async fn test_touch_updates_stats() {
        let ltm = store();
        let id = ltm.write("visited place", 0.5).await.unwrap();
        let before = ltm.get(id).unwrap();
        ltm.touch(id).await.unwrap();
        let after = ltm.get(id).unwrap();
        assert_eq!(after.access_count, before.access_count + 1);
        assert!(after.last_accessed >= before.last_accessed);
    }

    #[tokio::test]
    async fn test_touch_unknown_id_is_not_found() {
        let ltm = store();
        let kept = ltm.write("untouched", 0.5).await.unwrap();
        let before = ltm.get(kept).unwrap();

        let err = ltm.touch(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, AgentError::MemoryNotFound(_)));

        // 其他条目不受影响
        let after = ltm.get(kept).unwrap();
        assert_eq!(after.access_count, before.access_count);
        assert_eq!(after.last_accessed, before.last_accessed);
    }

    #[tokio::test]
    async fn test_prune_importance_keeps_top() {
        let ltm = store();
        for i in 1..=10 {
            ltm.write(&format!("memory {}", i), i as f32 / 10.0)
                .await
                .unwrap();
        }
        let evicted = ltm.prune(PruneStrategy::Importance, 5).await;
        assert_eq!(evicted, 5);
        assert_eq!(ltm.len(), 5);
        let remaining = ltm.list(&MemoryFilter::default());
        for item in remaining {
            assert!(item.importance >= 0.6 - f32::EPSILON, "kept {:?}", item.importance);
        }
    }

    #[tokio::test]
    async fn test_failing_rescorer_does_not_block_pruning() {
        struct DownRescorer;

        #[async_trait::async_trait]
        impl crate::memory::pruning::Rescorer for DownRescorer {
            async fn relevance(&self, _item: &MemoryItem) -> Result<f32, String> {
                Err("judge offline".to_string())
            }
        }

        let config = LongTermConfig {
            capacity: 1000,
            floor: 0,
            protection_window_secs: 0,
            hybrid_weights: HybridWeights::default(),
        };
        let ltm = LongTermMemory::new(Arc::new(InMemoryBackend::new()), config)
            .with_rescorer(Arc::new(DownRescorer));
        for i in 1..=6 {
            ltm.write(&format!("memory {}", i), i as f32 / 10.0)
                .await
                .unwrap();
        }
        // 重评分不可用也要完成剪枝（回退确定性组合分）
        let evicted = ltm.prune(PruneStrategy::Hybrid, 3).await;
        assert_eq!(evicted, 3);
        assert_eq!(ltm.len(), 3);
    }

    #[tokio::test]
    async fn test_list_filters() {
        let ltm = store();
        ltm.write("trip to Paris in June", 0.9).await.unwrap();
        ltm.write("grocery list", 0.1).await.unwrap();

        let important = ltm.list(&MemoryFilter {
            min_importance: Some(0.5),
            ..Default::default()
        });
        assert_eq!(important.len(), 1);

        let paris = ltm.list(&MemoryFilter {
            contains: Some("paris".to_string()),
            ..Default::default()
        });
        assert_eq!(paris.len(), 1);
    }
}
