//! 剪枝策略：为淘汰候选排出全序
//!
//! 四种策略（重要性 / 年龄 / 访问频率 / 混合加权），排序最低者先被淘汰，
//! 直到达到目标条数或触及保底值；过期条目永远是第一批候选。
//! 保护窗口内访问过的条目只有在硬容量上限下才会被剪。

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::llm::{LlmClient, Message};
use crate::memory::long_term::MemoryItem;

/// 淘汰候选排序策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PruneStrategy {
    /// 重要性升序，同分者创建更早的先淘汰
    Importance,
    /// 创建时间升序
    Age,
    /// 访问次数升序，同次数者最近访问更早的先淘汰
    AccessFrequency,
    /// 归一化重要性 / 新近度 / 频率的加权组合
    Hybrid,
}

/// Hybrid 策略权重（配置提供）
#[derive(Debug, Clone, serde::Deserialize)]
pub struct HybridWeights {
    pub importance: f32,
    pub recency: f32,
    pub frequency: f32,
}

impl Default for HybridWeights {
    fn default() -> Self {
        Self {
            importance: 0.5,
            recency: 0.3,
            frequency: 0.2,
        }
    }
}

/// 可选外部重评分器：用相关性判断替换/混入重要性项。
/// 不可用时剪枝必须继续，回退到确定性组合分。
#[async_trait]
pub trait Rescorer: Send + Sync {
    async fn relevance(&self, item: &MemoryItem) -> Result<f32, String>;
}

/// LLM 相关性重评分：提示模型对记忆保留价值打 0~1 分
pub struct LlmRescorer {
    llm: std::sync::Arc<dyn LlmClient>,
}

impl LlmRescorer {
    pub fn new(llm: std::sync::Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl Rescorer for LlmRescorer {
    async fn relevance(&self, item: &MemoryItem) -> Result<f32, String> {
        let prompt = format!(
            "Rate how valuable this stored memory is for future travel planning on a scale from 0.0 to 1.0.\n\
             Respond with only the number.\n\nMemory: {}",
            item.content
        );
        let reply = self.llm.complete(&[Message::user(prompt)]).await?;
        reply
            .trim()
            .parse::<f32>()
            .map(|v| v.clamp(0.0, 1.0))
            .map_err(|e| format!("unparseable relevance score '{}': {}", reply.trim(), e))
    }
}

/// 选出待淘汰条目。hard 为真表示硬容量上限，保护窗口让位。
#[allow(clippy::too_many_arguments)]
pub fn select_victims(
    items: &[MemoryItem],
    strategy: PruneStrategy,
    target_count: usize,
    floor: usize,
    protection_window: Duration,
    hard: bool,
    weights: &HybridWeights,
    rescored: &HashMap<Uuid, f32>,
    now: DateTime<Utc>,
) -> Vec<Uuid> {
    if items.is_empty() {
        return Vec::new();
    }

    // 过期条目无条件出局
    let mut victims: Vec<Uuid> = items
        .iter()
        .filter(|i| i.is_expired(now))
        .map(|i| i.id)
        .collect();

    let live: Vec<&MemoryItem> = items.iter().filter(|i| !i.is_expired(now)).collect();

    // 保底：存量不降到 floor 以下
    let retain_target = if floor > 0 { target_count.max(floor) } else { target_count };
    let evict_needed = live.len().saturating_sub(retain_target);
    if evict_needed == 0 {
        return victims;
    }

    let mut ranked = live;
    sort_ascending(&mut ranked, strategy, weights, rescored);

    let protected = |item: &MemoryItem| now - item.last_accessed < protection_window;

    let mut chosen = 0usize;
    let mut deferred: Vec<Uuid> = Vec::new();
    for item in &ranked {
        if chosen >= evict_needed {
            break;
        }
        if protected(item) {
            deferred.push(item.id);
            continue;
        }
        victims.push(item.id);
        chosen += 1;
    }
    // 硬上限下，保护窗口内的条目也不得不让出空间
    if hard && chosen < evict_needed {
        for id in deferred {
            if chosen >= evict_needed {
                break;
            }
            victims.push(id);
            chosen += 1;
        }
    }

    victims
}

/// 按策略升序排序（最先淘汰者在前）
fn sort_ascending(
    items: &mut [&MemoryItem],
    strategy: PruneStrategy,
    weights: &HybridWeights,
    rescored: &HashMap<Uuid, f32>,
) {
    match strategy {
        PruneStrategy::Importance => {
            items.sort_by(|a, b| {
                a.importance
                    .partial_cmp(&b.importance)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(a.created_at.cmp(&b.created_at))
            });
        }
        PruneStrategy::Age => {
            items.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        }
        PruneStrategy::AccessFrequency => {
            items.sort_by(|a, b| {
                a.access_count
                    .cmp(&b.access_count)
                    .then(a.last_accessed.cmp(&b.last_accessed))
            });
        }
        PruneStrategy::Hybrid => {
            let oldest = items.iter().map(|i| i.last_accessed).min();
            let newest = items.iter().map(|i| i.last_accessed).max();
            let max_access = items.iter().map(|i| i.access_count).max().unwrap_or(0);
            let composite = |item: &MemoryItem| -> f32 {
                let importance_term = rescored.get(&item.id).copied().unwrap_or(item.importance);
                let recency = match (oldest, newest) {
                    (Some(lo), Some(hi)) if hi > lo => {
                        (item.last_accessed - lo).num_milliseconds() as f32
                            / (hi - lo).num_milliseconds() as f32
                    }
                    _ => 1.0,
                };
                let frequency = if max_access > 0 {
                    item.access_count as f32 / max_access as f32
                } else {
                    0.0
                };
                weights.importance * importance_term
                    + weights.recency * recency
                    + weights.frequency * frequency
            };
            items.sort_by(|a, b| {
                composite(a)
                    .partial_cmp(&composite(b))
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(importance: f32, age_secs: i64, access_count: u64) -> MemoryItem {
        let now = Utc::now();
        let mut item = MemoryItem::new(format!("item {}", importance), importance, vec![]);
        item.created_at = now - Duration::seconds(age_secs);
        item.last_accessed = item.created_at;
        item.access_count = access_count;
        item
    }

    fn ids_to_importance(items: &[MemoryItem], victims: &[Uuid]) -> Vec<f32> {
        victims
            .iter()
            .map(|id| items.iter().find(|i| &i.id == id).unwrap().importance)
            .collect()
    }

    #[test]
    fn test_importance_evicts_lowest_first() {
        let items: Vec<MemoryItem> = (1..=10).map(|i| item(i as f32 / 10.0, 1000, 0)).collect();
        let victims = select_victims(
            &items,
            PruneStrategy::Importance,
            5,
            0,
            Duration::seconds(0),
            false,
            &HybridWeights::default(),
            &HashMap::new(),
            Utc::now(),
        );
        assert_eq!(victims.len(), 5);
        let evicted = ids_to_importance(&items, &victims);
        for v in evicted {
            assert!(v < 0.6 - f32::EPSILON);
        }
    }

    #[test]
    fn test_importance_tie_breaks_on_older_creation() {
        let mut a = item(0.5, 1000, 0);
        a.content = "older".to_string();
        let mut b = item(0.5, 10, 0);
        b.content = "newer".to_string();
        let items = vec![b.clone(), a.clone()];
        let victims = select_victims(
            &items,
            PruneStrategy::Importance,
            1,
            0,
            Duration::seconds(0),
            false,
            &HybridWeights::default(),
            &HashMap::new(),
            Utc::now(),
        );
        assert_eq!(victims, vec![a.id], "older creation should evict first on tie");
    }

    #[test]
    fn test_age_strategy_evicts_oldest() {
        let old = item(0.9, 5000, 10);
        let fresh = item(0.1, 10, 0);
        let items = vec![fresh.clone(), old.clone()];
        let victims = select_victims(
            &items,
            PruneStrategy::Age,
            1,
            0,
            Duration::seconds(0),
            false,
            &HybridWeights::default(),
            &HashMap::new(),
            Utc::now(),
        );
        assert_eq!(victims, vec![old.id]);
    }

    #[test]
    fn test_access_frequency_evicts_least_used() {
        let hot = item(0.1, 1000, 50);
        let cold = item(0.9, 1000, 1);
        let items = vec![hot.clone(), cold.clone()];
        let victims = select_victims(
            &items,
            PruneStrategy::AccessFrequency,
            1,
            0,
            Duration::seconds(0),
            false,
            &HybridWeights::default(),
            &HashMap::new(),
            Utc::now(),
        );
        assert_eq!(victims, vec![cold.id]);
    }

    #[test]
    fn test_floor_is_respected() {
        let items: Vec<MemoryItem> = (1..=10).map(|i| item(i as f32 / 10.0, 1000, 0)).collect();
        // 目标 2 条，但保底 6：最多淘汰 4 条
        let victims = select_victims(
            &items,
            PruneStrategy::Importance,
            2,
            6,
            Duration::seconds(0),
            false,
            &HybridWeights::default(),
            &HashMap::new(),
            Utc::now(),
        );
        assert_eq!(victims.len(), 4);
    }

    #[test]
    fn test_protection_window_defers_recent_items() {
        let mut recent = item(0.1, 1000, 0);
        recent.last_accessed = Utc::now();
        let stale = item(0.2, 1000, 0);
        let items = vec![recent.clone(), stale.clone()];
        let victims = select_victims(
            &items,
            PruneStrategy::Importance,
            1,
            0,
            Duration::seconds(600),
            false,
            &HybridWeights::default(),
            &HashMap::new(),
            Utc::now(),
        );
        // recent 在保护窗口内，尽管重要性更低也不剪
        assert_eq!(victims, vec![stale.id]);
    }

    #[test]
    fn test_hard_limit_overrides_protection() {
        let mut a = item(0.1, 1000, 0);
        a.last_accessed = Utc::now();
        let mut b = item(0.2, 1000, 0);
        b.last_accessed = Utc::now();
        let items = vec![a.clone(), b.clone()];
        let victims = select_victims(
            &items,
            PruneStrategy::Importance,
            1,
            0,
            Duration::seconds(600),
            true,
            &HybridWeights::default(),
            &HashMap::new(),
            Utc::now(),
        );
        assert_eq!(victims.len(), 1, "hard ceiling must evict even protected items");
    }

    #[test]
    fn test_expired_items_go_first() {
        let mut expired = item(1.0, 10, 100);
        expired.expires_at = Some(Utc::now() - Duration::seconds(1));
        let live = item(0.1, 1000, 0);
        let items = vec![expired.clone(), live.clone()];
        let victims = select_victims(
            &items,
            PruneStrategy::Importance,
            1,
            0,
            Duration::seconds(0),
            false,
            &HybridWeights::default(),
            &HashMap::new(),
            Utc::now(),
        );
        assert!(victims.contains(&expired.id));
        assert!(!victims.contains(&live.id));
    }

    #[test]
    fn test_hybrid_prefers_keeping_high_composite() {
        let strong = item(0.9, 10, 20);
        let weak = item(0.1, 5000, 0);
        let items = vec![strong.clone(), weak.clone()];
        let victims = select_victims(
            &items,
            PruneStrategy::Hybrid,
            1,
            0,
            Duration::seconds(0),
            false,
            &HybridWeights::default(),
            &HashMap::new(),
            Utc::now(),
        );
        assert_eq!(victims, vec![weak.id]);
    }

    #[test]
    fn test_rescored_relevance_overrides_importance() {
        let a = item(0.9, 1000, 0);
        let b = item(0.1, 1000, 0);
        let mut rescored = HashMap::new();
        // 外部评分反转两者的相对价值
        rescored.insert(a.id, 0.05f32);
        rescored.insert(b.id, 0.95f32);
        let items = vec![a.clone(), b.clone()];
        let victims = select_victims(
            &items,
            PruneStrategy::Hybrid,
            1,
            0,
            Duration::seconds(0),
            false,
            &HybridWeights::default(),
            &rescored,
            Utc::now(),
        );
        assert_eq!(victims, vec![a.id]);
    }
}
