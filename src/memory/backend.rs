//! 记忆后端：持久化 + 近邻查询
//!
//! MemoryBackend 约定 CRUD 与 top-k 余弦近邻（降序，同分者取最近访问）；
//! 内存实现用于默认运行与测试，SQLite 实现负责跨进程持久化。
//! 近邻在本进程内对全量向量做余弦扫描，规模上来后可替换为真实向量索引。

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, RwLock};

use async_trait::async_trait;
use rusqlite::Connection;
use uuid::Uuid;

use crate::memory::long_term::MemoryItem;

/// 后端能力：upsert / delete / load_all / nearest
#[async_trait]
pub trait MemoryBackend: Send + Sync {
    async fn upsert(&self, item: &MemoryItem) -> Result<(), String>;

    async fn delete(&self, id: Uuid) -> Result<(), String>;

    /// 启动恢复用：加载全部条目
    async fn load_all(&self) -> Result<Vec<MemoryItem>, String>;

    /// top-k 余弦近邻，按相似度降序；k=0 或查询向量为空时返回空
    async fn nearest(&self, query: &[f32], k: usize) -> Result<Vec<(Uuid, f32)>, String>;
}

/// 余弦相似度
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

/// 对条目集合做余弦排序取前 k；同分者最近访问的在前
fn rank_by_cosine(items: &[MemoryItem], query: &[f32], k: usize) -> Vec<(Uuid, f32)> {
    if k == 0 || query.is_empty() {
        return Vec::new();
    }
    let mut scored: Vec<(&MemoryItem, f32)> = items
        .iter()
        .filter(|i| !i.embedding.is_empty())
        .map(|i| (i, cosine_similarity(query, &i.embedding)))
        .collect();
    scored.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(b.0.last_accessed.cmp(&a.0.last_accessed))
    });
    scored
        .into_iter()
        .take(k)
        .map(|(item, score)| (item.id, score))
        .collect()
}

/// 内存后端：无持久化，默认运行与测试用
#[derive(Default)]
pub struct InMemoryBackend {
    items: RwLock<HashMap<Uuid, MemoryItem>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MemoryBackend for InMemoryBackend {
    async fn upsert(&self, item: &MemoryItem) -> Result<(), String> {
        self.items.write().unwrap().insert(item.id, item.clone());
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<(), String> {
        self.items.write().unwrap().remove(&id);
        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<MemoryItem>, String> {
        Ok(self.items.read().unwrap().values().cloned().collect())
    }

    async fn nearest(&self, query: &[f32], k: usize) -> Result<Vec<(Uuid, f32)>, String> {
        let items: Vec<MemoryItem> = self.items.read().unwrap().values().cloned().collect();
        Ok(rank_by_cosine(&items, query, k))
    }
}

/// 故障注入后端：所有操作返回错误，测试降级路径用
#[derive(Default)]
pub struct UnavailableBackend;

#[async_trait]
impl MemoryBackend for UnavailableBackend {
    async fn upsert(&self, _item: &MemoryItem) -> Result<(), String> {
        Err("backend down".to_string())
    }

    async fn delete(&self, _id: Uuid) -> Result<(), String> {
        Err("backend down".to_string())
    }

    async fn load_all(&self) -> Result<Vec<MemoryItem>, String> {
        Err("backend down".to_string())
    }

    async fn nearest(&self, _query: &[f32], _k: usize) -> Result<Vec<(Uuid, f32)>, String> {
        Err("backend down".to_string())
    }
}

/// SQLite 后端：单表存储，嵌入序列化为 JSON 列
pub struct SqliteBackend {
    conn: Mutex<Connection>,
}

impl SqliteBackend {
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS memory_items (
                id TEXT PRIMARY KEY,
                content TEXT NOT NULL,
                embedding TEXT NOT NULL,
                importance REAL NOT NULL,
                created_at TEXT NOT NULL,
                last_accessed TEXT NOT NULL,
                access_count INTEGER NOT NULL,
                expires_at TEXT
            );",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn row_to_item(row: &rusqlite::Row<'_>) -> rusqlite::Result<MemoryItem> {
        let id: String = row.get(0)?;
        let embedding_json: String = row.get(2)?;
        Ok(MemoryItem {
            id: Uuid::parse_str(&id).unwrap_or_else(|_| Uuid::nil()),
            content: row.get(1)?,
            embedding: serde_json::from_str(&embedding_json).unwrap_or_default(),
            importance: row.get(3)?,
            created_at: row.get(4)?,
            last_accessed: row.get(5)?,
            access_count: row.get::<_, i64>(6)? as u64,
            expires_at: row.get(7)?,
        })
    }

    fn load_all_sync(&self) -> Result<Vec<MemoryItem>, String> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT id, content, embedding, importance, created_at, last_accessed, access_count, expires_at
                 FROM memory_items",
            )
            .map_err(|e| e.to_string())?;
        let rows = stmt
            .query_map([], Self::row_to_item)
            .map_err(|e| e.to_string())?;
        let mut items = Vec::new();
        for row in rows {
            items.push(row.map_err(|e| e.to_string())?);
        }
        Ok(items)
    }
}

#[async_trait]
impl MemoryBackend for SqliteBackend {
    async fn upsert(&self, item: &MemoryItem) -> Result<(), String> {
        let embedding_json = serde_json::to_string(&item.embedding).map_err(|e| e.to_string())?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO memory_items
               (id, content, embedding, importance, created_at, last_accessed, access_count, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(id) DO UPDATE SET
               content = excluded.content,
               embedding = excluded.embedding,
               importance = excluded.importance,
               last_accessed = excluded.last_accessed,
               access_count = excluded.access_count,
               expires_at = excluded.expires_at",
            rusqlite::params![
                item.id.to_string(),
                item.content,
                embedding_json,
                item.importance,
                item.created_at,
                item.last_accessed,
                item.access_count as i64,
                item.expires_at,
            ],
        )
        .map_err(|e| e.to_string())?;
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<(), String> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM memory_items WHERE id = ?1",
            rusqlite::params![id.to_string()],
        )
        .map_err(|e| e.to_string())?;
        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<MemoryItem>, String> {
        self.load_all_sync()
    }

    async fn nearest(&self, query: &[f32], k: usize) -> Result<Vec<(Uuid, f32)>, String> {
        let items = self.load_all_sync()?;
        Ok(rank_by_cosine(&items, query, k))
    }
}
