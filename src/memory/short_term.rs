//! 短期记忆：会话内的对话轮次与工具调用记录
//!
//! 双上限（条数 + token 估算）滑动窗口，append 时同步淘汰最旧记录，
//! 调用方永远观察不到超限的窗口；search 只过滤，不触发淘汰也不改变顺序。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 记录类别
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum RecordKind {
    /// 对话轮次（user / assistant）
    Turn { role: String },
    /// 工具调用记录（含成败）
    ToolCall { tool: String, success: bool },
    /// 系统事件（阶段切换、降级说明等）
    SystemEvent,
}

/// 单条会话记录；tokens 为估算成本，参与窗口预算
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionRecord {
    pub kind: RecordKind,
    pub content: String,
    pub tokens: usize,
    pub timestamp: DateTime<Utc>,
}

impl SessionRecord {
    pub fn new(kind: RecordKind, content: impl Into<String>) -> Self {
        let content = content.into();
        let tokens = estimate_tokens(&content);
        Self {
            kind,
            content,
            tokens,
            timestamp: Utc::now(),
        }
    }
}

/// 估算文本 token 数：英文约 4 字符/token，其他文字约 1.5 字符/token
pub fn estimate_tokens(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }
    let mut ascii_chars = 0usize;
    let mut non_ascii_chars = 0usize;
    for c in text.chars() {
        if c.is_ascii() {
            ascii_chars += 1;
        } else {
            non_ascii_chars += 1;
        }
    }
    let tokens = ascii_chars / 4 + (non_ascii_chars as f64 / 1.5).ceil() as usize;
    tokens.max(1)
}

/// 会话级短期记忆：有序记录 + 累计 token；一个活跃会话一份
#[derive(Debug)]
pub struct ShortTermMemory {
    session_id: String,
    records: Vec<SessionRecord>,
    total_tokens: usize,
    max_items: usize,
    max_tokens: usize,
}

impl ShortTermMemory {
    pub fn new(max_items: usize, max_tokens: usize) -> Self {
        Self {
            session_id: Uuid::new_v4().to_string(),
            records: Vec::new(),
            total_tokens: 0,
            max_items,
            max_tokens,
        }
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// 追加一条记录并同步淘汰；淘汰后两项上限同时满足
    pub fn append(&mut self, record: SessionRecord) {
        self.total_tokens += record.tokens;
        self.records.push(record);
        self.evict_if_needed();
    }

    pub fn add_turn(&mut self, role: &str, content: impl Into<String>) {
        self.append(SessionRecord::new(
            RecordKind::Turn {
                role: role.to_string(),
            },
            content,
        ));
    }

    pub fn add_tool_call(&mut self, tool: &str, detail: impl Into<String>, success: bool) {
        self.append(SessionRecord::new(
            RecordKind::ToolCall {
                tool: tool.to_string(),
                success,
            },
            detail,
        ));
    }

    pub fn add_system_event(&mut self, message: impl Into<String>) {
        self.append(SessionRecord::new(RecordKind::SystemEvent, message));
    }

    /// 当前窗口（保留插入顺序）
    pub fn window(&self) -> &[SessionRecord] {
        &self.records
    }

    /// 按谓词过滤记录；不淘汰、不改变顺序
    pub fn search<'a>(&'a self, predicate: impl Fn(&SessionRecord) -> bool) -> Vec<&'a SessionRecord> {
        self.records.iter().filter(|r| predicate(r)).collect()
    }

    pub fn total_tokens(&self) -> usize {
        self.total_tokens
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        self.records.clear();
        self.total_tokens = 0;
    }

    /// 先按条数、再按 token 淘汰，都从最旧开始
    fn evict_if_needed(&mut self) {
        while self.records.len() > self.max_items {
            let removed = self.records.remove(0);
            self.total_tokens = self.total_tokens.saturating_sub(removed.tokens);
        }
        while self.total_tokens > self.max_tokens && !self.records.is_empty() {
            let removed = self.records.remove(0);
            self.total_tokens = self.total_tokens.saturating_sub(removed.tokens);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turn(content: &str) -> SessionRecord {
        SessionRecord::new(
            RecordKind::Turn {
                role: "user".to_string(),
            },
            content,
        )
    }

    #[test]
    fn test_limits_hold_after_any_append_sequence() {
        let mut stm = ShortTermMemory::new(5, 100);
        for i in 0..50 {
            stm.append(turn(&format!("message number {} with some padding text", i)));
            assert!(stm.len() <= 5);
            assert!(stm.total_tokens() <= 100);
            let sum: usize = stm.window().iter().map(|r| r.tokens).sum();
            assert_eq!(sum, stm.total_tokens());
        }
    }

    #[test]
    fn test_eviction_is_oldest_first() {
        let mut stm = ShortTermMemory::new(3, 10_000);
        stm.append(turn("first"));
        stm.append(turn("second"));
        stm.append(turn("third"));
        stm.append(turn("fourth"));
        let contents: Vec<&str> = stm.window().iter().map(|r| r.content.as_str()).collect();
        assert_eq!(contents, vec!["second", "third", "fourth"]);
    }

    #[test]
    fn test_token_limit_evicts_equal_cost_oldest_first() {
        // 等 token 成本的记录，先插入者先被淘汰
        let mut stm = ShortTermMemory::new(100, 20);
        for label in ["aaaa-aaaa-aaaa-aaaa", "bbbb-bbbb-bbbb-bbbb", "cccc-cccc-cccc-cccc", "dddd-dddd-dddd-dddd", "eeee-eeee-eeee-eeee", "ffff-ffff-ffff-ffff"] {
            stm.append(turn(label));
        }
        assert!(stm.total_tokens() <= 20);
        let first = &stm.window()[0].content;
        assert!(!first.starts_with("aaaa"), "oldest record should be evicted first");
    }

    #[test]
    fn test_search_does_not_mutate() {
        let mut stm = ShortTermMemory::new(10, 10_000);
        stm.add_turn("user", "going to Paris");
        stm.add_tool_call("weather", "forecast fetched", true);
        stm.add_tool_call("fx", "rate fetched", false);

        let tool_calls = stm.search(|r| matches!(r.kind, RecordKind::ToolCall { .. }));
        assert_eq!(tool_calls.len(), 2);
        let failed = stm.search(|r| matches!(r.kind, RecordKind::ToolCall { success: false, .. }));
        assert_eq!(failed.len(), 1);
        assert_eq!(stm.len(), 3);
    }

    #[test]
    fn test_estimate_tokens_minimum_one() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("a"), 1);
        assert!(estimate_tokens("hello world, a longer sentence") > 1);
    }
}
