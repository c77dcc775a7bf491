//! 记忆层：会话内短期记忆、跨会话长期记忆、剪枝与检索

pub mod backend;
pub mod long_term;
pub mod pruning;
pub mod retriever;
pub mod short_term;

pub use backend::{cosine_similarity, InMemoryBackend, MemoryBackend, SqliteBackend, UnavailableBackend};
pub use long_term::{LongTermConfig, LongTermMemory, MemoryFilter, MemoryItem};
pub use pruning::{HybridWeights, LlmRescorer, PruneStrategy, Rescorer};
pub use retriever::{RetrievalResult, Retriever};
pub use short_term::{estimate_tokens, RecordKind, SessionRecord, ShortTermMemory};
