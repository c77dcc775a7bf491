//! LLM 层：客户端与嵌入抽象及实现（OpenAI 兼容 / Mock）

pub mod mock;
pub mod openai;
pub mod traits;

pub use mock::{FailingEmbedder, FailingLlmClient, MockEmbedder, MockLlmClient};
pub use openai::{OpenAiClient, OpenAiEmbedder};
pub use traits::{EmbeddingProvider, LlmClient, Message, Role};
