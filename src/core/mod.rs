//! 核心层：错误、状态机、请求上下文与编排器

pub mod context;
pub mod error;
pub mod orchestrator;
pub mod state;

pub use context::{RequestContext, Requirements, RetryBudget};
pub use error::{AgentError, FailureKind, ToolFailure};
pub use orchestrator::{AgentResponse, Orchestrator, OrchestratorConfig};
pub use state::{transition, Event, Phase};
