pub mod agent;
pub mod cache;
pub mod config;
pub mod database;
pub mod guard;
pub mod knowledge;
pub mod language;
pub mod llm;
pub mod payment;
pub mod postprocess;
pub mod processing;
pub mod routing;
pub mod search;
pub mod service;
pub mod session;

// Re-export primary types for convenience
pub use config::ChatbotConfig;
pub use service::{ChatReply, ChatService};

pub use agent::{AgentDeps, Orchestrator, OrchestratorOutcome};
pub use cache::{CacheStats, ResponseCache};
pub use database::{MySqlUnitStore, Row, UnitStore};
pub use knowledge::KnowledgeBase;
pub use language::Language;
pub use routing::{Classification, Route};
pub use session::{SessionMemory, SessionStore};

// Re-export LLM types
pub use llm::{GenerationConfig, LLMManager, LLMProvider, OpenAIProvider, ProviderInfo};

// Re-export common types
pub use anyhow::{Error, Result};
