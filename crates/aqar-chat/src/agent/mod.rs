//! Agent System - orchestrator and specialist tools
//!
//! The orchestrator runs a tool-calling loop over the specialists:
//! - SQL agent: unit search and payment plans
//! - RAG agent: policies, company and project information
//! - Chat agent: greetings and off-topic steering
//! - Translation and unit price helpers

pub mod chat;
pub mod context;
pub mod orchestrator;
pub mod price;
pub mod rag;
pub mod sql;
pub mod tool_loop;
pub mod tools;
pub mod translate;

pub use context::AgentContext;
pub use orchestrator::{route_from_flags, Orchestrator, OrchestratorOutcome};
pub use tool_loop::{run_tool_loop, ToolInvocation, ToolLoopConfig, ToolLoopResult};
pub use tools::{AgentDeps, AgentTool, ToolDescription, ToolInput, ToolRegistry, ToolResult};
