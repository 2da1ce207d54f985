//! Agent Tools - specialists the orchestrator can call

use super::context::AgentContext;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use super::chat::ChatAgentTool;
use super::price::PriceTool;
use super::rag::RagAgentTool;
use super::sql::SqlAgentTool;
use super::translate::TranslateTool;
use crate::database::UnitStore;
use crate::knowledge::KnowledgeBase;
use crate::llm::LLMManager;

/// Arguments the orchestrator passed to an agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInput {
    pub tool_id: String,
    /// Decoded JSON arguments; `{}` when the model sent invalid JSON.
    pub parameters: serde_json::Value,
}

impl ToolInput {
    /// Required string parameter.
    pub fn str_param(&self, name: &str) -> Result<&str> {
        self.parameters[name]
            .as_str()
            .ok_or_else(|| anyhow!("Missing {} parameter", name))
    }
}

/// What an agent hands back for the tool transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,

    /// Text handed back to the orchestrator
    pub output: String,

    /// Machine-readable companion to `output` (rows, discounts).
    pub data: serde_json::Value,

    pub error: Option<String>,
}

impl ToolResult {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            data: serde_json::json!({}),
            error: None,
        }
    }

    pub fn failed(output: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: output.into(),
            data: serde_json::json!({}),
            error: Some(error.into()),
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }
}

#[async_trait]
pub trait AgentTool: Send + Sync {
    /// Function name exposed to the LLM
    fn id(&self) -> &str;

    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON Schema object for the arguments.
    fn parameters_schema(&self) -> serde_json::Value;

    async fn execute(&self, input: ToolInput, context: AgentContext) -> Result<ToolResult>;
}

/// Collaborators shared by the specialist tools.
#[derive(Clone)]
pub struct AgentDeps {
    pub llm: LLMManager,
    pub store: Arc<dyn UnitStore>,
    pub knowledge: Arc<KnowledgeBase>,
    /// Chunks retrieved per RAG answer
    pub rag_chunk_count: usize,
}

/// Agents keyed by function name.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn AgentTool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The five specialists the orchestrator routes between.
    pub fn real_estate(deps: &AgentDeps) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(SqlAgentTool::new(deps.llm.clone(), deps.store.clone())));
        registry.register(Arc::new(RagAgentTool::new(
            deps.llm.clone(),
            deps.knowledge.clone(),
            deps.rag_chunk_count,
        )));
        registry.register(Arc::new(ChatAgentTool::new(deps.llm.clone())));
        registry.register(Arc::new(TranslateTool::new(deps.llm.clone())));
        registry.register(Arc::new(PriceTool::new(deps.store.clone())));
        registry
    }

    pub fn register(&mut self, tool: Arc<dyn AgentTool>) {
        self.tools.insert(tool.id().to_string(), tool);
    }

    pub fn get(&self, tool_id: &str) -> Option<Arc<dyn AgentTool>> {
        self.tools.get(tool_id).cloned()
    }

    pub fn list(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.tools.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Descriptions sorted by id so the prompt is stable across runs.
    pub fn get_tool_descriptions(&self) -> Vec<ToolDescription> {
        let mut descriptions: Vec<ToolDescription> = self
            .tools
            .values()
            .map(|tool| ToolDescription {
                id: tool.id().to_string(),
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                parameters_schema: tool.parameters_schema(),
            })
            .collect();
        descriptions.sort_by(|a, b| a.id.cmp(&b.id));
        descriptions
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescription {
    pub id: String,
    pub name: String,
    pub description: String,
    pub parameters_schema: serde_json::Value,
}

/// Schema for tools that take a single string argument.
pub(crate) fn single_string_schema(param: &str, description: &str) -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            param: {
                "type": "string",
                "description": description
            }
        },
        "required": [param]
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::InMemoryUnitStore;
    use crate::llm::scripted::ScriptedProvider;

    #[test]
    fn test_registry_exposes_specialists() {
        let deps = AgentDeps {
            llm: ScriptedProvider::new(vec![]).manager(),
            store: InMemoryUnitStore::new(),
            knowledge: Arc::new(KnowledgeBase::uninitialized()),
            rag_chunk_count: 35,
        };
        let registry = ToolRegistry::real_estate(&deps);
        assert_eq!(
            registry.list(),
            vec![
                "call_chat_agent",
                "call_rag_agent",
                "call_sql_agent",
                "get_unit_price_with_discount",
                "translate_text",
            ]
        );
        let descriptions = registry.get_tool_descriptions();
        assert_eq!(descriptions[2].parameters_schema["required"][0], "query");
        assert!(registry.get("safety_guard_tool").is_none());
    }

    #[test]
    fn test_missing_parameter_is_an_error() {
        let input = ToolInput {
            tool_id: "call_sql_agent".into(),
            parameters: serde_json::json!({}),
        };
        assert!(input.str_param("query").is_err());
    }
}
