use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;

use super::context::AgentContext;
use super::tools::{AgentTool, ToolInput, ToolResult};
use crate::language::translate_codes;
use crate::llm::LLMManager;

/// Translation between English, Arabic and Franco-Arabic for the orchestrator.
pub struct TranslateTool {
    llm: LLMManager,
}

impl TranslateTool {
    pub fn new(llm: LLMManager) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl AgentTool for TranslateTool {
    fn id(&self) -> &str {
        "translate_text"
    }

    fn name(&self) -> &str {
        "Translate Text"
    }

    fn description(&self) -> &str {
        "Translate text between Franco-Arabic, Arabic, and English. Use when database results need translation to user's language."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "text": {
                    "type": "string",
                    "description": "The text to translate"
                },
                "source_lang": {
                    "type": "string",
                    "enum": ["franco", "ar", "en"],
                    "description": "Source language code"
                },
                "target_lang": {
                    "type": "string",
                    "enum": ["franco", "ar", "en"],
                    "description": "Target language code"
                }
            },
            "required": ["text", "source_lang", "target_lang"]
        })
    }

    async fn execute(&self, input: ToolInput, _context: AgentContext) -> Result<ToolResult> {
        let text = input.str_param("text")?;
        let source = input.str_param("source_lang")?;
        let target = input.str_param("target_lang")?;

        let translated = translate_codes(text, source, target, &self.llm).await;
        Ok(ToolResult::ok(translated))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::scripted::{text, ScriptedProvider};
    use crate::session::SessionMemory;
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn ctx() -> AgentContext {
        AgentContext::new("t", Arc::new(Mutex::new(SessionMemory::new())))
    }

    #[tokio::test]
    async fn test_translates_via_llm() {
        let provider = ScriptedProvider::new(vec![text("El se3r 2 million EGP")]);
        let tool = TranslateTool::new(provider.manager());
        let input = ToolInput {
            tool_id: "translate_text".into(),
            parameters: json!({"text": "The price is 2 million EGP", "source_lang": "en", "target_lang": "franco"}),
        };

        let result = tool.execute(input, ctx()).await.unwrap();
        assert_eq!(result.output, "El se3r 2 million EGP");
    }

    #[tokio::test]
    async fn test_same_language_is_untouched() {
        let provider = ScriptedProvider::new(vec![]);
        let tool = TranslateTool::new(provider.manager());
        let input = ToolInput {
            tool_id: "translate_text".into(),
            parameters: json!({"text": "hello", "source_lang": "en", "target_lang": "english"}),
        };

        let result = tool.execute(input, ctx()).await.unwrap();
        assert_eq!(result.output, "hello");
        assert!(provider.prompts().is_empty());
    }
}
