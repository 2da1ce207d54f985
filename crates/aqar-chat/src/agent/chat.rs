//! Chat agent: greetings, capability questions and steering off-topic
//! requests back to real estate.

use anyhow::Result;
use async_trait::async_trait;

use super::context::AgentContext;
use super::tools::{single_string_schema, AgentTool, ToolInput, ToolResult};
use crate::language::{self, Language};
use crate::llm::LLMManager;

pub const APOLOGY_EN: &str = "I apologize, but I'm a real estate assistant and can only help with property-related questions. Please feel free to ask me about available properties, units, prices, locations, or any real estate information!";
pub const APOLOGY_AR: &str = "أعتذر، أنا مساعد عقاري ويمكنني المساعدة فقط في الأسئلة المتعلقة بالعقارات. لا تتردد في سؤالي عن العقارات المتاحة، الوحدات، الأسعار، المواقع، أو أي معلومات عقارية!";
pub const APOLOGY_FRANCO: &str = "Ana assef, ana mosa3ed 3a2ary w momken asa3dak bas fel as2ela el mota3ale2a bel 3a2arat. Matro2sh tesalny 3an el 3a2arat el mota7a, el wa7dat, el as3ar, el amaken, aw ay ma3lomat 3a2arya!";

pub fn chat_prompt(request: &str, language: Language) -> String {
    format!(
        r#"You are a dedicated Real Estate Assistant. Your primary and ONLY mission is to help users with real estate inquiries.

User request: "{request}"

CRITICAL LANGUAGE INSTRUCTION: {instruction}
You MUST respond in the EXACT SAME language the user used in their request. This is absolutely mandatory.

**STRICT SCOPE DEFINITION:**
- **In-Scope**: Properties, apartments, villas, compounds, developers, real estate prices, locations, payment plans, installments, amenities, real estate market trends, buying/renting procedures.
- **In-Scope (Greetings)**: General greetings (Hi, Hello, how are you) and questions about your capabilities as a real estate assistant.
- **OUT-OF-SCOPE (STRICTLY FORBIDDEN)**: Cooking, recipes, sports, politics, general news, weather, philosophy, math, science, history, entertainment, jokes, or any personal advice unrelated to properties.

**HARD RULE:**
**IMPORTANT**If the user's request is OUT-OF-SCOPE(OUT OF REAL ESTATE SCOPE), you MUST NOT answer it, even if you know the answer. You MUST politely decline using one of the following templates based on the language:

- **English (en)**: "{en}"
- **Arabic (ar)**: "{ar}"
- **Franco-Arabic (franco)**: "{franco}"

**Instructions and very important:**
1. If GREETING → Respond warmly as a real estate assistant.
2. If IN-SCOPE real estate question → Provide a helpful, professional answer.
3. If OUT-OF-SCOPE → Return the apology template EXACTLY.

Your response:"#,
        request = request,
        instruction = language::instruction(language),
        en = APOLOGY_EN,
        ar = APOLOGY_AR,
        franco = APOLOGY_FRANCO,
    )
}

pub struct ChatAgentTool {
    llm: LLMManager,
}

impl ChatAgentTool {
    pub fn new(llm: LLMManager) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl AgentTool for ChatAgentTool {
    fn id(&self) -> &str {
        "call_chat_agent"
    }

    fn name(&self) -> &str {
        "Chat Agent"
    }

    fn description(&self) -> &str {
        "Handle Greetings and General Conversation."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        single_string_schema("user_request", "The user's message")
    }

    async fn execute(&self, input: ToolInput, context: AgentContext) -> Result<ToolResult> {
        let request = input.str_param("user_request")?;
        context.with_session(|s| s.flags.chat_agent_used = true);

        let reply = self.llm.complete(&chat_prompt(request, context.language)).await?;
        Ok(ToolResult::ok(reply))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::scripted::{text, ScriptedProvider};
    use crate::session::SessionMemory;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_chat_agent_marks_session() {
        let provider = ScriptedProvider::new(vec![text("Hello! How can I help you find a home?")]);
        let tool = ChatAgentTool::new(provider.manager());
        let ctx = AgentContext::new("c", Arc::new(Mutex::new(SessionMemory::new())));

        let result = tool
            .execute(
                ToolInput {
                    tool_id: "call_chat_agent".into(),
                    parameters: serde_json::json!({"user_request": "hi"}),
                },
                ctx.clone(),
            )
            .await
            .unwrap();

        assert_eq!(result.output, "Hello! How can I help you find a home?");
        assert!(ctx.session.lock().flags.chat_agent_used);
        let prompt = &provider.prompts()[0];
        assert!(prompt.contains("User request: \"hi\""));
        assert!(prompt.contains(APOLOGY_FRANCO));
    }

    #[tokio::test]
    async fn test_wrong_parameter_name_fails() {
        let tool = ChatAgentTool::new(ScriptedProvider::new(vec![]).manager());
        let ctx = AgentContext::new("c", Arc::new(Mutex::new(SessionMemory::new())));
        let err = tool
            .execute(
                ToolInput {
                    tool_id: "call_chat_agent".into(),
                    parameters: serde_json::json!({"query": "hi"}),
                },
                ctx.clone(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Missing user_request parameter");
        assert!(!ctx.session.lock().flags.chat_agent_used);
    }
}
