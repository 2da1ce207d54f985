//! LLM Module - chat-completions access for every pipeline stage
//! One provider per process, shared by the guard, classifier, agents and translator.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;

use crate::config::LlmSettings;

pub mod openai;
#[cfg(test)]
pub mod scripted;

pub use openai::OpenAIProvider;

/// A chat-completions backend.
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// One user prompt in, assistant text out.
    async fn generate(&self, prompt: &str, config: &GenerationConfig) -> Result<String>;

    /// Transcript completion. Backends without function calling flatten the
    /// transcript into one prompt and never return tool calls.
    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSchema],
        config: &GenerationConfig,
    ) -> Result<ChatResponse> {
        let _ = tools;
        let prompt = messages
            .iter()
            .filter_map(|m| Some(format!("{:?}: {}", m.role, m.content.as_deref()?)))
            .collect::<Vec<_>>()
            .join("\n");
        self.generate(&prompt, config).await.map(ChatResponse::Content)
    }

    fn info(&self) -> ProviderInfo;

    /// Whether requests can be sent.
    async fn is_ready(&self) -> bool;
}

/// Sampling settings sent with every request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    pub max_tokens: usize,
    pub temperature: f32,
    pub top_p: f32,
}

impl From<&LlmSettings> for GenerationConfig {
    fn from(settings: &LlmSettings) -> Self {
        Self {
            max_tokens: settings.max_tokens,
            temperature: settings.temperature,
            top_p: 1.0,
        }
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self::from(&LlmSettings::default())
    }
}

/// One transcript entry in the chat-completions wire shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: Option<String>,
    /// Set on assistant turns that delegate to agents.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    /// Set on tool turns, echoing the originating call id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ChatMessage {
    fn plain(role: ChatRole, content: impl Into<String>) -> Self {
        Self { role, content: Some(content.into()), tool_calls: None, tool_call_id: None, name: None }
    }
    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(ChatRole::System, content)
    }
    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(ChatRole::User, content)
    }
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(ChatRole::Assistant, content)
    }
    pub fn assistant_tool_calls(tool_calls: Vec<ToolCall>) -> Self {
        Self { role: ChatRole::Assistant, content: None, tool_calls: Some(tool_calls), tool_call_id: None, name: None }
    }
    pub fn tool_result(tool_call_id: impl Into<String>, name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Tool,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: Some(tool_call_id.into()),
            name: Some(name.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
    Tool,
}

/// Agent delegation requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Raw JSON object text, parsed by the loop.
    pub arguments: String,
}

/// Function definition offered to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: JsonValue,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ChatResponse {
    Content(String),
    ToolCalls(Vec<ToolCall>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderInfo {
    pub name: String,
    pub model: String,
    pub supports_functions: bool,
}

/// Shared handle to the configured provider.
#[derive(Clone)]
pub struct LLMManager {
    config: GenerationConfig,
    provider: Option<Arc<dyn LLMProvider>>,
}

impl LLMManager {
    /// Manager without a provider; every call fails until one is set.
    pub fn new(config: GenerationConfig) -> Self {
        Self { config, provider: None }
    }

    /// Build the OpenAI-compatible provider from settings.
    /// An empty API key leaves the manager uninitialized rather than failing startup.
    pub fn from_settings(settings: &LlmSettings) -> Result<Self> {
        let mut manager = Self::new(GenerationConfig::from(settings));
        if settings.api_key.trim().is_empty() {
            tracing::warn!("OPENAI_API_KEY not set, LLM calls will fail");
            return Ok(manager);
        }
        let provider = OpenAIProvider::new(settings)?;
        manager.provider = Some(Arc::new(provider));
        Ok(manager)
    }

    pub fn with_provider(provider: Arc<dyn LLMProvider>, config: GenerationConfig) -> Self {
        Self { config, provider: Some(provider) }
    }

    fn provider(&self) -> Result<&Arc<dyn LLMProvider>> {
        self.provider
            .as_ref()
            .ok_or_else(|| anyhow!("LLM is not initialized"))
    }

    /// Single-prompt completion with the default generation settings
    pub async fn complete(&self, prompt: &str) -> Result<String> {
        self.provider()?.generate(prompt, &self.config).await
    }

    /// Single-prompt completion with a temperature override (classifier, guard).
    pub async fn complete_with_temperature(&self, prompt: &str, temperature: f32) -> Result<String> {
        let mut config = self.config.clone();
        config.temperature = temperature;
        self.provider()?.generate(prompt, &config).await
    }

    /// Transcript completion offering `tools`; an empty slice disables function calling.
    pub async fn chat(&self, messages: &[ChatMessage], tools: &[ToolSchema]) -> Result<ChatResponse> {
        self.provider()?.chat(messages, tools, &self.config).await
    }

    pub fn info(&self) -> Option<ProviderInfo> {
        self.provider.as_deref().map(|p| p.info())
    }

    pub async fn is_ready(&self) -> bool {
        if let Some(provider) = &self.provider {
            provider.is_ready().await
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_uninitialized_manager_errors() {
        let manager = LLMManager::new(GenerationConfig::default());
        let err = manager.complete("hello").await.unwrap_err();
        assert_eq!(err.to_string(), "LLM is not initialized");
        assert!(!manager.is_ready().await);
        assert!(manager.info().is_none());
    }

    #[test]
    fn test_empty_key_leaves_manager_uninitialized() {
        let manager = LLMManager::from_settings(&LlmSettings::default()).unwrap();
        assert!(manager.info().is_none());
    }

    #[test]
    fn test_tool_result_message_shape() {
        let msg = ChatMessage::tool_result("call_1", "call_sql_agent", "rows");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "tool");
        assert_eq!(json["tool_call_id"], "call_1");
        assert!(json.get("tool_calls").is_none());
    }
}
