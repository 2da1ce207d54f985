//! Scripted provider for tests: replays queued responses in order.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

use super::{
    ChatMessage, ChatResponse, GenerationConfig, LLMManager, LLMProvider, ProviderInfo, ToolCall,
    ToolSchema,
};

#[derive(Debug, Clone)]
pub enum Scripted {
    Text(String),
    Tools(Vec<ToolCall>),
    Fail(String),
}

#[derive(Default)]
pub struct ScriptedProvider {
    queue: Mutex<VecDeque<Scripted>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    pub fn new(steps: Vec<Scripted>) -> Arc<Self> {
        Arc::new(Self {
            queue: Mutex::new(steps.into()),
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn manager(self: &Arc<Self>) -> LLMManager {
        LLMManager::with_provider(self.clone(), GenerationConfig::default())
    }

    /// Every prompt or last chat message seen, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }

    pub fn remaining(&self) -> usize {
        self.queue.lock().len()
    }

    fn next(&self) -> Result<Scripted> {
        self.queue
            .lock()
            .pop_front()
            .ok_or_else(|| anyhow!("scripted provider exhausted"))
    }
}

pub fn text(s: &str) -> Scripted {
    Scripted::Text(s.to_string())
}

pub fn tool(id: &str, name: &str, arguments: serde_json::Value) -> Scripted {
    Scripted::Tools(vec![ToolCall {
        id: id.to_string(),
        name: name.to_string(),
        arguments: arguments.to_string(),
    }])
}

#[async_trait]
impl LLMProvider for ScriptedProvider {
    async fn generate(&self, prompt: &str, _config: &GenerationConfig) -> Result<String> {
        self.prompts.lock().push(prompt.to_string());
        match self.next()? {
            Scripted::Text(t) => Ok(t),
            Scripted::Tools(_) => Err(anyhow!("tool calls scripted for a plain completion")),
            Scripted::Fail(e) => Err(anyhow!(e)),
        }
    }

    async fn chat(
        &self,
        messages: &[ChatMessage],
        _tools: &[ToolSchema],
        _config: &GenerationConfig,
    ) -> Result<ChatResponse> {
        let last = messages
            .last()
            .and_then(|m| m.content.clone())
            .unwrap_or_default();
        self.prompts.lock().push(last);
        match self.next()? {
            Scripted::Text(t) => Ok(ChatResponse::Content(t)),
            Scripted::Tools(calls) => Ok(ChatResponse::ToolCalls(calls)),
            Scripted::Fail(e) => Err(anyhow!(e)),
        }
    }

    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            name: "scripted".to_string(),
            model: "scripted".to_string(),
            supports_functions: true,
        }
    }

    async fn is_ready(&self) -> bool {
        true
    }
}
