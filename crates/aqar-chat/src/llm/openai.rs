//! OpenAI-compatible chat-completions provider

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use super::{ChatMessage, ChatResponse, ChatRole, GenerationConfig, LLMProvider, ProviderInfo, ToolCall, ToolSchema};
use crate::config::LlmSettings;

const CONNECT_TIMEOUT_SECS: u64 = 15;
const BODY_PREVIEW_CHARS: usize = 300;
const POOL_IDLE_SECS: u64 = 90;

pub struct OpenAIProvider {
    endpoint: String,
    api_key: String,
    model: String,
    http: Client,
}

// Wire types. Borrowed so a request never clones the transcript.

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    max_tokens: usize,
    temperature: f32,
    top_p: f32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'static str>,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'a ChatRole,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireCall<'a>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
}

#[derive(Serialize)]
struct WireCall<'a> {
    id: &'a str,
    #[serde(rename = "type")]
    kind: &'static str,
    function: WireFunction<'a>,
}

#[derive(Serialize)]
struct WireFunction<'a> {
    name: &'a str,
    arguments: &'a str,
}

#[derive(Serialize)]
struct WireTool<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    function: WireToolSpec<'a>,
}

#[derive(Serialize)]
struct WireToolSpec<'a> {
    name: &'a str,
    description: &'a str,
    parameters: &'a Value,
}

#[derive(Debug, Deserialize)]
struct CompletionBody {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ReplyMessage,
}

#[derive(Debug, Deserialize)]
struct ReplyMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ReplyCall>>,
}

#[derive(Debug, Deserialize)]
struct ReplyCall {
    id: String,
    function: ReplyFunction,
}

#[derive(Debug, Deserialize)]
struct ReplyFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

impl<'a> WireMessage<'a> {
    fn from_message(m: &'a ChatMessage) -> Self {
        Self {
            role: &m.role,
            content: m.content.as_deref(),
            tool_calls: m.tool_calls.as_ref().map(|calls| {
                calls
                    .iter()
                    .map(|c| WireCall {
                        id: &c.id,
                        kind: "function",
                        function: WireFunction { name: &c.name, arguments: &c.arguments },
                    })
                    .collect()
            }),
            tool_call_id: m.tool_call_id.as_deref(),
            name: m.name.as_deref(),
        }
    }
}

impl<'a> WireTool<'a> {
    fn from_schema(t: &'a ToolSchema) -> Self {
        Self {
            kind: "function",
            function: WireToolSpec {
                name: &t.name,
                description: &t.description,
                parameters: &t.parameters,
            },
        }
    }
}

fn preview(body: &str) -> String {
    body.chars().take(BODY_PREVIEW_CHARS).collect()
}

/// Decodes a completion body. Gateway HTML pages get their own error.
fn decode_body(status: StatusCode, body: &str) -> Result<CompletionBody> {
    if body.trim_start().starts_with('<') {
        return Err(anyhow!(
            "LLM endpoint returned HTML instead of JSON (HTTP {}): {}",
            status,
            preview(body.trim_start())
        ));
    }
    serde_json::from_str(body)
        .with_context(|| format!("Malformed completion (HTTP {}): {}", status, preview(body)))
}

/// Tool calls win over text when the model sent both.
fn into_chat_response(body: CompletionBody) -> ChatResponse {
    let Some(choice) = body.choices.into_iter().next() else {
        return ChatResponse::Content(String::new());
    };
    let ReplyMessage { content, tool_calls } = choice.message;
    let tool_calls = tool_calls.unwrap_or_default();
    if tool_calls.is_empty() {
        return ChatResponse::Content(content.unwrap_or_default());
    }
    ChatResponse::ToolCalls(
        tool_calls
            .into_iter()
            .map(|c| ToolCall { id: c.id, name: c.function.name, arguments: c.function.arguments })
            .collect(),
    )
}

impl OpenAIProvider {
    pub fn new(settings: &LlmSettings) -> Result<Self> {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .timeout(Duration::from_secs(settings.timeout_secs))
            .pool_idle_timeout(Duration::from_secs(POOL_IDLE_SECS))
            .tcp_nodelay(true)
            .build()
            .context("Failed to build HTTP client")?;

        tracing::info!(model = %settings.model, base_url = %settings.base_url, "LLM provider configured");

        Ok(Self {
            endpoint: format!("{}/chat/completions", settings.base_url.trim_end_matches('/')),
            api_key: settings.api_key.clone(),
            model: settings.model.clone(),
            http,
        })
    }

    fn request<'a>(&'a self, messages: Vec<WireMessage<'a>>, config: &GenerationConfig) -> CompletionRequest<'a> {
        CompletionRequest {
            model: &self.model,
            messages,
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            top_p: config.top_p,
            tools: Vec::new(),
            tool_choice: None,
        }
    }

    async fn send(&self, request: &CompletionRequest<'_>) -> Result<CompletionBody> {
        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(endpoint = %self.endpoint, error = %e, "LLM request failed");
                if e.is_timeout() {
                    anyhow!("LLM request to {} timed out", self.endpoint)
                } else if e.is_connect() {
                    anyhow!("Could not reach LLM endpoint {}: {}", self.endpoint, e)
                } else {
                    anyhow!("LLM request to {} failed: {}", self.endpoint, e)
                }
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .with_context(|| format!("Failed to read LLM response from {}", self.endpoint))?;

        if !status.is_success() {
            tracing::error!(status = %status, body = %preview(&body), "LLM endpoint rejected request");
            return Err(anyhow!("API error ({}): {}", status, body));
        }
        decode_body(status, &body)
    }
}

#[async_trait]
impl LLMProvider for OpenAIProvider {
    async fn generate(&self, prompt: &str, config: &GenerationConfig) -> Result<String> {
        tracing::debug!(model = %self.model, prompt_len = prompt.len(), "Completion request");

        let user = ChatMessage::user(prompt);
        let request = self.request(vec![WireMessage::from_message(&user)], config);
        let body = self.send(&request).await?;

        body.choices
            .into_iter()
            .next()
            .map(|c| c.message.content.unwrap_or_default())
            .ok_or_else(|| anyhow!("No choices returned from API"))
    }

    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSchema],
        config: &GenerationConfig,
    ) -> Result<ChatResponse> {
        let mut request = self.request(messages.iter().map(WireMessage::from_message).collect(), config);
        if !tools.is_empty() {
            request.tools = tools.iter().map(WireTool::from_schema).collect();
            request.tool_choice = Some("auto");
        }

        tracing::debug!(
            model = %self.model,
            turns = messages.len(),
            tools = tools.len(),
            "Chat request"
        );
        Ok(into_chat_response(self.send(&request).await?))
    }

    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            name: "openai-compatible".to_string(),
            model: self.model.clone(),
            supports_functions: true,
        }
    }

    async fn is_ready(&self) -> bool {
        !self.api_key.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(body: Value) -> ChatResponse {
        into_chat_response(decode_body(StatusCode::OK, &body.to_string()).unwrap())
    }

    #[test]
    fn test_parse_tool_calls() {
        let body = json!({
            "choices": [{"message": {"content": null, "tool_calls": [
                {"id": "c1", "type": "function",
                 "function": {"name": "call_sql_agent", "arguments": "{\"query\":\"villas\"}"}}
            ]}}]
        });
        match parse(body) {
            ChatResponse::ToolCalls(calls) => {
                assert_eq!(calls.len(), 1);
                assert_eq!(calls[0].name, "call_sql_agent");
                assert_eq!(calls[0].arguments, "{\"query\":\"villas\"}");
            }
            other => panic!("expected tool calls, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_plain_content() {
        match parse(json!({"choices": [{"message": {"content": "Hello"}}]})) {
            ChatResponse::Content(text) => assert_eq!(text, "Hello"),
            other => panic!("expected content, got {:?}", other),
        }
    }

    #[test]
    fn test_html_body_is_reported() {
        let err = decode_body(StatusCode::OK, "<html>Bad gateway</html>").unwrap_err();
        assert!(err.to_string().contains("returned HTML"));
    }

    #[test]
    fn test_request_wire_shape() {
        let calls = vec![ToolCall { id: "c1".into(), name: "call_rag_agent".into(), arguments: "{}".into() }];
        let transcript = vec![
            ChatMessage::user("refund policy?"),
            ChatMessage::assistant_tool_calls(calls),
            ChatMessage::tool_result("c1", "call_rag_agent", "14 days"),
        ];
        let settings = LlmSettings { api_key: "k".into(), ..LlmSettings::default() };
        let provider = OpenAIProvider::new(&settings).unwrap();
        let schema = ToolSchema {
            name: "call_rag_agent".into(),
            description: "Policies".into(),
            parameters: json!({"type": "object"}),
        };

        let wire_messages = transcript.iter().map(WireMessage::from_message).collect();
        let mut request = provider.request(wire_messages, &GenerationConfig::default());
        request.tools = vec![WireTool::from_schema(&schema)];
        request.tool_choice = Some("auto");
        let wire = serde_json::to_value(&request).unwrap();

        assert_eq!(wire["messages"][0], json!({"role": "user", "content": "refund policy?"}));
        assert_eq!(wire["messages"][1]["tool_calls"][0]["function"]["name"], "call_rag_agent");
        assert_eq!(wire["messages"][1]["tool_calls"][0]["type"], "function");
        assert!(wire["messages"][1].get("content").is_none());
        assert_eq!(wire["messages"][2]["role"], "tool");
        assert_eq!(wire["messages"][2]["tool_call_id"], "c1");
        assert_eq!(wire["tools"][0]["function"]["description"], "Policies");
        assert_eq!(wire["tool_choice"], "auto");
    }

    #[test]
    fn test_endpoint_strips_trailing_slash() {
        let settings = LlmSettings {
            api_key: "k".into(),
            base_url: "http://localhost:8080/v1/".into(),
            ..LlmSettings::default()
        };
        let provider = OpenAIProvider::new(&settings).unwrap();
        assert_eq!(provider.endpoint, "http://localhost:8080/v1/chat/completions");
    }
}
