//! Bounded tool-calling loop driving the orchestrator.
//!
//! Each round asks the model for either a final answer or a batch of tool
//! calls; tool outputs go back into the transcript before the next round.

use anyhow::{anyhow, Result};
use serde_json::{json, Value};
use std::time::{Duration, Instant};

use super::context::AgentContext;
use super::tools::{ToolDescription, ToolInput, ToolRegistry, ToolResult};
use crate::llm::{ChatMessage, ChatResponse, LLMManager, ToolCall, ToolSchema};

pub const MAX_ITERATIONS_FALLBACK: &str = "I was unable to complete the task within the allowed number of tool calls. \
     Here is what I found so far based on the tool results above.";

#[derive(Debug, Clone)]
pub struct ToolLoopConfig {
    /// Rounds with tools enabled before a tool-less final request.
    pub max_iterations: usize,
    /// Seconds a single agent may run.
    pub tool_timeout_secs: u64,
}

impl Default for ToolLoopConfig {
    fn default() -> Self {
        Self {
            max_iterations: 6,
            tool_timeout_secs: 60,
        }
    }
}

/// One agent call made during a turn.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ToolInvocation {
    pub tool_name: String,
    pub arguments: Value,
    pub result: String,
    pub success: bool,
    pub duration_ms: u64,
}

#[derive(Debug, Clone)]
pub struct ToolLoopResult {
    pub content: String,
    pub tool_invocations: Vec<ToolInvocation>,
    /// Model requests made, including the forced final one.
    pub iterations: usize,
}

pub async fn run_tool_loop(
    llm: &LLMManager,
    tool_registry: &ToolRegistry,
    messages: &mut Vec<ChatMessage>,
    tool_schemas: &[ToolSchema],
    agent_context: &AgentContext,
    config: &ToolLoopConfig,
) -> Result<ToolLoopResult> {
    let mut trace = Vec::new();

    for round in 1..=config.max_iterations {
        tracing::debug!(round, "Requesting orchestrator step");
        let calls = match llm.chat(messages, tool_schemas).await? {
            ChatResponse::Content(content) => {
                return Ok(ToolLoopResult {
                    content,
                    tool_invocations: trace,
                    iterations: round,
                });
            }
            ChatResponse::ToolCalls(calls) => calls,
        };

        let names: Vec<&str> = calls.iter().map(|c| c.name.as_str()).collect();
        tracing::info!(round, agents = ?names, "Orchestrator delegated to agents");

        messages.push(ChatMessage::assistant_tool_calls(calls.clone()));
        for call in &calls {
            let record = dispatch(tool_registry, call, agent_context, config.tool_timeout_secs).await;
            messages.push(ChatMessage::tool_result(&call.id, &call.name, &record.result));
            trace.push(record);
        }
    }

    tracing::warn!(max = config.max_iterations, "Agent round limit reached, asking for a plain answer");
    let content = match llm.chat(messages, &[]).await? {
        ChatResponse::Content(content) => content,
        ChatResponse::ToolCalls(_) => MAX_ITERATIONS_FALLBACK.to_string(),
    };
    Ok(ToolLoopResult {
        content,
        tool_invocations: trace,
        iterations: config.max_iterations + 1,
    })
}

fn parse_arguments(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| json!({}))
}

/// Runs one call and logs it to the session's agent communications.
async fn dispatch(
    registry: &ToolRegistry,
    call: &ToolCall,
    ctx: &AgentContext,
    timeout_secs: u64,
) -> ToolInvocation {
    let started = Instant::now();
    let (result, success) = match invoke(registry, call, ctx, timeout_secs).await {
        Ok(outcome) => (outcome.output, outcome.success),
        Err(e) => (format!("Tool execution error: {}", e), false),
    };

    ctx.with_session(|s| s.record_communication(&call.name, &call.arguments, &result, success));

    ToolInvocation {
        tool_name: call.name.clone(),
        arguments: parse_arguments(&call.arguments),
        result,
        success,
        duration_ms: started.elapsed().as_millis() as u64,
    }
}

async fn invoke(
    registry: &ToolRegistry,
    call: &ToolCall,
    ctx: &AgentContext,
    timeout_secs: u64,
) -> Result<ToolResult> {
    let agent = registry
        .get(&call.name)
        .ok_or_else(|| anyhow!("Unknown tool: {}", call.name))?;

    let input = ToolInput {
        tool_id: call.name.clone(),
        parameters: parse_arguments(&call.arguments),
    };

    tokio::time::timeout(Duration::from_secs(timeout_secs), agent.execute(input, ctx.clone()))
        .await
        .unwrap_or_else(|_| {
            Ok(ToolResult::failed(
                format!("Tool '{}' timed out after {}s", call.name, timeout_secs),
                "timeout",
            ))
        })
}

/// Function-calling schemas for every registered agent.
pub fn tool_descriptions_to_schemas(descriptions: &[ToolDescription]) -> Vec<ToolSchema> {
    descriptions
        .iter()
        .map(|desc| ToolSchema {
            name: desc.id.clone(),
            description: desc.description.clone(),
            parameters: desc.parameters_schema.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::scripted::{text, tool, ScriptedProvider};
    use crate::session::SessionMemory;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::Arc;

    struct EchoTool;

    #[async_trait]
    impl crate::agent::tools::AgentTool for EchoTool {
        fn id(&self) -> &str {
            "echo"
        }
        fn name(&self) -> &str {
            "Echo"
        }
        fn description(&self) -> &str {
            "Echo the query back"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            crate::agent::tools::single_string_schema("query", "text")
        }
        async fn execute(&self, input: ToolInput, _context: AgentContext) -> Result<ToolResult> {
            Ok(ToolResult::ok(format!("echo: {}", input.str_param("query")?)))
        }
    }

    struct SlowTool;

    #[async_trait]
    impl crate::agent::tools::AgentTool for SlowTool {
        fn id(&self) -> &str {
            "slow"
        }
        fn name(&self) -> &str {
            "Slow"
        }
        fn description(&self) -> &str {
            "Never finishes in time"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object", "properties": {}})
        }
        async fn execute(&self, _input: ToolInput, _context: AgentContext) -> Result<ToolResult> {
            tokio::time::sleep(std::time::Duration::from_secs(5)).await;
            Ok(ToolResult::ok("late"))
        }
    }

    fn setup() -> (ToolRegistry, AgentContext) {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        registry.register(Arc::new(SlowTool));
        let ctx = AgentContext::new("t", Arc::new(Mutex::new(SessionMemory::new())));
        (registry, ctx)
    }

    #[tokio::test]
    async fn test_tool_result_is_fed_back() {
        let (registry, ctx) = setup();
        let provider = ScriptedProvider::new(vec![
            tool("c1", "echo", serde_json::json!({"query": "villas"})),
            text("done"),
        ]);
        let mut messages = vec![ChatMessage::user("hi")];
        let schemas = tool_descriptions_to_schemas(&registry.get_tool_descriptions());

        let result = run_tool_loop(
            &provider.manager(),
            &registry,
            &mut messages,
            &schemas,
            &ctx,
            &ToolLoopConfig::default(),
        )
        .await
        .unwrap();

        assert_eq!(result.content, "done");
        assert_eq!(result.iterations, 2);
        assert_eq!(result.tool_invocations[0].result, "echo: villas");
        assert_eq!(messages.len(), 3);
        assert_eq!(provider.prompts()[1], "echo: villas");
        assert_eq!(ctx.session.lock().agent_communications.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_tool_and_timeout_are_reported() {
        let (registry, ctx) = setup();
        let provider = ScriptedProvider::new(vec![
            tool("c1", "missing", serde_json::json!({})),
            tool("c2", "slow", serde_json::json!({})),
            text("ok"),
        ]);
        let mut messages = Vec::new();
        let config = ToolLoopConfig { max_iterations: 6, tool_timeout_secs: 0 };

        let result = run_tool_loop(&provider.manager(), &registry, &mut messages, &[], &ctx, &config)
            .await
            .unwrap();

        assert_eq!(result.tool_invocations[0].result, "Tool execution error: Unknown tool: missing");
        assert_eq!(result.tool_invocations[1].result, "Tool 'slow' timed out after 0s");
        assert!(!result.tool_invocations[1].success);
    }

    #[tokio::test]
    async fn test_iteration_cap_falls_back() {
        let (registry, ctx) = setup();
        let provider = ScriptedProvider::new(vec![
            tool("c1", "echo", serde_json::json!({"query": "a"})),
            tool("c2", "echo", serde_json::json!({"query": "b"})),
        ]);
        let mut messages = Vec::new();
        let config = ToolLoopConfig { max_iterations: 1, tool_timeout_secs: 5 };

        let result = run_tool_loop(&provider.manager(), &registry, &mut messages, &[], &ctx, &config)
            .await
            .unwrap();

        assert_eq!(result.content, MAX_ITERATIONS_FALLBACK);
        assert_eq!(result.iterations, 2);
    }
}
