//! RAG agent: answers policy, company and project questions from the
//! knowledge base only.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use super::context::AgentContext;
use super::tools::{single_string_schema, AgentTool, ToolInput, ToolResult};
use crate::knowledge::KnowledgeBase;
use crate::language::{self, Language};
use crate::llm::LLMManager;

/// Candidate chunks pulled per question, whatever the configured count.
const MIN_CANDIDATES: usize = 35;

fn language_example(language: Language) -> &'static str {
    match language {
        Language::En => {
            r#"
EXAMPLE - For an English query "who are the shareholders?", your response must be:
"TMG Holding has major shareholders owning 5% or more. The shareholders are: 1. TMG Real Estate & Tourism Investment Company..."
NEVER respond with Franco-Arabic like "TMG Holding 3andha shareholders..." - this is FORBIDDEN for English queries."#
        }
        Language::Franco => {
            r#"
EXAMPLE - For a Franco query "meen el shareholders?", your response must be:
"TMG Holding 3andha major shareholders mal2keen 5% aw aktar. El shareholders humma: 1. TMG Real Estate & Tourism Investment Company..."
You MUST use Franco-Arabic (numbers for Arabic sounds: 3, 7, 2, 5, 9, etc.)"#
        }
        Language::Ar => {
            r#"
EXAMPLE - For an Arabic query "من هم المساهمون؟", your response must be in Arabic script:
"شركة TMG القابضة لديها مساهمون رئيسيون يمتلكون 5٪ أو أكثر. المساهمون هم: 1. شركة TMG للاستثمار العقاري والسياحي..."
You MUST use Arabic script only."#
        }
    }
}

pub fn rag_prompt(query: &str, chunks: &str, language: Language) -> String {
    format!(
        r#"
You are the RAG Specialist Agent for Eshtri Aqar.

User Query: {query}

Context:
{chunks}

═══════════════════════════════════════════════════════════════════
STRICT DOMAIN GATEKEEPING - REAL ESTATE ONLY
═══════════════════════════════════════════════════════════════════
- You are ONLY permitted to answer questions related to real estate, TMG company policies, project details, and property inquiries.
- ❌ **STRICTLY FORBIDDEN**: You MUST NOT answer questions about:
  - General knowledge (e.g., "Who invented the lightbulb?", "History of Egypt")
  - Politics, Sports, Celebrities, or Entertainment
  - Cooking, Recipes, Health advice
  - Math, Science, or general Academic topics
  - Coding or Technical advice unrelated to our platform
  - ANY topic that is not directly about real estate properties or TMG.

- If the user's question is OUT-OF-SCOPE, you MUST NOT use your internal training data to answer it.
- Instead, you MUST politely state that you are a real estate assistant and can only help with property-related and project information.

═══════════════════════════════════════════════════════════════════
CRITICAL LANGUAGE REQUIREMENT - READ CAREFULLY
═══════════════════════════════════════════════════════════════════

DETECTED LANGUAGE: {lang}

{instruction}

{example}

🚫 STRICT RULE: You MUST respond in the EXACT SAME language as the user's query.

═══════════════════════════════════════════════════════════════════
CROSS-LINGUAL INFORMATION HANDLING
═══════════════════════════════════════════════════════════════════

Answer the user's question based ONLY on the context provided above.
- If relevant information exists in the context → Translate it EXACTLY to {lang}
- Keep all names, numbers, percentages IDENTICAL to the context
- If NO relevant information exists in the context OR the question is OUT-OF-SCOPE → Apologize politely in {lang} stating you can only help with real estate and project information.

DO NOT hallucinate. DO NOT answer from general knowledge. If it's not in the context and not real estate, BLOCK IT.
"#,
        query = query,
        chunks = chunks,
        lang = language,
        instruction = language::instruction(language),
        example = language_example(language),
    )
}

pub struct RagAgentTool {
    llm: LLMManager,
    knowledge: Arc<KnowledgeBase>,
    chunk_count: usize,
}

impl RagAgentTool {
    pub fn new(llm: LLMManager, knowledge: Arc<KnowledgeBase>, chunk_count: usize) -> Self {
        Self {
            llm,
            knowledge,
            chunk_count,
        }
    }

    async fn retrieve(&self, query: &str) -> String {
        let knowledge = self.knowledge.clone();
        let query = query.to_string();
        let k = self.chunk_count.max(MIN_CANDIDATES);

        match tokio::task::spawn_blocking(move || knowledge.search(&query, k)).await {
            Ok(chunks) => chunks,
            Err(e) => {
                tracing::warn!(error = %e, "Knowledge search task failed");
                "Error retrieving documents.".to_string()
            }
        }
    }
}

#[async_trait]
impl AgentTool for RagAgentTool {
    fn id(&self) -> &str {
        "call_rag_agent"
    }

    fn name(&self) -> &str {
        "RAG Agent"
    }

    fn description(&self) -> &str {
        "Handle Property Policies, Compound Information, and Company Procedures. NOT for general knowledge."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        single_string_schema("query", "The policy, company or project question")
    }

    async fn execute(&self, input: ToolInput, context: AgentContext) -> Result<ToolResult> {
        let query = input.str_param("query")?;
        context.with_session(|s| s.flags.rag_agent_used = true);

        let chunks = self.retrieve(query).await;
        tracing::info!(query = %query, language = %context.language, "RAG search");

        let answer = self
            .llm
            .complete(&rag_prompt(query, &chunks, context.language))
            .await?;
        Ok(ToolResult::ok(answer.trim()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::NOT_INITIALIZED;
    use crate::llm::scripted::{text, ScriptedProvider};
    use crate::session::SessionMemory;
    use parking_lot::Mutex;

    fn context(language: Language) -> AgentContext {
        let session = Arc::new(Mutex::new(SessionMemory::new()));
        session.lock().detected_language = Some(language);
        AgentContext::new("rag", session)
    }

    #[tokio::test]
    async fn test_answers_from_retrieved_chunks() {
        let kb = KnowledgeBase::in_memory(900, 200).unwrap();
        kb.ingest_text(
            "Policies\n1. Refund Policy\nThe online reservation deposit is refundable within fourteen days of payment if no contract was signed.\n",
            "policies.txt",
        )
        .unwrap();
        let provider = ScriptedProvider::new(vec![text(" Deposits are refundable within 14 days. ")]);
        let tool = RagAgentTool::new(provider.manager(), Arc::new(kb), 3);
        let ctx = context(Language::En);

        let result = tool
            .execute(
                ToolInput {
                    tool_id: "call_rag_agent".into(),
                    parameters: serde_json::json!({"query": "is the deposit refundable"}),
                },
                ctx.clone(),
            )
            .await
            .unwrap();

        assert_eq!(result.output, "Deposits are refundable within 14 days.");
        let prompt = &provider.prompts()[0];
        assert!(prompt.contains("Chunk 1:\nSection: 1. Refund Policy"));
        assert!(prompt.contains("DETECTED LANGUAGE: en"));
        assert!(prompt.contains("who are the shareholders?"));
        assert!(ctx.session.lock().flags.rag_agent_used);
    }

    #[tokio::test]
    async fn test_uninitialized_store_is_passed_through() {
        let provider = ScriptedProvider::new(vec![text("Ana assef")]);
        let tool = RagAgentTool::new(provider.manager(), Arc::new(KnowledgeBase::uninitialized()), 3);

        tool.execute(
            ToolInput {
                tool_id: "call_rag_agent".into(),
                parameters: serde_json::json!({"query": "meen el shareholders?"}),
            },
            context(Language::Franco),
        )
        .await
        .unwrap();

        let prompt = &provider.prompts()[0];
        assert!(prompt.contains(NOT_INITIALIZED));
        assert!(prompt.contains("DETECTED LANGUAGE: franco"));
    }
}
