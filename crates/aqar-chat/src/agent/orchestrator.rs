//! Orchestrator - LLM-driven routing between the specialist agents
//!
//! The orchestrator model sees the workflow prompt, the recent conversation
//! and the language-wrapped user turn, then picks specialists through the
//! tool loop. Which specialist answered is read back from the session flags
//! the tools set.

use anyhow::Result;
use std::sync::LazyLock;

use super::context::AgentContext;
use super::tool_loop::{run_tool_loop, tool_descriptions_to_schemas, ToolInvocation, ToolLoopConfig};
use super::tools::{AgentDeps, ToolRegistry};
use crate::language::{self, contains_arabic, Language};
use crate::llm::{ChatMessage, ChatRole, LLMManager, ToolSchema};
use crate::postprocess::{CAROUSEL_MARKER, DETAIL_END, DETAIL_START};
use crate::payment::PAYMENT_PLAN_MARKER;
use crate::routing::Route;
use crate::session::TurnFlags;

const EMPTY_RESPONSE: &str = "I apologize, but I couldn't generate a response.";

static DETAIL_BLOCK_RE: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(&format!(
        "(?s){}.*?{}",
        regex::escape(DETAIL_START),
        regex::escape(DETAIL_END)
    ))
    .expect("detail block regex is valid")
});

const SYSTEM_PROMPT: &str = r#"-----------------------
WORKFLOW (STRICT ORDER)
-----------------------
Analyze the query and make ONE decision:

   • SQL Path → call_sql_agent
     Trigger SQL when the user:
        - Searches for units, properties, buildings
        - Filters by area, rooms, price, comp_id, payment type
        - Requests detailed unit information
        - Asks anything that requires database lookup

     **INTENT CLARIFICATION - When to use RAG vs SQL**:

     ⚠️ **CRITICAL ROUTING RULES - You MUST follow these strictly**:

     ════════════════════════════════════════════════════════════════════
     🔴 **MANDATORY RAG ROUTING** - ALWAYS use call_rag_agent for:
     ════════════════════════════════════════════════════════════════════

     1️⃣ **PROJECT INFORMATION QUERIES** (User wants to LEARN ABOUT projects):
        INTENT: User is asking WHICH/WHAT projects exist, WHERE they are, ABOUT project details
        - NOT searching for specific units WITH filtering criteria
        - Wants general information ABOUT the projects themselves

        Examples (INTENT, not keywords - understand the GOAL):
        ✓ "What projects are available?" / "ما هي المشاريع المتاحة" / "eh el projects el mawgooda"
        ✓ "Which projects can I buy from?" / "أي المشاريع المتاحة للشراء"
        ✓ "Tell me about X project" / "What is X project?" / "Where is X located?"
        ✓ "ايه هي البروجيكتس المفتوحه دلوقتي" / "المشاريع المتاحه دلوقت"

     2️⃣ **POLICIES/PROCEDURES/RULES** (User wants to know HOW things WORK):
        INTENT: User asking about processes, rules, timelines, procedures

        Examples (INTENT, not keywords):
        ✓ "How many hours to pay?" / "What is the payment process?"
        ✓ "When is the deadline?" / "What documents are needed?"
        ✓ "Who are the shareholders?" / "Company policies"

     ════════════════════════════════════════════════════════════════════
     🟢 **SQL ROUTING** - ONLY use call_sql_agent for:
     ════════════════════════════════════════════════════════════════════

     **UNIT SEARCH WITH CRITERIA** (User wants to FIND/FILTER specific units):
        INTENT: User is actively SEARCHING for units that match specific criteria
        - Has filtering requirements (rooms, price, area, location)
        - Wants to see SPECIFIC units that match their needs

        Examples (INTENT, not keywords):
        ✓ "Find apartment with 4 bedrooms in noor project" → SQL (searching + filtering)
        ✓ "Show units under 2M EGP" → SQL (price filter)
        ✓ "4 bedrooms noor" → SQL (criteria-based search)
        ✓ "Units in Madinaty with 3 rooms" → SQL (location + room filter)

     ════════════════════════════════════════════════════════════════════
     🚨 **DISAMBIGUATION RULE** - When intent is ambiguous:
     ════════════════════════════════════════════════════════════════════

     Ask yourself: "Is the user asking ABOUT/WHICH (information) or FIND/SHOW (search)?"
     - ABOUT/WHICH/WHAT = RAG (informational)
     - FIND/SHOW/SEARCH = SQL (transactional)

     ⚠️ **CRITICAL DISCLAIMER**:
     The examples above are ILLUSTRATIONS OF INTENT, NOT keyword triggers.
     Do NOT do simple keyword matching (e.g., "if query contains 'project' → RAG").
     Instead, UNDERSTAND THE USER'S GOAL:
     - Are they asking for INFORMATION about what exists? → RAG
     - Are they trying to SEARCH/FILTER for specific units? → SQL

     Think semantically, not syntactically.

     **CRITICAL**: Call SQL agent ONLY ONCE per query.
     The SQL agent has built-in fuzzy search (±1 value).
     If SQL agent returns "no properties found" or an apology, DO NOT retry.
     Simply relay the SQL agent's exact response to the user.

     **STRICT FORMATTING RULES - NO IMAGES OR VIDEOS IN TEXT**:
      - **ABSOLUTELY FORBIDDEN**: Any image markdown, image labels, or image references
      - **ABSOLUTELY FORBIDDEN**: Any video tour text, video links, or "Watch Video" mentions
      - **NEVER** use: `![Image](URL)`, `[![](URL)]()`, `[View Image]()`, or any image markdown
      - **NEVER** write: "Unit Image:", "Compound Image:", "Developer Logo:", "Images:", "Video Tour:", "Watch Video"
      - **NEVER** include URLs starting with http in your response (images or videos)
      - **NEVER** create clickable links for images or videos

      The frontend displays property cards with images and video buttons on its own.

      **WHAT TO DO INSTEAD**:
      ✓ Describe the property's features (size, rooms, price, location)
      ✓ Explain payment plans and delivery dates
      ✓ Highlight unique selling points
      ✗ DON'T mention images, photos, or videos at all

      **CORRECT OUTPUT EXAMPLE**:
      ✓ "This is a 120m² apartment with 2 bedrooms and 2 bathrooms in New Cairo, priced at 2,500,000 EGP with delivery in 2025."

     FOLLOW-UP RULES (SQL):
        If the user previously asked about units, and the SQL agent returned MULTIPLE units,
        and the user now asks about payment plans, installment systems, pricing breakdown,
        or financing, treat it as a FOLLOW-UP SQL query.

   • RAG Path → call_rag_agent
     Trigger ONLY when user asks for specific info from the knowledge base:
        - Company policies, regulations, governance
        - Purpose, mission, overview
        - Procedures, ethics, codes of conduct
        - Any TMG-related information that is NOT about units or property search
        - General questions ABOUT projects (what projects exist, project locations, project details)
     ⚠️ **STRICTLY FORBIDDEN**: Do NOT call this for general knowledge (history, politics, etc.).

     If the query follows up on a previous policy answer ("explain that", "tell me more"),
     call call_rag_agent again with the full question.

    • Chat Path → call_chat_agent
      Trigger for:
         - Greetings (Hi, Hello, etc.)
         - Questions about your capabilities as a real estate assistant
         - General real estate conversation
         - **OFF-TOPIC STEERING**: If the user asks about ANY topic NOT related to real estate (history, politics, cooking, math, etc.), you MUST route to this agent so it can provide the standardized apology.
      ⚠️ **CRITICAL**: Never use SQL or RAG for off-topic queries.

    • Price check → get_unit_price_with_discount
      Use when the user asks only for the price of a specific unit id.

-----------------------
CRITICAL RULES
-----------------------
- You may call multiple tools if needed (e.g., call_sql_agent then translate_text).
- ALWAYS return the specialist agent's response directly to the user.
- Do NOT modify or override the specialist agent's response.
- Do NOT answer content yourself.
- Do NOT retry if agents report no results.

-----------------------
LANGUAGE SUPPORT
-----------------------
**CRITICAL**: The specialist agents will automatically respond in the user's language.
We support three languages:
1. **English**: Standard English ('en')
2. **Arabic**: Arabic script (العربية) ('ar')
3. **Franco-Arabic (Arabizi)**: Arabic using Latin letters and numbers ('franco')

The language has been detected and stored in session memory. Each specialist agent will use this information to respond appropriately.
DO NOT attempt to translate or change language yourself - the agents handle this automatically.

-----------------------
TRANSLATION TOOL USAGE
-----------------------
**WHEN TO USE translate_text tool**:
- When the user's detected language is Franco-Arabic or Arabic (not English).
- When you receive database results from call_sql_agent (which might be in either English or Arabic script).
- When you need to present unit details, payment plans, or property information in the user's language.

**HOW TO USE**:
1. Get the database response from call_sql_agent.
2. If language is Franco-Arabic:
   - Identify any Arabic script or English text that needs conversion.
   - Call translate_text(text="[your description]", source_lang="en" or "ar", target_lang="franco").
3. If language is Arabic:
   - Call translate_text(text="[your description]", source_lang="en", target_lang="ar") ONLY if source is English.

**CRITICAL RULES**:
- DO NOT translate if user's language is English.
- **DUPLICATION**: If you provided a list or carousel of properties, DO NOT repeat their full details in a long paragraph afterwards. Just provide a brief helpful intro or summary.
- **FOR FRANCO USERS**: Never output Arabic script (العربية) in your final response. Use translate_text to convert all content to Franco.

**🚫 NEVER TRANSLATE STRUCTURED DATA MARKERS**:
- **PAYMENT PLAN DATA**: If the response contains `<<PAYMENT_PLAN_DATA>>` followed by JSON, you MUST preserve it EXACTLY as is.
- **CAROUSEL DATA**: If the response contains `<<PROPERTY_CAROUSEL_DATA>>` followed by JSON, preserve it EXACTLY.
- **UNIT DETAIL DATA**: If the response contains `###UNIT_DETAIL###...###END_DETAIL###`, preserve it EXACTLY.
- These markers contain structured JSON data for the frontend - translating them will break the display.
- Only translate the descriptive TEXT parts of the response, never the JSON data or markers.
- A payment plan from call_sql_agent is already in the user's language; return it AS-IS.
"#;

/// The user turn wrapped with the detected language and its instruction.
pub fn enhanced_input(message: &str, language: Language) -> String {
    format!(
        "User Query: {message}\n\n\
         CRITICAL - DETECTED LANGUAGE: {language}\n\
         {instruction}\n\n\
         You MUST respond in the EXACT SAME language as the user's query.\n\n\
         ---\n\
         IF THE SPECIALIST AGENT RETURNS PROPERTY DATA:\n\
         1. **JSON MARKER**: You MUST include the full JSON marker and content (<<PROPERTY_CAROUSEL_DATA>>...) at the very end of your response.\n\
         2. **BRIEF SUMMARY**: Provide a very brief intro or summary. The frontend handles the visuals.\n\
         ---\n",
        message = message,
        language = language,
        instruction = language::instruction(language),
    )
}

/// Specialist that answered, by precedence payment plan, SQL, RAG, chat.
pub fn route_from_flags(flags: &TurnFlags) -> Route {
    if flags.payment_plan_used || flags.sql_agent_used {
        Route::Sql
    } else if flags.rag_agent_used {
        Route::Rag
    } else {
        Route::Chat
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorOutcome {
    pub tool_used: Route,
    pub output: String,
    pub invocations: Vec<ToolInvocation>,
}

pub struct Orchestrator {
    llm: LLMManager,
    registry: ToolRegistry,
    schemas: Vec<ToolSchema>,
    loop_config: ToolLoopConfig,
    history_window: usize,
}

impl Orchestrator {
    pub fn new(deps: &AgentDeps, history_window: usize) -> Self {
        Self::with_registry(deps.llm.clone(), ToolRegistry::real_estate(deps), history_window)
    }

    fn with_registry(llm: LLMManager, registry: ToolRegistry, history_window: usize) -> Self {
        let schemas = tool_descriptions_to_schemas(&registry.get_tool_descriptions());
        Self {
            llm,
            registry,
            schemas,
            loop_config: ToolLoopConfig::default(),
            history_window,
        }
    }

    fn build_messages(&self, message: &str, ctx: &AgentContext) -> Vec<ChatMessage> {
        let mut messages = vec![ChatMessage::system(SYSTEM_PROMPT)];
        ctx.with_session(|s| {
            for entry in s.recent_history(self.history_window) {
                messages.push(match entry.role {
                    ChatRole::User => ChatMessage::user(entry.content.clone()),
                    _ => ChatMessage::assistant(entry.content.clone()),
                });
            }
        });
        messages.push(ChatMessage::user(enhanced_input(message, ctx.language)));
        messages
    }

    /// One orchestrator pass for `message`; agents record their work on the session.
    pub async fn orchestrate(&self, message: &str, ctx: &AgentContext) -> Result<OrchestratorOutcome> {
        let start = std::time::Instant::now();
        let mut messages = self.build_messages(message, ctx);

        let result = run_tool_loop(
            &self.llm,
            &self.registry,
            &mut messages,
            &self.schemas,
            ctx,
            &self.loop_config,
        )
        .await?;

        let mut output = if result.content.trim().is_empty() {
            EMPTY_RESPONSE.to_string()
        } else {
            result.content
        };

        if ctx.language == Language::Franco && contains_arabic(&output) {
            output = franco_post_pass(&output, &self.llm).await;
        }

        let tool_used = ctx.with_session(|s| route_from_flags(&s.flags));
        tracing::info!(
            session = %ctx.session_id,
            tool_used = tool_used.as_str(),
            iterations = result.iterations,
            tools = result.tool_invocations.len(),
            latency_ms = start.elapsed().as_millis() as u64,
            "Orchestrator finished"
        );

        Ok(OrchestratorOutcome {
            tool_used,
            output,
            invocations: result.tool_invocations,
        })
    }
}

/// Byte ranges of data payloads that must reach the client untouched.
fn preserved_spans(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();

    let mut from = 0;
    while let Some(rel) = text[from..].find(CAROUSEL_MARKER) {
        let start = from + rel;
        let end = text[start..]
            .find("\n\n")
            .map(|i| start + i)
            .unwrap_or(text.len());
        spans.push((start, end));
        from = end.max(start + CAROUSEL_MARKER.len());
    }

    spans.extend(DETAIL_BLOCK_RE.find_iter(text).map(|m| (m.start(), m.end())));

    if let Some(start) = text.find(PAYMENT_PLAN_MARKER) {
        spans.push((start, text.len()));
    }

    spans.sort();
    spans
}

/// Translate Arabic-script text outside data markers into Franco.
pub async fn franco_post_pass(output: &str, llm: &LLMManager) -> String {
    let mut result = String::with_capacity(output.len());
    let mut pos = 0;

    for (start, end) in preserved_spans(output) {
        if start < pos {
            continue;
        }
        if pos < start {
            result.push_str(&translate_segment(&output[pos..start], llm).await);
        }
        result.push_str(&output[start..end]);
        pos = end;
    }
    if pos < output.len() {
        result.push_str(&translate_segment(&output[pos..], llm).await);
    }

    result
}

/// Surrounding whitespace is kept so marker layout survives translation.
async fn translate_segment(segment: &str, llm: &LLMManager) -> String {
    if !contains_arabic(segment) {
        return segment.to_string();
    }
    let core = segment.trim();
    let lead = &segment[..segment.len() - segment.trim_start().len()];
    let trail = &segment[segment.trim_end().len()..];
    let translated = language::translate(core, Language::Ar, Language::Franco, llm).await;
    format!("{}{}{}", lead, translated, trail)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{row, InMemoryUnitStore};
    use crate::knowledge::KnowledgeBase;
    use crate::llm::scripted::{text, tool, ScriptedProvider};
    use crate::session::SessionMemory;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::Arc;

    fn setup(
        steps: Vec<crate::llm::scripted::Scripted>,
        language: Language,
    ) -> (Arc<ScriptedProvider>, Arc<InMemoryUnitStore>, Orchestrator, AgentContext) {
        let provider = ScriptedProvider::new(steps);
        let store = InMemoryUnitStore::new();
        let deps = AgentDeps {
            llm: provider.manager(),
            store: store.clone(),
            knowledge: Arc::new(KnowledgeBase::uninitialized()),
            rag_chunk_count: 3,
        };
        let session = Arc::new(Mutex::new(SessionMemory::new()));
        session.lock().detected_language = Some(language);
        let ctx = AgentContext::new("orch", session);
        (provider, store, Orchestrator::new(&deps, 10), ctx)
    }

    #[test]
    fn test_route_precedence() {
        let mut flags = TurnFlags::default();
        assert_eq!(route_from_flags(&flags), Route::Chat);
        flags.rag_agent_used = true;
        assert_eq!(route_from_flags(&flags), Route::Rag);
        flags.payment_plan_used = true;
        assert_eq!(route_from_flags(&flags), Route::Sql);
    }

    #[test]
    fn test_enhanced_input_carries_language() {
        let input = enhanced_input("ezayak", Language::Franco);
        assert!(input.starts_with("User Query: ezayak\n\nCRITICAL - DETECTED LANGUAGE: franco\n"));
        assert!(input.contains("<<PROPERTY_CAROUSEL_DATA>>"));
    }

    #[tokio::test]
    async fn test_sql_route_through_tool_loop() {
        let (provider, store, orchestrator, ctx) = setup(
            vec![
                tool("c1", "call_sql_agent", json!({"query": "3 bedroom apartments"})),
                text("SELECT * FROM unit_search_sorting WHERE room = 3 AND lang_id = 1 LIMIT 5"),
                text("Here are some apartments."),
            ],
            Language::En,
        );
        store.push_rows(vec![row(json!({"unit_id": 5, "room": 3}))]);
        ctx.with_session(|s| s.push_history(ChatRole::User, "3 bedroom apartments"));

        let outcome = orchestrator.orchestrate("3 bedroom apartments", &ctx).await.unwrap();

        assert_eq!(outcome.tool_used, Route::Sql);
        assert_eq!(outcome.output, "Here are some apartments.");
        assert_eq!(outcome.invocations.len(), 1);
        assert_eq!(outcome.invocations[0].tool_name, "call_sql_agent");
        assert!(provider.prompts()[0].starts_with("User Query: 3 bedroom apartments"));
        assert_eq!(provider.remaining(), 0);
    }

    #[tokio::test]
    async fn test_direct_answer_defaults_to_chat() {
        let (_, _, orchestrator, ctx) = setup(vec![text("   ")], Language::En);
        let outcome = orchestrator.orchestrate("hello", &ctx).await.unwrap();
        assert_eq!(outcome.tool_used, Route::Chat);
        assert_eq!(outcome.output, EMPTY_RESPONSE);
    }

    #[tokio::test]
    async fn test_franco_post_pass_keeps_markers() {
        let (provider, _, orchestrator, ctx) = setup(
            vec![
                text("اهلا بيك\n\n###UNIT_DETAIL###{\"unit_id\":1}###END_DETAIL###\n\nتمام"),
                text("Ahlan bik"),
                text("Tamam"),
            ],
            Language::Franco,
        );

        let outcome = orchestrator.orchestrate("ahlan", &ctx).await.unwrap();

        assert_eq!(
            outcome.output,
            "Ahlan bik\n\n###UNIT_DETAIL###{\"unit_id\":1}###END_DETAIL###\n\nTamam"
        );
        assert_eq!(provider.prompts().len(), 3);
    }

    #[test]
    fn test_preserved_spans() {
        let text = "intro\n\n<<PROPERTY_CAROUSEL_DATA>>{\"count\":1}\n\nnotes <<PAYMENT_PLAN_DATA>>{}";
        let spans = preserved_spans(text);
        assert_eq!(spans.len(), 2);
        assert_eq!(&text[spans[0].0..spans[0].1], "<<PROPERTY_CAROUSEL_DATA>>{\"count\":1}");
        assert_eq!(&text[spans[1].0..spans[1].1], "<<PAYMENT_PLAN_DATA>>{}");
    }
}
