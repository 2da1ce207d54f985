//! Chat Service - the per-message pipeline
//!
//! cache → guard → language → pre-classifier → orchestrator → cross-validation
//! → payload injection → history and cache write.

use anyhow::Result;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

use crate::agent::{AgentContext, AgentDeps, Orchestrator};
use crate::cache::{CacheStats, ResponseCache};
use crate::config::{ChatbotConfig, PipelineFlags};
use crate::database::UnitStore;
use crate::guard::{self, REFUSAL_MESSAGE};
use crate::language::{self, Language};
use crate::llm::{ChatRole, LLMManager};
use crate::postprocess::{
    alternative_message, carousel_block, clean_image_sections, has_unit_rows, history_text,
    is_detail_request, sql_logs, unit_detail_block, SqlLog,
};
use crate::routing::{classify, validation_message, Classification, Validator};
use crate::session::{SessionStore, SharedSession};

/// What the HTTP layer returns for one message.
#[derive(Debug, Clone, Serialize)]
pub struct ChatReply {
    pub response: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detected_language: Option<Language>,
    pub sql_logs: Vec<SqlLog>,
}

impl ChatReply {
    fn bare(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
            detected_language: None,
            sql_logs: Vec::new(),
        }
    }
}

pub struct ChatService {
    pipeline: PipelineFlags,
    llm: LLMManager,
    store: Arc<dyn UnitStore>,
    orchestrator: Orchestrator,
    validator: Validator,
    sessions: SessionStore,
    cache: ResponseCache<ChatReply>,
}

impl ChatService {
    pub fn new(config: &ChatbotConfig, deps: AgentDeps) -> Self {
        let pipeline = config.pipeline.clone();
        Self {
            orchestrator: Orchestrator::new(&deps, pipeline.max_chat_history_messages),
            validator: Validator::new(pipeline.validation_confidence_threshold),
            cache: ResponseCache::from_config(&config.cache),
            sessions: SessionStore::new(),
            llm: deps.llm,
            store: deps.store,
            pipeline,
        }
    }

    /// Run one user message through the pipeline. Never fails: errors become
    /// the reply text.
    pub async fn process_message(&self, session_id: &str, message: &str) -> ChatReply {
        let session = self.sessions.get_or_create(session_id);

        let cache_language = session.lock().language();
        if let Some(hit) = self.cache.get(message, cache_language) {
            tracing::info!(session = %session_id, language = %cache_language, "Cache hit");
            return hit;
        }

        let verdict = guard::check(message, &self.llm, self.pipeline.enable_safety_guard).await;
        if !verdict.safe {
            tracing::warn!(
                session = %session_id,
                reason = verdict.reason.as_deref().unwrap_or("unspecified"),
                "Security violation blocked"
            );
            return ChatReply::bare(REFUSAL_MESSAGE);
        }

        match self.run_turn(session_id, &session, message).await {
            Ok(reply) => {
                let language = reply.detected_language.unwrap_or_default();
                self.cache.put(message, language, reply.clone());
                tracing::debug!(session = %session_id, language = %language, "Reply cached");
                reply
            }
            Err(e) => {
                tracing::error!(session = %session_id, error = %e, "Chat error");
                let text = format!("I apologize, but I encountered an error: {}", e);
                session.lock().push_history(ChatRole::Assistant, text.clone());
                ChatReply::bare(text)
            }
        }
    }

    async fn run_turn(&self, session_id: &str, session: &SharedSession, message: &str) -> Result<ChatReply> {
        let started = Instant::now();

        let detection = if self.pipeline.use_llm_language_detection {
            language::detect_with_llm(message, &self.llm).await
        } else {
            language::detect(message)
        };
        let detected = detection.language;
        {
            let mut s = session.lock();
            s.reset_turn_flags();
            s.detected_language = Some(detected);
            s.language_confidence = Some(detection.confidence);
            s.push_history(ChatRole::User, message);
        }
        tracing::info!(language = %detected, confidence = detection.confidence, "Language detected");

        let classification = if self.pipeline.enable_intent_classifier {
            classify(message, &self.llm).await
        } else {
            tracing::debug!("Intent classifier disabled");
            Classification::disabled()
        };

        let ctx = AgentContext::new(session_id, session.clone());
        let first = self.orchestrator.orchestrate(message, &ctx).await?;
        let mut response = clean_image_sections(&first.output);
        tracing::info!(route = first.tool_used.as_str(), "Orchestrator routing decision");

        match (self.pipeline.enable_cross_validation, classification.intent) {
            (true, Some(intent)) => {
                if let Some(kind) = self.validator.kind(intent, classification.confidence, first.tool_used) {
                    tracing::warn!(
                        validation = kind.as_str(),
                        pre_classifier = intent.as_str(),
                        orchestrator = first.tool_used.as_str(),
                        confidence = classification.confidence,
                        "Re-invoking orchestrator"
                    );
                    ctx.with_session(|s| s.reset_agent_flags());

                    let retry_started = Instant::now();
                    let retry_input = validation_message(message, &classification, first.tool_used, kind);
                    let retry = self.orchestrator.orchestrate(&retry_input, &ctx).await?;
                    response = clean_image_sections(&retry.output);
                    tracing::info!(
                        final_route = retry.tool_used.as_str(),
                        latency_ms = retry_started.elapsed().as_millis() as u64,
                        "Validation retry finished"
                    );
                } else {
                    tracing::debug!(route = first.tool_used.as_str(), "Classifier and orchestrator agree");
                }
            }
            (false, _) => tracing::debug!("Cross-validation disabled"),
            (true, None) => {}
        }

        let response = self.attach_payloads(message, response, detected, &ctx).await?;

        let reply = ctx.with_session(|s| {
            let logs = sql_logs(s);
            s.push_history(ChatRole::Assistant, history_text(&response));
            s.reset_agent_flags();
            s.cleanup();
            ChatReply {
                response,
                detected_language: Some(detected),
                sql_logs: logs,
            }
        });

        tracing::info!(
            session = %session_id,
            latency_ms = started.elapsed().as_millis() as u64,
            "Message processed"
        );
        Ok(reply)
    }

    /// Unit detail card for follow-ups, otherwise a carousel for fresh results.
    async fn attach_payloads(
        &self,
        message: &str,
        response: String,
        language: Language,
        ctx: &AgentContext,
    ) -> Result<String> {
        let detail_request = ctx.with_session(|s| is_detail_request(message, &s.last_results));
        if detail_request {
            let block = ctx.with_session(|s| unit_detail_block(message, &s.last_results))?;
            return Ok(match block {
                Some(block) => format!("{}{}", block, response),
                None => response,
            });
        }

        let rows = ctx.with_session(|s| {
            (s.flags.new_results_fetched && has_unit_rows(&s.last_results)).then(|| s.last_results.clone())
        });
        let Some(rows) = rows else {
            return Ok(response);
        };

        let carousel = carousel_block(&rows, language, &self.llm).await?;
        tracing::debug!(units = rows.len(), "Carousel attached");

        let apology = ctx.with_session(|s| {
            if !s.flags.alternative_search {
                return None;
            }
            s.flags.alternative_search = false;
            s.flags
                .original_value
                .as_deref()
                .map(|value| alternative_message(language, s.flags.fuzzy_field, value))
        });

        Ok(match apology {
            Some(apology) => format!("{}{}", apology, carousel),
            None => carousel,
        })
    }

    pub fn clear_session(&self, session_id: &str) {
        self.sessions.clear(session_id);
        tracing::info!(session = %session_id, "Session cleared");
    }

    pub fn session(&self, session_id: &str) -> SharedSession {
        self.sessions.get_or_create(session_id)
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
        tracing::info!("Response cache cleared");
    }

    /// Round-trip to the unit database.
    pub async fn test_database(&self) -> Result<()> {
        self.store.ping().await
    }
}
