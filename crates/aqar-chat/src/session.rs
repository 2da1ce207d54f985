//! Per-session conversation memory
//!
//! Agents record what they did this turn through flags on the session; the
//! pipeline reads them back to learn which specialist answered.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::database::Row;
use crate::language::Language;
use crate::llm::ChatRole;

const MAX_HISTORY: usize = 50;
const MAX_COMMUNICATIONS: usize = 20;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: ChatRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// One specialist invocation, kept for debugging and audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentCommunication {
    pub agent: String,
    pub input: String,
    pub output: String,
    pub success: bool,
    pub timestamp: DateTime<Utc>,
}

/// Which field a broadened search relaxed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FuzzyField {
    #[default]
    Room,
    Bathroom,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnFlags {
    pub sql_agent_used: bool,
    pub rag_agent_used: bool,
    pub chat_agent_used: bool,
    pub payment_plan_used: bool,
    pub new_results_fetched: bool,
    pub alternative_search: bool,
    pub fuzzy_field: Option<FuzzyField>,
    pub original_value: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionMemory {
    pub chat_history: Vec<HistoryEntry>,
    pub last_results: Vec<Row>,
    pub last_sql: Option<String>,
    pub last_unit_id: Option<i64>,
    pub detected_language: Option<Language>,
    pub language_confidence: Option<f32>,
    pub agent_communications: Vec<AgentCommunication>,
    pub flags: TurnFlags,
}

impl SessionMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Clears the per-turn markers set at the start of a turn.
    pub fn reset_turn_flags(&mut self) {
        self.flags.new_results_fetched = false;
        self.flags.rag_agent_used = false;
        self.flags.payment_plan_used = false;
    }

    /// Clears the agent markers before a validation re-run and after a turn.
    pub fn reset_agent_flags(&mut self) {
        self.flags.sql_agent_used = false;
        self.flags.rag_agent_used = false;
        self.flags.chat_agent_used = false;
    }

    pub fn language(&self) -> Language {
        self.detected_language.unwrap_or_default()
    }

    pub fn push_history(&mut self, role: ChatRole, content: impl Into<String>) {
        self.chat_history.push(HistoryEntry {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        });
    }

    pub fn record_communication(&mut self, agent: &str, input: &str, output: &str, success: bool) {
        self.agent_communications.push(AgentCommunication {
            agent: agent.to_string(),
            input: input.to_string(),
            output: output.to_string(),
            success,
            timestamp: Utc::now(),
        });
    }

    /// Last `n` history entries, oldest first.
    pub fn recent_history(&self, n: usize) -> &[HistoryEntry] {
        let start = self.chat_history.len().saturating_sub(n);
        &self.chat_history[start..]
    }

    pub fn cleanup(&mut self) {
        trim_front(&mut self.chat_history, MAX_HISTORY);
        trim_front(&mut self.agent_communications, MAX_COMMUNICATIONS);
    }
}

fn trim_front<T>(items: &mut Vec<T>, max: usize) {
    if items.len() > max {
        let excess = items.len() - max;
        items.drain(..excess);
    }
}

pub type SharedSession = Arc<Mutex<SessionMemory>>;

/// Session registry keyed by client-supplied session id.
#[derive(Default)]
pub struct SessionStore {
    sessions: DashMap<String, SharedSession>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(&self, session_id: &str) -> SharedSession {
        self.sessions
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(SessionMemory::new())))
            .clone()
    }

    /// Resets the session's memory; unknown ids are a no-op.
    pub fn clear(&self, session_id: &str) {
        if let Some(session) = self.sessions.get(session_id) {
            session.lock().reset();
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
