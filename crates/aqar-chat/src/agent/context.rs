//! Agent Context - per-turn state handed to every tool

use crate::language::Language;
use crate::session::{SessionMemory, SharedSession};

/// Context for one orchestrator turn.
#[derive(Clone)]
pub struct AgentContext {
    /// Session ID for tracking
    pub session_id: String,

    /// Shared session memory; tools record flags and results here
    pub session: SharedSession,

    /// Language detected for the current message
    pub language: Language,
}

impl AgentContext {
    pub fn new(session_id: impl Into<String>, session: SharedSession) -> Self {
        let language = session.lock().language();
        Self {
            session_id: session_id.into(),
            session,
            language,
        }
    }

    /// Run `f` against the session under its lock. Never call across an await.
    pub fn with_session<R>(&self, f: impl FnOnce(&mut SessionMemory) -> R) -> R {
        let mut guard = self.session.lock();
        f(&mut guard)
    }
}

impl std::fmt::Debug for AgentContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentContext")
            .field("session_id", &self.session_id)
            .field("language", &self.language)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[test]
    fn test_context_picks_up_session_language() {
        let session = Arc::new(Mutex::new(SessionMemory::new()));
        session.lock().detected_language = Some(Language::Franco);

        let ctx = AgentContext::new("s1", session.clone());
        assert_eq!(ctx.language, Language::Franco);

        ctx.with_session(|s| s.flags.sql_agent_used = true);
        assert!(session.lock().flags.sql_agent_used);
    }
}
