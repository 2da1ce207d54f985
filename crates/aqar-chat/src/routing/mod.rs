//! Intent routing
//!
//! A fast pre-classifier guesses which specialist should answer; the
//! cross-validator compares that guess with the tool the orchestrator
//! actually called and decides whether the turn is re-run.

pub mod classifier;
pub mod validator;

pub use classifier::{classify, Classification};
pub use validator::{validate, validation_message, ValidationKind, Validator};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Specialist that handles a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Route {
    Sql,
    Rag,
    Chat,
}

impl Route {
    pub fn as_str(&self) -> &'static str {
        match self {
            Route::Sql => "sql",
            Route::Rag => "rag",
            Route::Chat => "chat",
        }
    }

    /// Upper-case label used in validation prompts and logs.
    pub fn label(&self) -> &'static str {
        match self {
            Route::Sql => "SQL",
            Route::Rag => "RAG",
            Route::Chat => "CHAT",
        }
    }

    /// Maps classifier labels (and bare route names) to a route.
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_lowercase().as_str() {
            "project_info" | "rag" => Some(Route::Rag),
            "unit_search" | "sql" => Some(Route::Sql),
            "other" | "chat" => Some(Route::Chat),
            _ => None,
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
