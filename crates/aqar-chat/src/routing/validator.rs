//! Cross-validation of the orchestrator's tool choice against the pre-classifier.

use super::{Classification, Route};

pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.70;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationKind {
    Mismatch,
    LowConfidenceMatch,
}

impl ValidationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationKind::Mismatch => "MISMATCH",
            ValidationKind::LowConfidenceMatch => "LOW_CONFIDENCE_MATCH",
        }
    }
}

/// `needs_retry = (intent != tool_used) || confidence < 0.70`
pub fn validate(intent: Route, confidence: f32, tool_used: Route) -> bool {
    Validator::default().needs_retry(intent, confidence, tool_used)
}

#[derive(Debug, Clone, Copy)]
pub struct Validator {
    pub threshold: f32,
}

impl Default for Validator {
    fn default() -> Self {
        Self { threshold: DEFAULT_CONFIDENCE_THRESHOLD }
    }
}

impl Validator {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    pub fn needs_retry(&self, intent: Route, confidence: f32, tool_used: Route) -> bool {
        self.kind(intent, confidence, tool_used).is_some()
    }

    /// Mismatch takes precedence over low confidence.
    pub fn kind(&self, intent: Route, confidence: f32, tool_used: Route) -> Option<ValidationKind> {
        if intent != tool_used {
            Some(ValidationKind::Mismatch)
        } else if confidence < self.threshold {
            Some(ValidationKind::LowConfidenceMatch)
        } else {
            None
        }
    }
}

/// Orchestrator input for the single re-run.
pub fn validation_message(
    message: &str,
    classification: &Classification,
    first_route: Route,
    kind: ValidationKind,
) -> String {
    let expected = classification.intent.unwrap_or(Route::Chat);
    let reasoning = if classification.reasoning.is_empty() {
        "N/A"
    } else {
        classification.reasoning.as_str()
    };

    let context = format!(
        r#"[ROUTING VALIDATION REQUIRED]

{{
  "original_query": "{message}",
  "pre_classifier": {{
    "decision": "{decision}",
    "confidence": {confidence:.2},
    "reasoning": "{reasoning}"
  }},
  "orchestrator_first_decision": "{first}",
  "validation_type": "{kind}"
}}"#,
        decision = expected.label(),
        confidence = classification.confidence,
        first = first_route.label(),
        kind = kind.as_str(),
    );

    let instruction = match kind {
        ValidationKind::Mismatch => "The pre-classifier and orchestrator disagreed on routing.\n\
             Please re-evaluate this query and make your FINAL decision: SQL, RAG, or CHAT.\n\
             Then respond to the original user query."
            .to_string(),
        ValidationKind::LowConfidenceMatch => format!(
            "Both agreed on {}, but confidence is low ({:.2}%).\n\
             Please re-evaluate with extra care and confirm your FINAL decision: SQL, RAG, or CHAT.\n\
             Then respond to the original user query.",
            first_route.label(),
            classification.confidence * 100.0
        ),
    };

    format!("{}\n\n{}", context, instruction)
}
