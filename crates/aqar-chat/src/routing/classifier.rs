//! LLM pre-classifier producing a coarse intent with a confidence score.

use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

use super::Route;
use crate::llm::LLMManager;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    /// `None` when the classifier is disabled.
    pub intent: Option<Route>,
    pub confidence: f32,
    pub reasoning: String,
}

impl Classification {
    pub fn disabled() -> Self {
        Self {
            intent: None,
            confidence: 1.0,
            reasoning: "Classifier disabled".to_string(),
        }
    }

    fn failed() -> Self {
        Self {
            intent: Some(Route::Chat),
            confidence: 0.0,
            reasoning: "Error".to_string(),
        }
    }

    pub fn intent_label(&self) -> &'static str {
        self.intent.map(|r| r.as_str()).unwrap_or("unknown")
    }
}

pub async fn classify(message: &str, llm: &LLMManager) -> Classification {
    let reply = match llm.complete_with_temperature(&classification_prompt(message), 0.0).await {
        Ok(reply) => reply,
        Err(e) => {
            tracing::warn!(error = %e, "Intent classifier call failed");
            return Classification::failed();
        }
    };

    match parse_classification(&reply) {
        Some(c) => {
            tracing::info!(
                intent = c.intent_label(),
                confidence = c.confidence,
                "Intent classified"
            );
            c
        }
        None => {
            tracing::warn!(reply = %reply, "Unparseable classifier reply");
            Classification::failed()
        }
    }
}

#[derive(Deserialize)]
struct RawClassification {
    intent: String,
    #[serde(default = "default_confidence")]
    confidence: f32,
    #[serde(default)]
    reasoning: String,
}

fn default_confidence() -> f32 {
    0.5
}

static INTENT_FIELD_RE: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r#""intent"\s*:\s*"([A-Za-z_]+)""#).expect("intent field regex is valid")
});
static CONFIDENCE_FIELD_RE: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r#""confidence"\s*:\s*"?([0-9]*\.?[0-9]+)"#).expect("confidence field regex is valid")
});
static REASONING_FIELD_RE: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r#""reasoning"\s*:\s*"([^"]*)""#).expect("reasoning field regex is valid")
});

/// Strict JSON first, then a field-by-field scan for sloppy replies.
pub(crate) fn parse_classification(reply: &str) -> Option<Classification> {
    let cleaned = reply.replace("```json", "").replace("```", "");
    let cleaned = cleaned.trim();
    let span = match (cleaned.find('{'), cleaned.rfind('}')) {
        (Some(start), Some(end)) if end > start => &cleaned[start..=end],
        _ => cleaned,
    };

    if let Ok(raw) = serde_json::from_str::<RawClassification>(span) {
        let intent = Route::from_label(&raw.intent).unwrap_or(Route::Chat);
        return Some(Classification {
            intent: Some(intent),
            confidence: raw.confidence.clamp(0.0, 1.0),
            reasoning: raw.reasoning,
        });
    }

    let label = INTENT_FIELD_RE.captures(span)?.get(1)?.as_str().to_string();
    let confidence = CONFIDENCE_FIELD_RE
        .captures(span)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<f32>().ok())
        .unwrap_or_else(default_confidence);
    let reasoning = REASONING_FIELD_RE
        .captures(span)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_default();

    Some(Classification {
        intent: Some(Route::from_label(&label).unwrap_or(Route::Chat)),
        confidence: confidence.clamp(0.0, 1.0),
        reasoning,
    })
}

fn classification_prompt(query: &str) -> String {
    format!(
        r#"You are an intent classifier for a real estate chatbot.

User Query: "{query}"

Classify this query into EXACTLY ONE of these categories:

1. **project_info** - User wants INFORMATION ABOUT what projects exist/are available
   - Asking WHICH/WHAT projects can be purchased
   - Wants to LEARN about project options
   - NOT searching for specific units with criteria
   Example: "What projects are available?", "Tell me about X project", "ايه المشاريع المتاحة"

2. **unit_search** - User wants to SEARCH/FIND specific units with filtering criteria
   - Has requirements (rooms, price, area, location)
   - Wants to see SPECIFIC units matching their needs
   Example: "Find 4 bedroom apartment", "Units under 2M", "3 rooms in Madinaty"

3. **other** - General questions, greetings, policies, or anything else

Think about the USER'S GOAL, not specific words used.

Respond with ONLY valid JSON:
{{
  "intent": "project_info" or "unit_search" or "other",
  "confidence": 0.0-1.0,
  "reasoning": "brief explanation"
}}"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::scripted::{text, Scripted, ScriptedProvider};

    #[test]
    fn test_parse_fenced_json() {
        let reply = "```json\n{\"intent\": \"unit_search\", \"confidence\": 0.92, \"reasoning\": \"has criteria\"}\n```";
        let c = parse_classification(reply).unwrap();
        assert_eq!(c.intent, Some(Route::Sql));
        assert!((c.confidence - 0.92).abs() < 1e-6);
        assert_eq!(c.reasoning, "has criteria");
    }

    #[test]
    fn test_parse_lenient_with_trailing_comma() {
        let reply = r#"Sure! {"intent": "project_info", "confidence": "0.8", "reasoning": "asks which projects",}"#;
        let c = parse_classification(reply).unwrap();
        assert_eq!(c.intent, Some(Route::Rag));
        assert!((c.confidence - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_confidence_is_clamped() {
        let c = parse_classification(r#"{"intent": "other", "confidence": 7}"#).unwrap();
        assert_eq!(c.confidence, 1.0);
        assert_eq!(c.intent, Some(Route::Chat));
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(parse_classification("I think this is about units").is_none());
    }

    #[tokio::test]
    async fn test_llm_error_falls_back_to_chat() {
        let provider = ScriptedProvider::new(vec![Scripted::Fail("boom".into())]);
        let c = classify("hi", &provider.manager()).await;
        assert_eq!(c, Classification { intent: Some(Route::Chat), confidence: 0.0, reasoning: "Error".into() });
    }

    #[tokio::test]
    async fn test_classify_unit_search() {
        let provider = ScriptedProvider::new(vec![text(
            r#"{"intent": "unit_search", "confidence": 0.95, "reasoning": "rooms and area"}"#,
        )]);
        let c = classify("Find 3 bedroom apartments in Madinaty", &provider.manager()).await;
        assert_eq!(c.intent, Some(Route::Sql));
        assert!(provider.prompts()[0].contains("Find 3 bedroom apartments in Madinaty"));
    }

    #[test]
    fn test_disabled_classification() {
        let c = Classification::disabled();
        assert_eq!(c.intent_label(), "unknown");
        assert_eq!(c.confidence, 1.0);
    }
}
