//! Language detection, response instructions and translation
//!
//! Three response languages are supported: English, Egyptian Arabic in Arabic
//! script, and Franco-Arabic (Arabic written with Latin letters and digits).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;

use crate::llm::LLMManager;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    En,
    Ar,
    Franco,
}

impl Language {
    pub fn code(&self) -> &'static str {
        match self {
            Language::En => "en",
            Language::Ar => "ar",
            Language::Franco => "franco",
        }
    }

    /// Accepts codes and the long-form aliases used in prompts.
    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim().to_lowercase().as_str() {
            "en" | "english" => Some(Language::En),
            "ar" | "arabic" => Some(Language::Ar),
            "franco" | "franco_arabic" | "franco-arabic" => Some(Language::Franco),
            _ => None,
        }
    }

    /// Arabic and Franco users read the Arabic rows of the listing view.
    pub fn lang_id(&self) -> u8 {
        match self {
            Language::En => 1,
            Language::Ar | Language::Franco => 2,
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detection {
    pub language: Language,
    pub confidence: f32,
    pub reasoning: String,
    #[serde(default)]
    pub detected_patterns: Vec<String>,
    #[serde(default)]
    pub arabic_ratio: f32,
}

impl Detection {
    fn new(language: Language, confidence: f32, reasoning: impl Into<String>) -> Self {
        Self {
            language,
            confidence,
            reasoning: reasoning.into(),
            detected_patterns: Vec::new(),
            arabic_ratio: 0.0,
        }
    }
}

static HINT_RE: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"(?i)\[Respond in (English|Arabic|Franco-Arabic)\]").expect("hint regex is valid")
});

const STRONG_FRANCO_INDICATORS: &[&str] = &[
    "meen", "ezay", "eh", "ezzay", "fe", "aywa", "la2", "keda", "hena", "3ayez", "3ayz", "ana",
    "enta", "bey3", "bey2", "el-", "m3ad", "yalla", "sha2a", "2od", "owd", "7amam", "ghorfa",
    "7aga", "kebira", "so3ayara", "tafaseel", "aktr", "esa2al", "wareny", "nezam", "sadad", "ra2am",
];

static STRONG_FRANCO_RES: LazyLock<Vec<(&'static str, regex::Regex)>> = LazyLock::new(|| {
    STRONG_FRANCO_INDICATORS
        .iter()
        .map(|w| {
            let re = regex::Regex::new(&format!(r"\b{}\b", regex::escape(w)))
                .expect("franco indicator regex is valid");
            (*w, re)
        })
        .collect()
});

const FRANCO_SUBSTRINGS: &[&str] = &[
    "meen", "ezay", "ezzay", "3ayez", "2ana", "7aga", "sha2a", "2od", "7amam", "ghorfa", "fe ",
    " el-", "bey3", "bey2", "kebira", "so3ayara", "ta2riban", "3ala", "m3ad", "yalla",
];

const STRONG_FRANCO_MAX_LEN: usize = 100;

pub fn is_arabic_char(c: char) -> bool {
    ('\u{0600}'..='\u{06FF}').contains(&c)
}

pub fn contains_arabic(text: &str) -> bool {
    text.chars().any(is_arabic_char)
}

/// Arabic-Indic (`٠-٩`) and Extended Arabic-Indic (`۰-۹`) digits folded to ASCII.
pub fn ascii_digits(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            '\u{0660}'..='\u{0669}' => char::from(b'0' + (c as u32 - 0x0660) as u8),
            '\u{06F0}'..='\u{06F9}' => char::from(b'0' + (c as u32 - 0x06F0) as u8),
            _ => c,
        })
        .collect()
}

/// Share of Arabic-script characters among alphabetic characters.
pub fn arabic_ratio(text: &str) -> f32 {
    let arabic = text.chars().filter(|c| is_arabic_char(*c)).count();
    let alpha = text
        .chars()
        .filter(|c| c.is_alphabetic() || is_arabic_char(*c))
        .count();
    if alpha == 0 {
        0.0
    } else {
        arabic as f32 / alpha as f32
    }
}

/// Hint and strong-indicator stages; `None` means the heuristic or LLM decides.
fn detect_explicit(text: &str) -> Option<Detection> {
    if text.trim().is_empty() {
        return Some(Detection::new(Language::En, 0.0, "Empty input"));
    }

    if let Some(caps) = HINT_RE.captures(text) {
        let hint = caps[1].to_lowercase();
        let language = Language::from_code(&hint).unwrap_or_default();
        let mut detection = Detection::new(
            language,
            1.0,
            format!("Explicit language hint detected: [{}]", hint),
        );
        detection.detected_patterns = vec!["language_hint".to_string()];
        return Some(detection);
    }

    let lower = text.to_lowercase();
    let matches: Vec<String> = STRONG_FRANCO_RES
        .iter()
        .filter(|(_, re)| re.is_match(&lower))
        .map(|(w, _)| w.to_string())
        .collect();
    if !matches.is_empty() && lower.chars().count() < STRONG_FRANCO_MAX_LEN {
        let mut detection = Detection::new(
            Language::Franco,
            0.95,
            format!("Quick detection: Found Franco indicators: {:?}", matches),
        );
        detection.detected_patterns = matches;
        return Some(detection);
    }

    None
}

fn detect_heuristic(text: &str) -> Detection {
    let lower = text.to_lowercase();
    let ratio = arabic_ratio(text);

    if ratio > 0.5 {
        let mut d = Detection::new(
            Language::Ar,
            0.9,
            format!("Heuristic: High Arabic ratio ({:.1}%)", ratio * 100.0),
        );
        d.arabic_ratio = ratio;
        return d;
    }

    let matches: Vec<String> = FRANCO_SUBSTRINGS
        .iter()
        .filter(|p| lower.contains(*p))
        .map(|p| p.to_string())
        .collect();
    if !matches.is_empty() {
        let mut d = Detection::new(
            Language::Franco,
            0.85,
            format!("Heuristic: Franco patterns: {:?}", matches),
        );
        d.detected_patterns = matches;
        d.arabic_ratio = ratio;
        return d;
    }

    let mut d = Detection::new(Language::En, 0.6, "Heuristic: Default to English");
    d.arabic_ratio = ratio;
    d
}

/// Synchronous detection: hint, strong Franco indicators, then script heuristics.
pub fn detect(text: &str) -> Detection {
    detect_explicit(text).unwrap_or_else(|| detect_heuristic(text))
}

/// Detection where the LLM replaces the script heuristic.
/// Parse failures and LLM errors fall back to the heuristic.
pub async fn detect_with_llm(text: &str, llm: &LLMManager) -> Detection {
    if let Some(d) = detect_explicit(text) {
        return d;
    }

    match llm.complete_with_temperature(&detection_prompt(text), 0.0).await {
        Ok(reply) => {
            let cleaned = reply.replace("```json", "").replace("```", "");
            match serde_json::from_str::<LlmDetection>(cleaned.trim()) {
                Ok(parsed) => match Language::from_code(&parsed.language) {
                    Some(language) => Detection {
                        language,
                        confidence: parsed.confidence.clamp(0.0, 1.0),
                        reasoning: parsed.reasoning,
                        detected_patterns: parsed.detected_patterns,
                        arabic_ratio: parsed.arabic_ratio,
                    },
                    None => detect_heuristic(text),
                },
                Err(e) => {
                    tracing::debug!(error = %e, "Unparseable language detection reply");
                    detect_heuristic(text)
                }
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "LLM language detection failed, using heuristic");
            detect_heuristic(text)
        }
    }
}

#[derive(Deserialize)]
struct LlmDetection {
    #[serde(default = "default_language_code")]
    language: String,
    #[serde(default = "default_confidence")]
    confidence: f32,
    #[serde(default)]
    reasoning: String,
    #[serde(default)]
    detected_patterns: Vec<String>,
    #[serde(default)]
    arabic_ratio: f32,
}

fn default_language_code() -> String {
    "en".to_string()
}

fn default_confidence() -> f32 {
    0.5
}

fn detection_prompt(text: &str) -> String {
    format!(
        r#"You are an expert language detection system specialized in real estate queries.

Analyze this text: "{text}"

**CRITICAL RULES FOR ARABIC vs FRANCO DETECTION**:

1. **Standalone Numbers Are NOT Language Indicators**:
   - "3 غرف" → The "3" is just a quantity, NOT Franco
   - These are ARABIC with numbers, NOT Franco-Arabic

2. **Franco-Arabic Uses Numbers AS LETTERS INSIDE WORDS**:
   - "3ayez" (عايز) → "3" replaces ع
   - "sha2a" (شقة) → "2" replaces ق

3. **Common Franco Words**: meen, ezay, ezzay, 3ayez, sha2a, 2od, 7amam, el-, bey3, m3ad

4. **Primary Script Determines Language**:
   - Arabic ratio > 50% → ARABIC
   - Latin letters with Franco patterns → FRANCO
   - Only English words → ENGLISH

Return ONLY JSON:
{{"language": "en"/"ar"/"franco", "confidence": 0.0-1.0, "reasoning": "explanation", "detected_patterns": ["list"], "arabic_ratio": 0.0-1.0}}"#
    )
}

// ============================================================================
// Response instructions
// ============================================================================

const ENGLISH_INSTRUCTION: &str =
    "Respond ONLY in English. Use professional, business-appropriate language.";

const ARABIC_INSTRUCTION: &str = r#"الرد باللغة العربية المصرية فقط. استخدم اللهجة المصرية الرسمية.
(Respond ONLY in Egyptian Arabic script. Use formal Egyptian dialect, not Gulf, Levantine, or Maghrebi dialects.
Focus on Egyptian real estate terminology and expressions.)

**Important**: When providing property details, use the ACTUAL data from the database. Don't use placeholders. Fill in all available information about the property including:
- Area (المساحة), bedrooms (الغرف), bathrooms (الحمامات), floor (الدور)
- Delivery date (موعد التسليم), status (الحالة)
- Price details (السعر), down payment (المقدم), installment plans (نظام التقسيط)
- Any available discounts or promotional offers (العروض والخصومات)

If information is not available in the database, say "غير محدد" (not specified) instead of using placeholder brackets."#;

const FRANCO_INSTRUCTION: &str = r#"Respond ONLY in Egyptian Franco-Arabic (Arabizi). You MUST write Egyptian Arabic using Latin letters and numbers.

CRITICAL RULES FOR EGYPTIAN FRANCO-ARABIC:
- Use numbers for Arabic letters: 3 for ع, 7 for ح, 2 for ء, 5 for خ, 8 for ق/غ, 9 for ص
- Write in FORMAL Egyptian dialect (NOT Gulf, Levantine, or Lebanese)
- Use PROFESSIONAL, business-appropriate tone for real estate

**Search Result Format**:
La2eet [number] [type] fe [area]:
1. **[Project]**: [area]m2 | [rooms] Owd | [bathrooms] 7amam | [price] EGP

**Property Detail Format (Mandatory for single unit info)**:
# 🏢 [Project] - Unit ra2am [ID]

## 📝 Wasf el Unit:
[Detailed description of features and amenities in Franco]

## 📊 Mowasafat:
- **Mesa7a**: [area] m2
- **Owd**: [rooms]
- **7amam**: [bathrooms]
- **Floor**: [floor]
- **Delivery**: [date]
- **Status**: [status]

## 💰 Se3r wa Nezam el Sadad:
- **Se3r**: [price] EGP
- **Mo2adem**: [down payment]
- **Nezam el Sadad**: [details]

## 🏗️ Developer info:
[Developer Name] - [Short info]

Law m7tag t3raf ay 7aga tanya, 2oly!"#;

pub fn instruction(language: Language) -> &'static str {
    match language {
        Language::En => ENGLISH_INSTRUCTION,
        Language::Ar => ARABIC_INSTRUCTION,
        Language::Franco => FRANCO_INSTRUCTION,
    }
}

// ============================================================================
// Translation
// ============================================================================

const FRENCH_CORRECTIONS: &[(&str, &str)] = &[
    ("propriété", "property"),
    ("voici", "hena"),
    ("chambre", "owd"),
    ("superficie", "mesa7a"),
    ("prix", "se3r"),
    ("emplacement", "makan"),
    ("développeur", "developer"),
    ("salle de bain", "7amam"),
    ("statut", "status"),
    ("temporairement", "mo2akatan"),
    ("verrouillé", "ma2foul"),
    ("metre", "m"),
    ("egyptien", "EGP"),
];

static FRENCH_RES: LazyLock<Vec<(regex::Regex, &'static str)>> = LazyLock::new(|| {
    FRENCH_CORRECTIONS
        .iter()
        .map(|(fr, franco)| {
            let re = regex::Regex::new(&format!("(?i){}", regex::escape(fr)))
                .expect("french correction regex is valid");
            (re, *franco)
        })
        .collect()
});

/// Replace French words the model sometimes slips into Franco output.
pub fn correct_french(text: &str) -> String {
    let mut out = text.to_string();
    for (re, franco) in FRENCH_RES.iter() {
        if re.is_match(&out) {
            out = re.replace_all(&out, *franco).into_owned();
        }
    }
    out
}

/// Translate between the supported languages. Same-language calls and
/// LLM failures return the input unchanged.
pub async fn translate(text: &str, from: Language, to: Language, llm: &LLMManager) -> String {
    if from == to || text.trim().is_empty() {
        return text.to_string();
    }

    let prompt = if from == Language::Ar && to == Language::Franco {
        arabic_to_franco_prompt(text)
    } else {
        generic_translation_prompt(text, from, to)
    };

    match llm.complete(&prompt).await {
        Ok(translated) => correct_french(translated.trim()),
        Err(e) => {
            tracing::error!(error = %e, from = %from, to = %to, "Translation failed");
            text.to_string()
        }
    }
}

/// Same as [`translate`] but with language codes coming from tool arguments.
/// Unsupported targets return the input unchanged.
pub async fn translate_codes(text: &str, from: &str, to: &str, llm: &LLMManager) -> String {
    match (Language::from_code(from), Language::from_code(to)) {
        (Some(from), Some(to)) => translate(text, from, to, llm).await,
        (None, Some(to)) => translate(text, detect(text).language, to, llm).await,
        _ => text.to_string(),
    }
}

fn arabic_to_franco_prompt(text: &str) -> String {
    format!(
        r#"Translate Arabic to NATURAL Franco-Arabic (the way Egyptians ACTUALLY write online).

**CRITICAL**: Write how people TEXT on WhatsApp/Facebook, NOT formal transliteration!

**CRITICAL INSTRUCTIONS**:
- Franco-Arabic uses LATIN LETTERS + NUMBERS to write Arabic words
- Numbers represent Arabic letters:
  2 = ء
  3 = ع
  4 = ش
  5 = خ
  7 = ح
  8 = غ

- Use ONLY Latin alphabet (a-z) + numbers (0-9)
- **NEVER USE FRENCH WORDS** like "voici", "propriété", "chambre", "superficie"
- Keep standalone numbers as-is (3 rooms = 3 owd, NOT 3 chambres)

**Franco-Arabic Real Estate Vocabulary**:
Arabic → Franco (CORRECT):
- عايز → 3ayez
- شقة → sha2a / apartment
- غرفة/أوضة → ghorfa / 2oda / owd
- حمام → 7amam / bathroom
- مساحة → mesa7a / area
- سعر → se3r / price
- موقع → maw2e3 / location
- مطور → matawer / developer
- حالة → 7ala / status
- مؤقتاً → mo2akatan / temporarily
- مقفول → ma2foul / locked

**Format for Property Listings**:
```
La2eet 5 sha2a b 3 owd:

1. Property ID: [number]
   - Mesa7a: [number] m²
   - Se3r: [number] EGP
   - Owd: [number] | 7amam: [number]
   - Makan: [location]
   - Developer: [name]
   - Status: [status]
```

**Input Text (Arabic)**:
{text}

**Your Task**:
Translate to Franco-Arabic using ONLY Latin letters and numbers.
Keep property data (IDs, prices, numbers) unchanged.
Use the vocabulary above.

**CRITICAL**: If you use ANY French words, you FAILED the task.

Return ONLY the Franco-Arabic translation:"#
    )
}

fn generic_translation_prompt(text: &str, from: Language, to: Language) -> String {
    format!(
        r#"You are a real estate translator.

**SUPPORTED LANGUAGES**: Franco-Arabic, Arabic, English ONLY
**STRICTLY FORBIDDEN**: French language in any form

Translation Direction: {from} -> {to}

**Input Text**:
{text}

**Franco-Arabic Rules** (if target is Franco):
- Use Latin alphabet + numbers for Arabic sounds
- 3ayez = عايز (want)
- sha2a = شقة (apartment)
- 2od/owd = أوضة (room)
- 7amam = حمام (bathroom)
- Keep numbers as digits (3, 5, 100)
- NEVER use French words

**Translation Rules**:
1. Preserve all numbers and IDs
2. Keep property terminology accurate
3. Maintain formatting (bullet points, line breaks)
4. Don't add or remove information

Return ONLY the translated text (no explanations):"#
    )
}
