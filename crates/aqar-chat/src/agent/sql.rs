//! SQL agent: unit search over the listing view and payment plans for a
//! specific unit.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::{Arc, LazyLock};

use super::context::AgentContext;
use super::tools::{single_string_schema, AgentTool, ToolInput, ToolResult};
use crate::config::{UNIT_COLUMNS, UNIT_TABLE};
use crate::database::{fix_image_extension, text_of, unit_id_of, Row, UnitStore};
use crate::language::{self, Language};
use crate::llm::LLMManager;
use crate::payment::{build_payment_plan, plan_not_found};
use crate::session::FuzzyField;

const MAX_ROWS: usize = 5;
const IMAGE_EXTENSIONS: &[&str] = &[".jpg", ".png", ".jpeg", ".webp"];

const PAYMENT_KEYWORDS: &[&str] = &[
    "payment plan", "installment", "financing", "down payment", "deposit",
    "monthly payment", "how to pay", "payment option", "payment schedule",
    "payment structure", "pay for", "payment details", "payment breakdown",
    "installment plan", "finance", "cost breakdown", "pricing breakdown",
    "خطة الدفع", "تقسيط", "القسط", "الدفعة", "المقدم", "الشهري",
    "خطة", "نظام السداد", "سداد", "تفاصيل", "نظام",
    "sadad", "nezam el sadad", "nezam", "5otat el daf3", "5otat",
    "tafaseel el sadad", "tafaseel", "ta2seet", "el mosta7a2at",
    "daf3", "5ota", "el daf3", "tafaseel 5otat el daf3",
    "3ard nezam el sadad", "wareny nezam el sadad",
];

const UNAVAILABLE_STATUSES: &[&str] = &[
    "reserved", "sold", "unavailable", "locked", "off market", "not available",
    "محجوزة", "محجوزه", "مباعة", "غير متاحة", "مغلقة", "مؤقتا", "محجوز",
];

const FIRST_REFS: &[&str] = &["first", "1st", "#1", "property 1"];
const SECOND_REFS: &[&str] = &["second", "2nd", "#2", "property 2"];
const THIRD_REFS: &[&str] = &["third", "3rd", "#3", "property 3"];

static UNIT_REF_RE: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"\b(?:unit|property|id)\s*[:#]?\s*([0-9]+)\b").expect("unit ref regex is valid")
});
static LONG_NUMBER_RE: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"\b([0-9]{5,})\b").expect("long number regex is valid"));
static ROOM_VALUE_RE: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"([0-9]+)\s*(?:room|bedroom|owd|غرف)").expect("room value regex is valid")
});
static BATH_VALUE_RE: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"([0-9]+)\s*(?:bathroom|bath|7amam|حمام)").expect("bathroom value regex is valid")
});

pub fn is_payment_query(query: &str) -> bool {
    let lower = query.to_lowercase();
    PAYMENT_KEYWORDS.iter().any(|k| lower.contains(k))
}

/// Unit a payment question refers to: explicit id, long number, ordinal
/// against the previous results, or the only previous result. Arabic-Indic
/// digits count; a number too large for an id falls through to the next rule.
pub fn extract_unit_id(query: &str, last_results: &[Row]) -> Option<i64> {
    let lower = language::ascii_digits(&query.to_lowercase());
    let parsed = |re: &regex::Regex| re.captures(&lower).and_then(|c| c[1].parse::<i64>().ok());

    if let Some(id) = parsed(&UNIT_REF_RE).or_else(|| parsed(&LONG_NUMBER_RE)) {
        return Some(id);
    }

    let mentions = |refs: &[&str]| refs.iter().any(|r| lower.contains(r));
    if mentions(FIRST_REFS) {
        last_results.first().and_then(unit_id_of)
    } else if mentions(SECOND_REFS) {
        last_results.get(1).and_then(unit_id_of)
    } else if mentions(THIRD_REFS) {
        last_results.get(2).and_then(unit_id_of)
    } else if last_results.len() == 1 {
        unit_id_of(&last_results[0])
    } else {
        None
    }
}

pub fn strip_code_fences(sql: &str) -> String {
    sql.trim().replace("```sql", "").replace("```", "").trim().to_string()
}

/// Drop unavailable units, repair image names and cap the row count.
pub fn filter_available(rows: Vec<Row>) -> Vec<Row> {
    rows.into_iter()
        .filter(|row| {
            let status = text_of(row.get("status_text")).unwrap_or_default().to_lowercase();
            let status = status.trim();
            !UNAVAILABLE_STATUSES.iter().any(|term| status.contains(term))
        })
        .map(|mut row| {
            fix_image_extension(&mut row, "unit_image", IMAGE_EXTENSIONS);
            fix_image_extension(&mut row, "compound_image", IMAGE_EXTENSIONS);
            row
        })
        .take(MAX_ROWS)
        .collect()
}

/// Localized placeholder for an empty numeric field.
pub fn missing_value_text(field: &str, language: Language) -> &'static str {
    match (field, language) {
        ("price", Language::Franco) => "Mesh mota7 else3r",
        ("price", Language::Ar) => "السعر مش متوفر حاليا",
        ("price", Language::En) => "Price not available",
        (_, Language::Franco) => "Msh mawgood",
        (_, Language::Ar) => "غير متاح",
        (_, Language::En) => "N/A",
    }
}

fn is_blank_cell(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

fn format_rows(rows: &[Row], language: Language) -> Vec<Row> {
    rows.iter()
        .map(|row| {
            let mut formatted = row.clone();
            for field in ["room", "bathroom", "floor", "area", "price"] {
                if formatted.get(field).map(is_blank_cell).unwrap_or(false) {
                    formatted.insert(
                        field.to_string(),
                        Value::String(missing_value_text(field, language).to_string()),
                    );
                }
            }
            formatted
        })
        .collect()
}

fn found_message(count: usize, language: Language) -> String {
    match language {
        Language::En => format!("I found {} properties for you.", count),
        Language::Franco => format!("La2eet {} units ashanak.", count),
        Language::Ar => format!("لقيتلك {} وحدات.", count),
    }
}

/// Field a broadened search most likely relaxed, with the value asked for.
pub fn fuzzy_target(query: &str) -> Option<(FuzzyField, Option<String>)> {
    let lower = language::ascii_digits(&query.to_lowercase());
    let capture = |re: &regex::Regex| re.captures(&lower).map(|c| c[1].to_string());

    if ["room", "bedroom", "owd"].iter().any(|k| lower.contains(k)) || query.contains("غرف") {
        Some((FuzzyField::Room, capture(&ROOM_VALUE_RE)))
    } else if ["bathroom", "7amam"].iter().any(|k| lower.contains(k)) || query.contains("حمام") {
        Some((FuzzyField::Bathroom, capture(&BATH_VALUE_RE)))
    } else {
        None
    }
}

fn sql_prompt(request: &str, lang_id: u8) -> String {
    format!(
        r#"
You are a SQL generator.
Convert the request into a SQL query.
Rules:
- Table: {table}
- Only SELECT * queries
- Use only these columns: {columns}
- **Always include LIMIT 5**
- **STRICT LANGUAGE FILTER**: You MUST include `lang_id = {lang_id}` in the WHERE clause.
  (1 = English, 2 = Arabic/Franco). If results are wrong language, users will be confused.
- **CRITICAL STATUS FILTER**: Exclude unavailable units. You MUST add this condition to EVERY query:
  `AND LOWER(status_text) NOT IN ('reserved', 'sold', 'unavailable', 'temporary locked', 'locked', 'off market', 'محجوزة', 'محجوزه', 'مباعة', 'غير متاحة', 'مغلقة', 'مؤقتا')`
  OR:
  `AND LOWER(status_text) NOT LIKE '%reserved%' AND LOWER(status_text) NOT LIKE '%sold%' AND LOWER(status_text) NOT LIKE '%locked%' AND LOWER(status_text) NOT LIKE '%محجوز%' AND LOWER(status_text) NOT LIKE '%مباعة%'`
- If there are other WHERE conditions, combine them with AND. Always include `lang_id = {lang_id}`.

Examples:
- "show me flats with 3 bedrooms" -> SELECT * FROM {table} WHERE room = 3 AND lang_id = {lang_id} AND LOWER(status_text) NOT IN ('reserved', 'sold', 'locked') LIMIT 5;
- "find properties in Cairo" -> SELECT * FROM {table} WHERE region_text LIKE '%Cairo%' AND lang_id = {lang_id} AND LOWER(status_text) NOT IN ('reserved', 'sold', 'locked') LIMIT 5;

User request: {request}
"#,
        table = UNIT_TABLE,
        columns = UNIT_COLUMNS.join(", "),
        lang_id = lang_id,
        request = request,
    )
}

fn fuzzy_prompt(sql: &str, query: &str) -> String {
    format!(
        "The previous SQL query returned 0 results. SQL: {}. User Query: {}. \
         Please generate a NEW SQL query that is slightly broader. If there are numeric filters \
         (price, rooms, etc), allow a range of +/- 1 or +/- 10%. Return ONLY the SQL.",
        sql, query
    )
}

fn no_results_prompt(language: Language) -> String {
    format!(
        "CRITICAL LANGUAGE INSTRUCTION: {}\n\
         You MUST respond in the EXACT SAME language the user used.\n\n\
         Tell the user that no properties were found matching their criteria, even after checking for similar options.\n\
         Be apologetic and helpful.",
        language::instruction(language)
    )
}

pub struct SqlAgentTool {
    llm: LLMManager,
    store: Arc<dyn UnitStore>,
}

impl SqlAgentTool {
    pub fn new(llm: LLMManager, store: Arc<dyn UnitStore>) -> Self {
        Self { llm, store }
    }

    /// Run generated SQL. Failures come back as a single `{"error": ..}` row.
    async fn run_sql(&self, sql: &str) -> Vec<Row> {
        match self.store.fetch_rows(sql).await {
            Ok(rows) => {
                let total = rows.len();
                let rows = filter_available(rows);
                tracing::debug!(returned = total, kept = rows.len(), "SQL executed");
                rows
            }
            Err(e) => {
                tracing::warn!(error = %e, sql = %sql, "SQL execution failed");
                let mut row = Row::new();
                row.insert("error".to_string(), Value::String(e.to_string()));
                vec![row]
            }
        }
    }

    async fn payment_plan(&self, unit_id: i64, language: Language) -> String {
        let plan = match self.store.fetch_unit(unit_id).await {
            Ok(Some(row)) => build_payment_plan(unit_id, &row).render(),
            Ok(None) => plan_not_found(unit_id),
            Err(e) => {
                tracing::warn!(error = %e, unit_id, "Payment plan lookup failed");
                json!({"error": true, "message": format!("Error: {}", e)}).to_string()
            }
        };
        language::translate(&plan, Language::En, language, &self.llm).await
    }

    async fn search(&self, query: &str, ctx: &AgentContext) -> Result<String> {
        let language = ctx.language;
        ctx.with_session(|s| s.flags.sql_agent_used = true);

        let sql = strip_code_fences(&self.llm.complete(&sql_prompt(query, language.lang_id())).await?);
        tracing::info!(sql = %sql, lang_id = language.lang_id(), "Generated SQL");
        ctx.with_session(|s| s.last_sql = Some(sql.clone()));

        let rows = self.run_sql(&sql).await;

        if rows.is_empty() {
            let fuzzy_sql = strip_code_fences(&self.llm.complete(&fuzzy_prompt(&sql, query)).await?);
            tracing::info!(sql = %fuzzy_sql, "No results, retrying with broader SQL");
            let rows = self.run_sql(&fuzzy_sql).await;

            if rows.is_empty() {
                return self.llm.complete(&no_results_prompt(language)).await.map(|r| r.trim().to_string());
            }

            let raw = serde_json::to_string(&rows)?;
            let target = fuzzy_target(query);
            ctx.with_session(|s| {
                s.flags.alternative_search = true;
                s.flags.new_results_fetched = true;
                if let Some(id) = rows.first().and_then(unit_id_of) {
                    s.last_unit_id = Some(id);
                }
                if let Some((field, value)) = target {
                    s.flags.fuzzy_field = Some(field);
                    if value.is_some() {
                        s.flags.original_value = value;
                    }
                }
                s.last_results = rows;
            });
            return Ok(raw);
        }

        let formatted = format_rows(&rows, language);
        let count = formatted.len();
        ctx.with_session(|s| {
            s.flags.new_results_fetched = true;
            if let Some(id) = rows.first().and_then(unit_id_of) {
                s.last_unit_id = Some(id);
            }
            s.last_results = rows;
        });

        Ok(format!(
            "{}\n\nACTUAL PROPERTY DATA (USE THIS DATA - DO NOT MAKE UP VALUES):\n{}\n\n\
             CRITICAL: Use ONLY the data above. Do NOT invent or hallucinate any values. \
             Extract values directly from the JSON.",
            found_message(count, language),
            serde_json::to_string(&formatted)?
        ))
    }
}

#[async_trait]
impl AgentTool for SqlAgentTool {
    fn id(&self) -> &str {
        "call_sql_agent"
    }

    fn name(&self) -> &str {
        "SQL Agent"
    }

    fn description(&self) -> &str {
        "Handle SQL and Payment Plan queries. Use for unit search, filtering, and payment info."
    }

    fn parameters_schema(&self) -> Value {
        single_string_schema("query", "The user's property search or payment question")
    }

    async fn execute(&self, input: ToolInput, context: AgentContext) -> Result<ToolResult> {
        let query = input.str_param("query")?;

        if is_payment_query(query) {
            let unit_id = context.with_session(|s| extract_unit_id(query, &s.last_results));
            if let Some(unit_id) = unit_id {
                tracing::info!(unit_id, "Payment plan request");
                context.with_session(|s| {
                    s.flags.payment_plan_used = true;
                    s.flags.sql_agent_used = true;
                });
                let plan = self.payment_plan(unit_id, context.language).await;
                return Ok(ToolResult::ok(plan).with_data(json!({"unit_id": unit_id})));
            }
        }

        let output = self.search(query, &context).await?;
        Ok(ToolResult::ok(output))
    }
}
