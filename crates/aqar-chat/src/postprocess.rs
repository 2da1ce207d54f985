//! Response post-processing
//!
//! Orchestrator text is scrubbed of image and video references and stray data
//! payloads; the pipeline then attaches the structured blocks the frontend
//! renders (unit detail card or property carousel).

use anyhow::Result;
use serde::Serialize;
use serde_json::Value;
use std::sync::LazyLock;

use crate::database::{is_truthy, number_of, text_of, unit_id_of, Row};
use crate::language::{self, contains_arabic, Language};
use crate::llm::LLMManager;
use crate::payment::{group_thousands, whole_percent, PROPERTY_LINK_BASE};
use crate::session::{FuzzyField, SessionMemory};

pub const CAROUSEL_MARKER: &str = "<<PROPERTY_CAROUSEL_DATA>>";
pub const DETAIL_START: &str = "###UNIT_DETAIL###";
pub const DETAIL_END: &str = "###END_DETAIL###";
pub const CAROUSEL_PLACEHOLDER: &str = "[Properties found and displayed in carousel]";

const DETAIL_IMAGE_EXTENSIONS: &[&str] = &[".jpg", ".png", ".jpeg", ".webp"];
const CAROUSEL_IMAGE_EXTENSIONS: &[&str] = &[".jpg", ".png"];
const YOUTUBE_WATCH: &str = "https://www.youtube.com/watch?v=";

const DETAIL_PHRASES: &[&str] = &[
    "retrieve full details", "tell me more about", "details for unit",
    "تفاصيل أكتر عن", "قولي تفاصيل", "اسأل عن التفاصيل", "عايز تفاصيل",
    "tafaseel aktr", "2oly tafaseel", "esa2al 3an el tafaseel", "3ayez tafaseel",
    "وريني التفاصيل", "شوفت التفاصيل", "اعرف اكتر", "عايز اعرف", "هات التفاصيل",
];

fn re(pattern: &str) -> regex::Regex {
    regex::Regex::new(pattern).expect("post-processing regex is valid")
}

/// Image and video scrubbing passes, applied in order.
static MEDIA_RULES: LazyLock<Vec<(regex::Regex, &'static str)>> = LazyLock::new(|| {
    vec![
        (re(r"(?im)(?:^|\n)\s*#{1,4}\s*Images?:\s*(?:\n|$)"), "\n"),
        (re(r"(?im)(?:^|\n)\s*Images?:\s*\n(?:\s*!\[.*?\]\(.*?\)\s*\n?)*"), ""),
        (
            re(r"(?im)(?:^|\n)\s*(?:Unit|Compound|Developer|Property)\s*(?:Image|Logo):\s*!\[?(?:View\s*)?.*?(?:Image|Logo)\]?.*?(?:\n|$)"),
            "\n",
        ),
        (re(r"(?i)!\[(?:Unit|Compound|Developer|Property)?\s*(?:Image|Logo|Photo).*?\]\(.*?\)"), ""),
        (re(r"(?im)(?:^|\n)\s*(?:Unit|Compound|Developer)\s*(?:Image|Logo):\s*(?:https?://\S+)?\s*"), ""),
        (re(r"(?im)(?:^|\n)\s*Images?:\s*(?:\n|$)"), "\n"),
        (re(r"(?im)(?:^|\n)\s*(?:Video\s*Tour|Watch\s*Video):\s*(?:\[.*?\]\(.*?\)|https?://\S+)?\s*"), ""),
        (re(r"(?i)\[(?:Watch\s*Video|Video\s*Tour|View\s*Video).*?\]\(.*?\)"), ""),
        (
            re(r"(?im)(?:^|\n|\s)(?:https?://)?(?:www\.)?(?:youtube\.com|youtu\.be|vimeo\.com|dailymotion\.com)/\S+"),
            "",
        ),
        (re(r"(?im)(?:^|\n)\s*(?:video\s*tour|watch\s*video).*?(?:\n|$)"), "\n"),
        (re(r"\n{3,}"), "\n\n"),
    ]
});

/// Data payloads the model may have echoed back.
static PAYLOAD_RULES: LazyLock<Vec<regex::Regex>> = LazyLock::new(|| {
    vec![
        re(r"(?s)###UNIT_DETAIL###.*?###END_DETAIL###"),
        re(r"(?s)<<PROPERTY_CAROUSEL_DATA>>.*$"),
        re(r"(?s)<<PAYMENT_PLAN_DATA>>.*$"),
        re(r#"(?s)\[\s*\{\s*"unit_id".*?\}\s*\]"#),
        re(r#"(?s)\[\s*\{\s*".*?".*?\}\s*\]"#),
    ]
});

static DETAIL_UNIT_RE: LazyLock<regex::Regex> =
    LazyLock::new(|| re(r"(?:unit|الوحدة|unit ra2am|unit #|رقم)\s*(?:number|رقم)?\s*#?([0-9]+)"));

/// Strip image/video mentions and data payloads from model output.
pub fn clean_image_sections(text: &str) -> String {
    let mut out = text.to_string();
    for (rule, replacement) in MEDIA_RULES.iter() {
        out = rule.replace_all(&out, *replacement).into_owned();
    }
    for rule in PAYLOAD_RULES.iter() {
        out = rule.replace_all(&out, "").into_owned();
    }
    out.trim().to_string()
}

// ============================================================================
// Unit detail card
// ============================================================================

/// Follow-up about one of the units already shown.
pub fn is_detail_request(message: &str, last_results: &[Row]) -> bool {
    if last_results.is_empty() {
        return false;
    }
    let lower = language::ascii_digits(&message.to_lowercase());
    DETAIL_PHRASES.iter().any(|p| lower.contains(p)) || DETAIL_UNIT_RE.is_match(&lower)
}

#[derive(Debug, Clone, Serialize)]
pub struct UnitDetail {
    pub unit_id: Value,
    pub unit_image: String,
    pub unit_image2: String,
    pub sm_unit_image: String,
    pub compound_image: String,
    pub developer_logo: String,
    pub sm_developer_logo: String,
    pub md_developer_logo: String,
    pub image: String,
    pub video_url: String,
    pub title: Value,
    pub property_link: String,
}

/// Cell value, or `default` when the column is missing or NULL.
fn cell_or(row: &Row, key: &str, default: &str) -> Value {
    match row.get(key) {
        None | Some(Value::Null) => Value::String(default.to_string()),
        Some(v) => v.clone(),
    }
}

fn image_with_extension(row: &Row, key: &str, extensions: &[&str]) -> String {
    match text_of(row.get(key)) {
        Some(url) if !extensions.iter().any(|ext| url.ends_with(ext)) => format!("{}.jpg", url),
        Some(url) => url,
        None => String::new(),
    }
}

fn video_link(row: &Row) -> String {
    match text_of(row.get("video_url")) {
        Some(url) if !url.starts_with("http") => format!("{}{}", YOUTUBE_WATCH, url),
        Some(url) => url,
        None => String::new(),
    }
}

fn unit_title(row: &Row) -> Value {
    ["compound_name", "compound_text"]
        .iter()
        .find(|key| is_truthy(row.get(**key)))
        .map(|key| row[*key].clone())
        .unwrap_or_else(|| Value::String("N/A".to_string()))
}

pub fn unit_detail(row: &Row) -> UnitDetail {
    let image = |key: &str| image_with_extension(row, key, DETAIL_IMAGE_EXTENSIONS);
    let unit_image = image("unit_image");
    let compound_image = image("compound_image");
    let unit_id = cell_or(row, "unit_id", "N/A");
    let link_id = text_of(Some(&unit_id)).unwrap_or_default();

    UnitDetail {
        image: if compound_image.is_empty() { unit_image.clone() } else { compound_image.clone() },
        unit_image2: image("unit_image2"),
        sm_unit_image: image("sm_unit_image"),
        developer_logo: image("developer_logo"),
        sm_developer_logo: image("sm_developer_logo"),
        md_developer_logo: image("md_developer_logo"),
        video_url: video_link(row),
        title: unit_title(row),
        property_link: format!("{}/{}", PROPERTY_LINK_BASE, link_id),
        unit_id,
        unit_image,
        compound_image,
    }
}

/// `###UNIT_DETAIL###{json}###END_DETAIL###\n\n` for the unit named in
/// `message`, when it is among the previous results.
pub fn unit_detail_block(message: &str, last_results: &[Row]) -> Result<Option<String>> {
    let lower = language::ascii_digits(&message.to_lowercase());
    let Some(caps) = DETAIL_UNIT_RE.captures(&lower) else {
        return Ok(None);
    };
    let wanted = &caps[1];

    let Some(row) = last_results
        .iter()
        .find(|row| text_of(row.get("unit_id")).as_deref() == Some(wanted))
    else {
        return Ok(None);
    };

    let detail = unit_detail(row);
    Ok(Some(format!(
        "{}{}{}\n\n",
        DETAIL_START,
        serde_json::to_string(&detail)?,
        DETAIL_END
    )))
}

// ============================================================================
// Property carousel
// ============================================================================

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CarouselLabels {
    pub option: &'static str,
    pub unit_id: &'static str,
    pub area: &'static str,
    pub bedrooms: &'static str,
    pub bathrooms: &'static str,
    pub price: &'static str,
    pub delivery: &'static str,
    pub status: &'static str,
    pub developer: &'static str,
    pub model: &'static str,
    pub ask_details: &'static str,
    pub view_arrow: &'static str,
    pub found: &'static str,
    pub properties: &'static str,
    pub currency: &'static str,
    pub floor: &'static str,
}

impl CarouselLabels {
    pub fn for_language(language: Language) -> Self {
        match language {
            Language::Franco => Self {
                option: "Khiar",
                unit_id: "Unit ID",
                area: "Mesa7a",
                bedrooms: "Owd",
                bathrooms: "7amam",
                price: "Se3r",
                delivery: "Tawseel",
                status: "7ala",
                developer: "Matawer",
                model: "Model",
                ask_details: "Esa2al 3an el tafaseel",
                view_arrow: "→",
                found: "La2eet",
                properties: "Amaken",
                currency: "EGP",
                floor: "Dor",
            },
            Language::Ar => Self {
                option: "خيار",
                unit_id: "رقم الوحدة",
                area: "المساحة",
                bedrooms: "غرف",
                bathrooms: "حمام",
                price: "السعر",
                delivery: "التسليم",
                status: "الحالة",
                developer: "المطور",
                model: "الموديل",
                ask_details: "اسأل عن التفاصيل",
                view_arrow: "←",
                found: "لقيتلك",
                properties: "وحدات",
                currency: "جنيه",
                floor: "الدور",
            },
            Language::En => Self {
                option: "Option",
                unit_id: "Unit ID",
                area: "Area",
                bedrooms: "Bed",
                bathrooms: "Bath",
                price: "Price",
                delivery: "Delivery",
                status: "Status",
                developer: "Developer",
                model: "Model",
                ask_details: "Ask Details",
                view_arrow: "→",
                found: "Found",
                properties: "Properties",
                currency: "EGP",
                floor: "Floor",
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DiscountInfo {
    pub discounted_price: f64,
    pub discount_percentage: f64,
    pub original_price: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CarouselItem {
    pub option: usize,
    pub unit_id: Value,
    pub code: Value,
    pub image: String,
    pub unit_image: String,
    pub compound_image: String,
    pub title: Value,
    pub price: String,
    pub has_promo: bool,
    pub promo_text: Value,
    pub discount_info: Option<DiscountInfo>,
    pub area: String,
    pub bedrooms: Value,
    pub bathrooms: Value,
    pub delivery: Value,
    pub status: Value,
    pub developer: Value,
    pub floor: Value,
    pub model: Value,
    pub video_url: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Carousel {
    pub count: usize,
    pub language: Language,
    pub labels: CarouselLabels,
    pub items: Vec<CarouselItem>,
}

/// Discount advertised in `promo_text`, applied to `price`.
pub fn discount_info(price: Option<&Value>, promo_text: Option<&Value>) -> Option<DiscountInfo> {
    let promo = text_of(promo_text)?;
    let original_price = number_of(price).filter(|p| *p != 0.0)?;
    let pct = whole_percent(&promo)?;
    Some(DiscountInfo {
        discounted_price: original_price * (1.0 - pct / 100.0),
        discount_percentage: pct,
        original_price,
    })
}

fn localized_price(row: &Row, language: Language) -> String {
    match number_of(row.get("price")).filter(|p| *p != 0.0) {
        Some(price) if language == Language::Ar => format!("{} جنيه", group_thousands(price)),
        Some(price) => format!("{} EGP", group_thousands(price)),
        None => match language {
            Language::Ar => "السعر عند الطلب".to_string(),
            Language::Franco => "Se3r 3and el talab".to_string(),
            Language::En => "Price on request".to_string(),
        },
    }
}

fn localized_area(row: &Row, language: Language) -> String {
    let area = text_of(row.get("area")).unwrap_or_else(|| "N/A".to_string());
    match language {
        Language::Ar => format!("{} متر مربع", area),
        _ => format!("{} m²", area),
    }
}

fn carousel_image(row: &Row) -> String {
    let base = ["compound_image", "unit_image"]
        .iter()
        .find_map(|key| text_of(row.get(*key)));
    match base {
        Some(url) if !CAROUSEL_IMAGE_EXTENSIONS.iter().any(|ext| url.ends_with(ext)) => format!("{}.jpg", url),
        Some(url) => url,
        None => String::new(),
    }
}

/// Arabic cell text rendered for a Franco reader.
async fn francoize(value: Value, llm: &LLMManager) -> Value {
    match value {
        Value::String(s) if contains_arabic(&s) => {
            Value::String(language::translate(&s, Language::Ar, Language::Franco, llm).await)
        }
        other => other,
    }
}

pub async fn carousel_item(option: usize, row: &Row, language: Language, llm: &LLMManager) -> CarouselItem {
    let mut title = unit_title(row);
    let mut developer = cell_or(row, "developer_name", "N/A");
    let mut status = cell_or(row, "status_text", "Available");

    if language == Language::Franco {
        title = francoize(title, llm).await;
        developer = francoize(developer, llm).await;
        status = if status.as_str() == Some("متاح") {
            Value::String("Available".to_string())
        } else {
            francoize(status, llm).await
        };
    }

    let has_promo_flag = is_truthy(row.get("has_promo"));

    CarouselItem {
        option,
        unit_id: cell_or(row, "unit_id", "N/A"),
        code: cell_or(row, "unt_code", "N/A"),
        image: carousel_image(row),
        unit_image: image_with_extension(row, "unit_image", CAROUSEL_IMAGE_EXTENSIONS),
        compound_image: image_with_extension(row, "compound_image", CAROUSEL_IMAGE_EXTENSIONS),
        title,
        price: localized_price(row, language),
        has_promo: number_of(row.get("has_promo")) == Some(1.0),
        promo_text: cell_or(row, "promo_text", ""),
        discount_info: if has_promo_flag {
            discount_info(row.get("price"), row.get("promo_text"))
        } else {
            None
        },
        area: localized_area(row, language),
        bedrooms: cell_or(row, "room", "N/A"),
        bathrooms: cell_or(row, "bathroom", "N/A"),
        delivery: cell_or(row, "delivery_date", "N/A"),
        status,
        developer,
        floor: cell_or(row, "floor", "N/A"),
        model: cell_or(row, "model_name", "N/A"),
        video_url: video_link(row),
    }
}

pub async fn build_carousel(rows: &[Row], language: Language, llm: &LLMManager) -> Carousel {
    let mut items = Vec::with_capacity(rows.len());
    for (i, row) in rows.iter().enumerate() {
        items.push(carousel_item(i + 1, row, language, llm).await);
    }
    Carousel {
        count: rows.len(),
        language,
        labels: CarouselLabels::for_language(language),
        items,
    }
}

/// Only real unit rows get a carousel; error rows and empty results don't.
pub fn has_unit_rows(rows: &[Row]) -> bool {
    rows.first().map(|r| r.contains_key("unit_id")).unwrap_or(false)
}

/// `<<PROPERTY_CAROUSEL_DATA>>{json}\n\n`
pub async fn carousel_block(rows: &[Row], language: Language, llm: &LLMManager) -> Result<String> {
    let carousel = build_carousel(rows, language, llm).await;
    Ok(format!("{}{}\n\n", CAROUSEL_MARKER, serde_json::to_string(&carousel)?))
}

/// Apology shown above a carousel built from a broadened search.
pub fn alternative_message(language: Language, field: Option<FuzzyField>, original_value: &str) -> String {
    let field = field.unwrap_or_default();
    let display = match (field, language) {
        (FuzzyField::Room, Language::Ar) => "غرف نوم",
        (FuzzyField::Bathroom, Language::Ar) => "حمامات",
        (FuzzyField::Room, _) => "bedrooms",
        (FuzzyField::Bathroom, _) => "bathrooms",
    };

    match language {
        Language::Ar => format!(
            "عذراً، لم أجد وحدات بـ {} {} بالضبط. إليك وحدات بديلة قريبة من طلبك:\n\n",
            original_value, display
        ),
        Language::Franco => format!(
            "Ana asif, mafeesh units b {} {} belzabt. Dol units 2areeba men el request beta3ak:\n\n",
            original_value, display
        ),
        Language::En => format!(
            "I'm sorry, I couldn't find units with exactly {} {}. Here are alternative units close to your request:\n\n",
            original_value, display
        ),
    }
}

// ============================================================================
// History and SQL logs
// ============================================================================

/// Response text worth keeping in chat history: data payloads removed.
pub fn history_text(response: &str) -> String {
    let mut text = response;
    for marker in [CAROUSEL_MARKER, DETAIL_START] {
        if let Some(idx) = text.find(marker) {
            text = text[..idx].trim();
        }
    }
    let text = text.trim();
    if text.is_empty() {
        CAROUSEL_PLACEHOLDER.to_string()
    } else {
        text.to_string()
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SqlLog {
    pub query_name: String,
    pub sql: String,
    pub success: bool,
    pub row_count: usize,
    pub error: Option<Value>,
}

pub fn sql_logs(session: &SessionMemory) -> Vec<SqlLog> {
    let Some(sql) = &session.last_sql else {
        return Vec::new();
    };

    let error = session
        .last_results
        .first()
        .and_then(|row| row.get("error"))
        .cloned();

    vec![SqlLog {
        query_name: "Property Search".to_string(),
        sql: sql.clone(),
        success: !session.last_results.is_empty() && error.is_none(),
        row_count: session.last_results.len(),
        error,
    }]
}

/// Unit id a detail request points at, if it is among the shown results.
pub fn requested_unit(message: &str, last_results: &[Row]) -> Option<i64> {
    let lower = language::ascii_digits(&message.to_lowercase());
    let wanted: i64 = DETAIL_UNIT_RE.captures(&lower)?[1].parse().ok()?;
    last_results
        .iter()
        .filter_map(unit_id_of)
        .find(|id| *id == wanted)
}
