//! Unit database access
//!
//! Generated SQL runs against the `unit_search_sorting` view. Rows come back
//! as JSON maps so they can flow straight into prompts, carousels and the
//! session without a fixed struct per column set.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde_json::{Map, Number, Value};
use sqlx::mysql::{MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::{Column, Row as SqlRow, TypeInfo, ValueRef};
use std::time::Duration;

use crate::config::{DatabaseConfig, UNIT_TABLE};

/// One result row keyed by column name.
pub type Row = Map<String, Value>;

#[async_trait]
pub trait UnitStore: Send + Sync {
    /// Run a read-only statement and return every row.
    async fn fetch_rows(&self, sql: &str) -> Result<Vec<Row>>;

    /// Look up a single unit by id.
    async fn fetch_unit(&self, unit_id: i64) -> Result<Option<Row>>;

    async fn ping(&self) -> Result<()>;
}

/// Reject anything that is not a single SELECT statement.
pub fn ensure_select(sql: &str) -> Result<()> {
    let trimmed = sql.trim().trim_end_matches(';').trim();
    let first = trimmed
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_uppercase();

    if first != "SELECT" {
        bail!("Only SELECT queries are allowed");
    }
    if trimmed.contains(';') {
        bail!("Multiple statements are not allowed");
    }
    Ok(())
}

pub struct MySqlUnitStore {
    pool: MySqlPool,
}

impl MySqlUnitStore {
    /// Builds the pool without opening a connection; the first query connects.
    pub fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = MySqlPoolOptions::new()
            .max_connections(config.pool_size.max(1))
            .acquire_timeout(Duration::from_secs(10))
            .connect_lazy(&config.connection_url())
            .context("Invalid MySQL connection settings")?;

        tracing::info!(
            host = %config.host,
            port = config.port,
            database = %config.name,
            pool_size = config.pool_size,
            "MySQL pool configured"
        );
        Ok(Self { pool })
    }

    pub fn from_pool(pool: MySqlPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UnitStore for MySqlUnitStore {
    async fn fetch_rows(&self, sql: &str) -> Result<Vec<Row>> {
        ensure_select(sql)?;
        let rows = sqlx::query(sql)
            .fetch_all(&self.pool)
            .await
            .context("Query execution failed")?;
        tracing::debug!(rows = rows.len(), "SQL executed");
        rows.iter().map(row_to_json).collect()
    }

    async fn fetch_unit(&self, unit_id: i64) -> Result<Option<Row>> {
        let sql = format!("SELECT * FROM {} WHERE unit_id = ? LIMIT 1", UNIT_TABLE);
        let row = sqlx::query(&sql)
            .bind(unit_id)
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("Failed to load unit {}", unit_id))?;
        row.as_ref().map(row_to_json).transpose()
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .context("Database is unreachable")?;
        Ok(())
    }
}

fn row_to_json(row: &MySqlRow) -> Result<Row> {
    let mut out = Map::new();
    for (i, column) in row.columns().iter().enumerate() {
        let raw = row
            .try_get_raw(i)
            .map_err(|e| anyhow!("column {}: {}", column.name(), e))?;
        let value = if raw.is_null() {
            Value::Null
        } else {
            column_value(row, i, column.type_info().name())
        };
        out.insert(column.name().to_string(), value);
    }
    Ok(out)
}

fn column_value(row: &MySqlRow, i: usize, type_name: &str) -> Value {
    let upper = type_name.to_uppercase();
    let unsigned = upper.contains("UNSIGNED");
    let base = upper.split_whitespace().next().unwrap_or_default();

    match base {
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "INTEGER" | "BIGINT" | "YEAR" => {
            if unsigned {
                row.try_get_unchecked::<u64, _>(i)
                    .map(Value::from)
                    .unwrap_or(Value::Null)
            } else {
                row.try_get_unchecked::<i64, _>(i)
                    .map(Value::from)
                    .unwrap_or(Value::Null)
            }
        }
        "BOOLEAN" | "BOOL" => row
            .try_get_unchecked::<bool, _>(i)
            .map(|b| Value::from(u8::from(b)))
            .unwrap_or(Value::Null),
        "FLOAT" => row
            .try_get_unchecked::<f32, _>(i)
            .ok()
            .and_then(|f| Number::from_f64(f as f64))
            .map(Value::Number)
            .unwrap_or(Value::Null),
        "DOUBLE" | "REAL" => row
            .try_get_unchecked::<f64, _>(i)
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        "DECIMAL" | "NUMERIC" => row
            .try_get_unchecked::<String, _>(i)
            .ok()
            .and_then(|s| s.parse::<f64>().ok())
            .and_then(Number::from_f64)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        "DATE" => row
            .try_get_unchecked::<chrono::NaiveDate, _>(i)
            .map(|d| Value::String(d.to_string()))
            .unwrap_or(Value::Null),
        "DATETIME" | "TIMESTAMP" => row
            .try_get_unchecked::<chrono::NaiveDateTime, _>(i)
            .map(|d| Value::String(d.to_string()))
            .unwrap_or(Value::Null),
        "TIME" => row
            .try_get_unchecked::<chrono::NaiveTime, _>(i)
            .map(|t| Value::String(t.to_string()))
            .unwrap_or(Value::Null),
        _ => match row.try_get_unchecked::<String, _>(i) {
            Ok(s) => Value::String(s),
            Err(_) => row
                .try_get_unchecked::<Vec<u8>, _>(i)
                .map(|b| Value::String(String::from_utf8_lossy(&b).into_owned()))
                .unwrap_or(Value::Null),
        },
    }
}

/// Numeric view of a JSON cell; numeric strings count, empty strings don't.
pub fn number_of(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().replace(',', "").parse::<f64>().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

/// Display text of a JSON cell without surrounding quotes.
pub fn text_of(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::Null => None,
        Value::String(s) if s.trim().is_empty() => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Truthiness used when deciding whether a field is shown: null, false, zero and empty are falsy.
pub fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(a)) => !a.is_empty(),
        Some(Value::Object(o)) => !o.is_empty(),
    }
}

/// Row's `unit_id` as an integer; zero counts as missing.
pub fn unit_id_of(row: &Row) -> Option<i64> {
    number_of(row.get("unit_id"))
        .map(|id| id as i64)
        .filter(|id| *id != 0)
}

/// Append `.jpg` to an image field whose value lacks one of `extensions`.
pub fn fix_image_extension(row: &mut Row, key: &str, extensions: &[&str]) {
    let Some(Value::String(url)) = row.get(key) else {
        return;
    };
    if url.is_empty() {
        return;
    }
    let lower = url.to_lowercase();
    if !extensions.iter().any(|ext| lower.ends_with(ext)) {
        let fixed = format!("{}.jpg", url);
        row.insert(key.to_string(), Value::String(fixed));
    }
}

#[cfg(test)]
pub use memory::InMemoryUnitStore;


/// Build a row from a JSON object literal. Test helper.
#[cfg(test)]
pub fn row(value: Value) -> Row {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_only_select_passes() {
        assert!(ensure_select("SELECT * FROM unit_search_sorting LIMIT 5;").is_ok());
        assert!(ensure_select("  select unit_id from unit_search_sorting").is_ok());
        assert!(ensure_select("DELETE FROM unit_search_sorting").is_err());
        assert!(ensure_select("SELECT 1; DROP TABLE unit_search_sorting").is_err());
        assert!(ensure_select("").is_err());
    }

    #[test]
    fn test_cell_helpers() {
        let r = row(json!({"price": "2,500,000", "room": 0, "floor": "", "area": 120.5, "x": null}));
        assert_eq!(number_of(r.get("price")), Some(2_500_000.0));
        assert_eq!(number_of(r.get("area")), Some(120.5));
        assert_eq!(number_of(r.get("floor")), None);
        assert!(!is_truthy(r.get("room")));
        assert!(!is_truthy(r.get("floor")));
        assert!(!is_truthy(r.get("x")));
        assert!(is_truthy(r.get("area")));
        assert_eq!(text_of(r.get("area")).as_deref(), Some("120.5"));
        assert_eq!(text_of(r.get("floor")), None);
    }

    #[test]
    fn test_unit_id_and_image_fix() {
        let mut r = row(json!({"unit_id": 4521, "unit_image": "units/4521", "compound_image": "c.PNG"}));
        assert_eq!(unit_id_of(&r), Some(4521));
        assert_eq!(unit_id_of(&row(json!({"unit_id": 0}))), None);

        fix_image_extension(&mut r, "unit_image", &[".jpg", ".png"]);
        fix_image_extension(&mut r, "compound_image", &[".jpg", ".png"]);
        fix_image_extension(&mut r, "missing", &[".jpg"]);
        assert_eq!(r["unit_image"], "units/4521.jpg");
        assert_eq!(r["compound_image"], "c.PNG");
        assert!(r.get("missing").is_none());
    }

    #[tokio::test]
    async fn test_in_memory_store_replays_results() {
        let store = InMemoryUnitStore::new();
        store.push_rows(vec![row(json!({"unit_id": 1}))]);
        store.push_error("connection reset");

        assert_eq!(store.fetch_rows("SELECT 1").await.unwrap().len(), 1);
        assert!(store.fetch_rows("SELECT 2").await.is_err());
        assert!(store.fetch_rows("SELECT 3").await.unwrap().is_empty());
        assert!(store.fetch_rows("UPDATE x SET y = 1").await.is_err());
        assert_eq!(store.executed().len(), 3);
    }
}
