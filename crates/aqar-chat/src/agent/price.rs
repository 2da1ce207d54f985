use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

use super::context::AgentContext;
use super::tools::{AgentTool, ToolInput, ToolResult};
use crate::database::UnitStore;
use crate::payment::price_with_discount;

/// Quick price check for one unit with its best available discount.
pub struct PriceTool {
    store: Arc<dyn UnitStore>,
}

impl PriceTool {
    pub fn new(store: Arc<dyn UnitStore>) -> Self {
        Self { store }
    }
}

/// Models send ids as numbers or numeric strings.
fn unit_id_param(parameters: &Value) -> Result<i64> {
    match &parameters["unit_id"] {
        Value::Number(n) => n.as_i64().ok_or_else(|| anyhow!("unit_id must be an integer")),
        Value::String(s) => s
            .trim()
            .parse()
            .map_err(|_| anyhow!("unit_id must be an integer")),
        _ => Err(anyhow!("Missing unit_id parameter")),
    }
}

#[async_trait]
impl AgentTool for PriceTool {
    fn id(&self) -> &str {
        "get_unit_price_with_discount"
    }

    fn name(&self) -> &str {
        "Unit Price"
    }

    fn description(&self) -> &str {
        "Get the price of a unit including the best available discount (promotional or payment plan)."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "unit_id": {
                    "type": "integer",
                    "description": "The unit ID"
                }
            },
            "required": ["unit_id"]
        })
    }

    async fn execute(&self, input: ToolInput, _context: AgentContext) -> Result<ToolResult> {
        let unit_id = unit_id_param(&input.parameters)?;

        match self.store.fetch_unit(unit_id).await {
            Ok(row) => Ok(ToolResult::ok(price_with_discount(unit_id, row.as_ref()))),
            Err(e) => {
                tracing::warn!(error = %e, unit_id, "Price lookup failed");
                Ok(ToolResult::failed(format!("Error: {}", e), e.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{row, InMemoryUnitStore};
    use crate::session::SessionMemory;
    use parking_lot::Mutex;

    fn ctx() -> AgentContext {
        AgentContext::new("p", Arc::new(Mutex::new(SessionMemory::new())))
    }

    #[test]
    fn test_unit_id_param_forms() {
        assert_eq!(unit_id_param(&json!({"unit_id": 42})).unwrap(), 42);
        assert_eq!(unit_id_param(&json!({"unit_id": " 42 "})).unwrap(), 42);
        assert!(unit_id_param(&json!({"unit_id": "abc"})).is_err());
        assert!(unit_id_param(&json!({})).is_err());
    }

    #[tokio::test]
    async fn test_price_lookup() {
        let store = InMemoryUnitStore::new();
        store.insert_unit(7, row(json!({"unit_id": 7, "price": 2000000, "compound_name": "Noor"})));
        let tool = PriceTool::new(store);

        let found = tool
            .execute(
                ToolInput { tool_id: "get_unit_price_with_discount".into(), parameters: json!({"unit_id": 7}) },
                ctx(),
            )
            .await
            .unwrap();
        assert!(found.output.contains("Noor"));

        let missing = tool
            .execute(
                ToolInput { tool_id: "get_unit_price_with_discount".into(), parameters: json!({"unit_id": 8}) },
                ctx(),
            )
            .await
            .unwrap();
        assert_eq!(missing.output, "❌ Unit ID 8 not found or price not available");
    }
}
