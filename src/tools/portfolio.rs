//! Personalized tools: portfolio reads/writes and position arithmetic
//!
//! The arithmetic tools are pure; the portfolio tools go through the
//! `PortfolioStore` boundary. Writes carry an idempotency key so an
//! upstream duplicate cannot double-apply.

use crate::error::AgentError;
use crate::state::{PortfolioStore, WriteOutcome};
use crate::tools::{Tool, ToolKind};
use crate::Result;
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

fn require_str<'a>(args: &'a Value, key: &str) -> Result<&'a str> {
    args.get(key).and_then(Value::as_str).ok_or_else(|| {
        AgentError::InvalidArguments(format!("expected string argument '{}'", key))
    })
}

fn require_f64(args: &Value, key: &str) -> Result<f64> {
    args.get(key).and_then(Value::as_f64).ok_or_else(|| {
        AgentError::InvalidArguments(format!("expected number argument '{}'", key))
    })
}

fn require_i64(args: &Value, key: &str) -> Result<i64> {
    args.get(key).and_then(Value::as_i64).ok_or_else(|| {
        AgentError::InvalidArguments(format!("expected integer argument '{}'", key))
    })
}

fn require_user_id(args: &Value) -> Result<Uuid> {
    let raw = require_str(args, "user_id")?;
    Uuid::parse_str(raw)
        .map_err(|_| AgentError::InvalidArguments(format!("'{}' is not a valid user id", raw)))
}

/// Mutating tools receive their key from the gateway; it injects one when
/// the model did not supply it.
fn require_idempotency_key(args: &Value) -> Result<Uuid> {
    let raw = require_str(args, "idempotency_key")?;
    Uuid::parse_str(raw).map_err(|_| {
        AgentError::InvalidArguments(format!("'{}' is not a valid idempotency key", raw))
    })
}

pub struct CalculateProfitLossTool;

#[async_trait::async_trait]
impl Tool for CalculateProfitLossTool {
    fn name(&self) -> &'static str {
        "calculate_profit_loss"
    }

    fn description(&self) -> &'static str {
        "Calculate profit or loss for a position from purchase price, quantity and current price"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "purchase_price": { "type": "number" },
                "quantity": { "type": "integer" },
                "current_price": { "type": "number" }
            },
            "required": ["purchase_price", "quantity", "current_price"]
        })
    }

    async fn execute(&self, args: &Value) -> Result<Value> {
        let purchase_price = require_f64(args, "purchase_price")?;
        let quantity = require_i64(args, "quantity")?;
        let current_price = require_f64(args, "current_price")?;

        let profit_loss = (current_price - purchase_price) * quantity as f64;
        let total_investment = purchase_price * quantity as f64;
        let percentage_change = if total_investment != 0.0 {
            Some(profit_loss / total_investment * 100.0)
        } else {
            None
        };

        Ok(json!({
            "profit_loss": profit_loss,
            "percentage_change": percentage_change,
        }))
    }
}

pub struct ExpectedReturnTool;

#[async_trait::async_trait]
impl Tool for ExpectedReturnTool {
    fn name(&self) -> &'static str {
        "expected_return"
    }

    fn description(&self) -> &'static str {
        "Calculate the expected return for a position from purchase price, quantity and target price"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "purchase_price": { "type": "number" },
                "quantity": { "type": "integer" },
                "target_price": { "type": "number" }
            },
            "required": ["purchase_price", "quantity", "target_price"]
        })
    }

    async fn execute(&self, args: &Value) -> Result<Value> {
        let purchase_price = require_f64(args, "purchase_price")?;
        let quantity = require_i64(args, "quantity")?;
        let target_price = require_f64(args, "target_price")?;

        let expected = (target_price - purchase_price) * quantity as f64;
        let percentage_change = if purchase_price != 0.0 {
            Some((target_price - purchase_price) / purchase_price * 100.0)
        } else {
            None
        };

        Ok(json!({
            "expected_return": expected,
            "percentage_change": percentage_change,
        }))
    }
}

pub struct GetUserPortfolioTool {
    store: Arc<dyn PortfolioStore>,
}

impl GetUserPortfolioTool {
    pub fn new(store: Arc<dyn PortfolioStore>) -> Self {
        Self { store }
    }
}

#[async_trait::async_trait]
impl Tool for GetUserPortfolioTool {
    fn name(&self) -> &'static str {
        "get_user_portfolio"
    }

    fn description(&self) -> &'static str {
        "Retrieve the user's stock portfolio (holdings with share counts)"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "user_id": { "type": "string", "description": "UUID of the portfolio owner" }
            },
            "required": ["user_id"]
        })
    }

    async fn execute(&self, args: &Value) -> Result<Value> {
        let user_id = require_user_id(args)?;

        match self.store.load(user_id).await? {
            Some(snapshot) => Ok(serde_json::to_value(snapshot)?),
            None => Err(AgentError::ToolExecution(format!(
                "No portfolio found for user {}",
                user_id
            ))),
        }
    }
}

pub struct AddStockTool {
    store: Arc<dyn PortfolioStore>,
}

impl AddStockTool {
    pub fn new(store: Arc<dyn PortfolioStore>) -> Self {
        Self { store }
    }
}

#[async_trait::async_trait]
impl Tool for AddStockTool {
    fn name(&self) -> &'static str {
        "add_stock"
    }

    fn description(&self) -> &'static str {
        "Add a stock holding to the user's portfolio"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "user_id": { "type": "string" },
                "stock": { "type": "string" },
                "holding": { "type": "integer", "description": "Number of shares" }
            },
            "required": ["user_id", "stock", "holding"]
        })
    }

    fn kind(&self) -> ToolKind {
        ToolKind::Mutating
    }

    async fn execute(&self, args: &Value) -> Result<Value> {
        let user_id = require_user_id(args)?;
        let stock = require_str(args, "stock")?;
        let holding = require_i64(args, "holding")?;
        let key = require_idempotency_key(args)?;

        match self.store.add_stock(user_id, stock, holding, key).await? {
            WriteOutcome::Applied => Ok(json!({
                "message": format!("Added {} ({} shares) for user {}.", stock, holding, user_id)
            })),
            WriteOutcome::AlreadyApplied => Ok(json!({
                "message": format!("{} was already added for user {}; nothing to do.", stock, user_id)
            })),
            WriteOutcome::NotFound => Err(AgentError::ToolExecution(
                "Failed to add stock.".to_string(),
            )),
        }
    }
}

pub struct DeleteStockTool {
    store: Arc<dyn PortfolioStore>,
}

impl DeleteStockTool {
    pub fn new(store: Arc<dyn PortfolioStore>) -> Self {
        Self { store }
    }
}

#[async_trait::async_trait]
impl Tool for DeleteStockTool {
    fn name(&self) -> &'static str {
        "delete_stock"
    }

    fn description(&self) -> &'static str {
        "Delete a stock holding from the user's portfolio"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "user_id": { "type": "string" },
                "stock": { "type": "string" }
            },
            "required": ["user_id", "stock"]
        })
    }

    fn kind(&self) -> ToolKind {
        ToolKind::Mutating
    }

    async fn execute(&self, args: &Value) -> Result<Value> {
        let user_id = require_user_id(args)?;
        let stock = require_str(args, "stock")?;
        let key = require_idempotency_key(args)?;

        match self.store.delete_stock(user_id, stock, key).await? {
            WriteOutcome::Applied => Ok(json!({
                "message": format!("Deleted {} from user {}.", stock, user_id)
            })),
            WriteOutcome::AlreadyApplied => Ok(json!({
                "message": format!("{} was already deleted for user {}; nothing to do.", stock, user_id)
            })),
            WriteOutcome::NotFound => Err(AgentError::ToolExecution(format!(
                "Stock {} not found for user {}.",
                stock, user_id
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::InMemoryPortfolioStore;

    #[tokio::test]
    async fn profit_loss_matches_hand_computation() {
        let tool = CalculateProfitLossTool;
        let out = tool
            .execute(&json!({
                "purchase_price": 100.0,
                "quantity": 10,
                "current_price": 110.0
            }))
            .await
            .unwrap();

        assert_eq!(out["profit_loss"], json!(100.0));
        assert_eq!(out["percentage_change"], json!(10.0));
    }

    #[tokio::test]
    async fn identical_reads_yield_identical_observations() {
        let store = Arc::new(InMemoryPortfolioStore::new());
        let user_id = Uuid::new_v4();
        store
            .seed(
                user_id,
                vec![crate::state::StockHolding {
                    stock: "ACME".to_string(),
                    holding: 3,
                }],
            )
            .await;

        let tool = GetUserPortfolioTool::new(store);
        let args = json!({ "user_id": user_id.to_string() });

        let first = tool.execute(&args).await.unwrap();
        let second = tool.execute(&args).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn missing_portfolio_is_a_descriptive_error() {
        let store = Arc::new(InMemoryPortfolioStore::new());
        let tool = GetUserPortfolioTool::new(store);

        let err = tool
            .execute(&json!({ "user_id": Uuid::new_v4().to_string() }))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("No portfolio found"));
    }

    #[tokio::test]
    async fn add_stock_requires_idempotency_key() {
        let store = Arc::new(InMemoryPortfolioStore::new());
        let tool = AddStockTool::new(store);

        let err = tool
            .execute(&json!({
                "user_id": Uuid::new_v4().to_string(),
                "stock": "ACME",
                "holding": 5
            }))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::InvalidArguments(_)));
    }
}
