//! Tool trait, capability sets, and the capability registry
//!
//! A capability set is the named subset of tools one responder path exposes
//! to the model. The registry is built once at startup and immutable after;
//! a duplicate tool name inside a set is a fatal construction error.

use crate::error::AgentError;
use crate::llm::ToolDecl;
use crate::state::PortfolioStore;
use crate::Result;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

pub mod market;
pub mod portfolio;

pub use market::MarketDataClient;

pub const MARKET_SET: &str = "market";
pub const PERSONALIZED_SET: &str = "personalized";

/// Read tools are idempotent and safe to re-issue; mutating tools have
/// external side effects and are never retried by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    ReadOnly,
    Mutating,
}

/// Trait for a single tool
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    /// JSON schema for the tool's arguments.
    fn parameters(&self) -> Value;
    fn kind(&self) -> ToolKind {
        ToolKind::ReadOnly
    }
    async fn execute(&self, args: &Value) -> Result<Value>;
}

/// An immutable named collection of tools.
pub struct CapabilitySet {
    name: String,
    tools: Vec<Arc<dyn Tool>>,
}

impl CapabilitySet {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tools: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Tool names are unique within a set; the same tool may appear in
    /// multiple sets.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<()> {
        if self.tools.iter().any(|t| t.name() == tool.name()) {
            return Err(AgentError::InvalidRegistry(format!(
                "duplicate tool '{}' in capability set '{}'",
                tool.name(),
                self.name
            )));
        }
        self.tools.push(tool);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.name() == name).cloned()
    }

    pub fn tool_names(&self) -> Vec<&'static str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    /// Declarations handed to the model for tool selection, in registration order.
    pub fn declarations(&self) -> Vec<ToolDecl> {
        self.tools
            .iter()
            .map(|t| ToolDecl {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// Static catalog of capability sets, constructed once at process start.
pub struct CapabilityRegistry {
    sets: HashMap<String, Arc<CapabilitySet>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self {
            sets: HashMap::new(),
        }
    }

    pub fn insert(&mut self, set: CapabilitySet) -> Result<()> {
        if self.sets.contains_key(set.name()) {
            return Err(AgentError::InvalidRegistry(format!(
                "duplicate capability set '{}'",
                set.name()
            )));
        }
        self.sets.insert(set.name().to_string(), Arc::new(set));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<CapabilitySet>> {
        self.sets.get(name).cloned()
    }
}

impl Default for CapabilityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Build the default registry: the "market" set of real-time lookups and the
/// "personalized" set of portfolio and arithmetic tools. Company lookup is
/// shared between both sets.
pub fn create_default_registry(
    market_api: Option<MarketDataClient>,
    portfolio_store: Arc<dyn PortfolioStore>,
) -> Result<CapabilityRegistry> {
    let mut registry = CapabilityRegistry::new();

    let mut market = CapabilitySet::new(MARKET_SET);
    market.register(Arc::new(market::GetCurrentPriceTool::new(
        market_api.clone(),
    )))?;
    market.register(Arc::new(market::CompanyInformationTool::new(
        market_api.clone(),
    )))?;
    market.register(Arc::new(market::DividendEarningsDateTool::new(
        market_api.clone(),
    )))?;
    market.register(Arc::new(market::StockSplitsHistoryTool::new(
        market_api.clone(),
    )))?;
    market.register(Arc::new(market::StockNewsTool::new(market_api.clone())))?;
    market.register(Arc::new(market::StockCompareTool::new(market_api.clone())))?;
    market.register(Arc::new(market::DividendHistoryTool::new(
        market_api.clone(),
    )))?;
    market.register(Arc::new(market::MutualFundHoldersTool::new(
        market_api.clone(),
    )))?;
    market.register(Arc::new(market::InstitutionalHoldersTool::new(
        market_api.clone(),
    )))?;
    registry.insert(market)?;

    let mut personalized = CapabilitySet::new(PERSONALIZED_SET);
    personalized.register(Arc::new(market::CompanyInformationTool::new(
        market_api.clone(),
    )))?;
    personalized.register(Arc::new(portfolio::CalculateProfitLossTool))?;
    personalized.register(Arc::new(portfolio::ExpectedReturnTool))?;
    personalized.register(Arc::new(market::StockPerformanceAnalysisTool::new(
        market_api.clone(),
    )))?;
    personalized.register(Arc::new(market::BuySellRecommendationTool::new(
        market_api.clone(),
    )))?;
    personalized.register(Arc::new(portfolio::GetUserPortfolioTool::new(
        portfolio_store.clone(),
    )))?;
    personalized.register(Arc::new(portfolio::AddStockTool::new(
        portfolio_store.clone(),
    )))?;
    personalized.register(Arc::new(portfolio::DeleteStockTool::new(portfolio_store)))?;
    personalized.register(Arc::new(market::AggregateMarketDataTool::new(market_api)))?;
    registry.insert(personalized)?;

    Ok(registry)
}
