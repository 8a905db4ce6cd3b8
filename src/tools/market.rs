//! Market-data tools
//!
//! Each tool is a thin call-and-reshape against the market-data HTTP
//! provider configured via MARKET_API_BASE_URL. All of them are read-only.

use crate::error::AgentError;
use crate::tools::Tool;
use crate::Result;
use reqwest::Client;
use serde_json::{json, Value};
use std::env;
use std::time::Duration;

/// Connection-pooled client for the market-data provider.
#[derive(Clone)]
pub struct MarketDataClient {
    client: Client,
    base_url: String,
}

impl MarketDataClient {
    pub fn from_env() -> Option<Self> {
        let base_url = env::var("MARKET_API_BASE_URL").ok()?;
        Some(Self::new(base_url))
    }

    pub fn new(base_url: String) -> Self {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(8)
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn get_json(&self, path: &str) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);

        let response = self.client.get(&url).send().await.map_err(|e| {
            AgentError::ToolExecution(format!("Market API request failed for {}: {}", path, e))
        })?;

        let status = response.status();
        let body = response
            .json::<Value>()
            .await
            .map_err(|e| AgentError::ToolExecution(format!("Invalid JSON response: {}", e)))?;

        if !status.is_success() {
            return Err(AgentError::ToolExecution(format!(
                "Market API returned {} for {}: {}",
                status, path, body
            )));
        }

        Ok(body)
    }
}

fn require_api(api: &Option<MarketDataClient>) -> Result<&MarketDataClient> {
    api.as_ref().ok_or_else(|| {
        AgentError::ToolExecution("MARKET_API_BASE_URL is not configured".to_string())
    })
}

fn require_str<'a>(args: &'a Value, key: &str) -> Result<&'a str> {
    args.get(key).and_then(Value::as_str).ok_or_else(|| {
        AgentError::InvalidArguments(format!("expected string argument '{}'", key))
    })
}

fn ticker_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "ticker": { "type": "string", "description": "Stock ticker symbol, e.g. ACME" }
        },
        "required": ["ticker"]
    })
}

pub struct GetCurrentPriceTool {
    api: Option<MarketDataClient>,
}

impl GetCurrentPriceTool {
    pub fn new(api: Option<MarketDataClient>) -> Self {
        Self { api }
    }
}

#[async_trait::async_trait]
impl Tool for GetCurrentPriceTool {
    fn name(&self) -> &'static str {
        "get_current_price"
    }

    fn description(&self) -> &'static str {
        "Retrieve the current market price for the given ticker"
    }

    fn parameters(&self) -> Value {
        ticker_schema()
    }

    async fn execute(&self, args: &Value) -> Result<Value> {
        let api = require_api(&self.api)?;
        let ticker = require_str(args, "ticker")?;

        let info = api.get_json(&format!("/v1/quote/{}", ticker)).await?;
        let price = info.get("regularMarketPrice").cloned();

        match price {
            Some(price) if !price.is_null() => Ok(json!({
                "ticker": ticker,
                "current_price": price,
            })),
            _ => Err(AgentError::ToolExecution(format!(
                "Current price not available for ticker {}",
                ticker
            ))),
        }
    }
}

pub struct CompanyInformationTool {
    api: Option<MarketDataClient>,
}

impl CompanyInformationTool {
    pub fn new(api: Option<MarketDataClient>) -> Self {
        Self { api }
    }
}

#[async_trait::async_trait]
impl Tool for CompanyInformationTool {
    fn name(&self) -> &'static str {
        "company_information"
    }

    fn description(&self) -> &'static str {
        "Retrieve company information (industry, sector, business summary, market cap) for the given ticker"
    }

    fn parameters(&self) -> Value {
        ticker_schema()
    }

    async fn execute(&self, args: &Value) -> Result<Value> {
        let api = require_api(&self.api)?;
        let ticker = require_str(args, "ticker")?;
        api.get_json(&format!("/v1/company/{}", ticker)).await
    }
}

pub struct StockNewsTool {
    api: Option<MarketDataClient>,
}

impl StockNewsTool {
    pub fn new(api: Option<MarketDataClient>) -> Self {
        Self { api }
    }
}

#[async_trait::async_trait]
impl Tool for StockNewsTool {
    fn name(&self) -> &'static str {
        "stock_news"
    }

    fn description(&self) -> &'static str {
        "Retrieve the latest news articles for the given stock ticker"
    }

    fn parameters(&self) -> Value {
        ticker_schema()
    }

    async fn execute(&self, args: &Value) -> Result<Value> {
        let api = require_api(&self.api)?;
        let ticker = require_str(args, "ticker")?;

        let news = api.get_json(&format!("/v1/news/{}", ticker)).await?;
        let articles = news.get("articles").cloned().unwrap_or(news);

        if articles.as_array().map_or(false, |a| a.is_empty()) {
            return Err(AgentError::ToolExecution(format!(
                "No recent news found for ticker {}",
                ticker
            )));
        }

        Ok(json!({ "ticker": ticker, "articles": articles }))
    }
}

pub struct StockCompareTool {
    api: Option<MarketDataClient>,
}

impl StockCompareTool {
    pub fn new(api: Option<MarketDataClient>) -> Self {
        Self { api }
    }
}

#[async_trait::async_trait]
impl Tool for StockCompareTool {
    fn name(&self) -> &'static str {
        "stock_compare"
    }

    fn description(&self) -> &'static str {
        "Compare two stock tickers by returning their respective company information"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "ticker1": { "type": "string" },
                "ticker2": { "type": "string" }
            },
            "required": ["ticker1", "ticker2"]
        })
    }

    async fn execute(&self, args: &Value) -> Result<Value> {
        let api = require_api(&self.api)?;
        let ticker1 = require_str(args, "ticker1")?;
        let ticker2 = require_str(args, "ticker2")?;

        let first = api.get_json(&format!("/v1/company/{}", ticker1)).await?;
        let second = api.get_json(&format!("/v1/company/{}", ticker2)).await?;

        Ok(json!({ ticker1: first, ticker2: second }))
    }
}

pub struct DividendHistoryTool {
    api: Option<MarketDataClient>,
}

impl DividendHistoryTool {
    pub fn new(api: Option<MarketDataClient>) -> Self {
        Self { api }
    }
}

#[async_trait::async_trait]
impl Tool for DividendHistoryTool {
    fn name(&self) -> &'static str {
        "last_n_years_dividends"
    }

    fn description(&self) -> &'static str {
        "Retrieve dividends paid over the last n years for the given ticker"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "ticker": { "type": "string" },
                "years": { "type": "integer", "description": "How many years back to include" }
            },
            "required": ["ticker", "years"]
        })
    }

    async fn execute(&self, args: &Value) -> Result<Value> {
        let api = require_api(&self.api)?;
        let ticker = require_str(args, "ticker")?;
        let years = args.get("years").and_then(Value::as_i64).ok_or_else(|| {
            AgentError::InvalidArguments("expected integer argument 'years'".to_string())
        })?;

        api.get_json(&format!("/v1/dividends/{}?years={}", ticker, years))
            .await
    }
}

pub struct DividendEarningsDateTool {
    api: Option<MarketDataClient>,
}

impl DividendEarningsDateTool {
    pub fn new(api: Option<MarketDataClient>) -> Self {
        Self { api }
    }
}

#[async_trait::async_trait]
impl Tool for DividendEarningsDateTool {
    fn name(&self) -> &'static str {
        "last_dividend_and_earnings_date"
    }

    fn description(&self) -> &'static str {
        "Retrieve the company's last dividend and earnings release dates"
    }

    fn parameters(&self) -> Value {
        ticker_schema()
    }

    async fn execute(&self, args: &Value) -> Result<Value> {
        let api = require_api(&self.api)?;
        let ticker = require_str(args, "ticker")?;
        api.get_json(&format!("/v1/calendar/{}", ticker)).await
    }
}

pub struct StockSplitsHistoryTool {
    api: Option<MarketDataClient>,
}

impl StockSplitsHistoryTool {
    pub fn new(api: Option<MarketDataClient>) -> Self {
        Self { api }
    }
}

#[async_trait::async_trait]
impl Tool for StockSplitsHistoryTool {
    fn name(&self) -> &'static str {
        "stock_splits_history"
    }

    fn description(&self) -> &'static str {
        "Retrieve historical stock splits data for the given ticker"
    }

    fn parameters(&self) -> Value {
        ticker_schema()
    }

    async fn execute(&self, args: &Value) -> Result<Value> {
        let api = require_api(&self.api)?;
        let ticker = require_str(args, "ticker")?;
        api.get_json(&format!("/v1/splits/{}", ticker)).await
    }
}

pub struct MutualFundHoldersTool {
    api: Option<MarketDataClient>,
}

impl MutualFundHoldersTool {
    pub fn new(api: Option<MarketDataClient>) -> Self {
        Self { api }
    }
}

#[async_trait::async_trait]
impl Tool for MutualFundHoldersTool {
    fn name(&self) -> &'static str {
        "summary_of_mutual_fund_holders"
    }

    fn description(&self) -> &'static str {
        "Retrieve the company's top mutual fund holders with share percentage, stock count and holding value"
    }

    fn parameters(&self) -> Value {
        ticker_schema()
    }

    async fn execute(&self, args: &Value) -> Result<Value> {
        let api = require_api(&self.api)?;
        let ticker = require_str(args, "ticker")?;
        api.get_json(&format!("/v1/holders/mutual-fund/{}", ticker))
            .await
    }
}

pub struct InstitutionalHoldersTool {
    api: Option<MarketDataClient>,
}

impl InstitutionalHoldersTool {
    pub fn new(api: Option<MarketDataClient>) -> Self {
        Self { api }
    }
}

#[async_trait::async_trait]
impl Tool for InstitutionalHoldersTool {
    fn name(&self) -> &'static str {
        "summary_of_institutional_holders"
    }

    fn description(&self) -> &'static str {
        "Retrieve the company's top institutional holders with share percentage, stock count and holding value"
    }

    fn parameters(&self) -> Value {
        ticker_schema()
    }

    async fn execute(&self, args: &Value) -> Result<Value> {
        let api = require_api(&self.api)?;
        let ticker = require_str(args, "ticker")?;
        api.get_json(&format!("/v1/holders/institutional/{}", ticker))
            .await
    }
}

/// Close-price history from the provider: `{ "closes": [...] }` or a bare
/// array of numbers.
async fn fetch_closes(api: &MarketDataClient, ticker: &str, period: &str) -> Result<Vec<f64>> {
    let history = api
        .get_json(&format!("/v1/history/{}?period={}", ticker, period))
        .await?;
    let closes = history.get("closes").cloned().unwrap_or(history);

    closes
        .as_array()
        .map(|values| values.iter().filter_map(Value::as_f64).collect())
        .ok_or_else(|| {
            AgentError::ToolExecution(format!(
                "No historical data available for ticker {}",
                ticker
            ))
        })
}

/// Daily-return statistics over a close series: mean return and sample
/// volatility (both in percent) plus the overall trend direction.
fn performance_stats(closes: &[f64]) -> Option<(f64, f64, &'static str)> {
    if closes.len() < 2 {
        return None;
    }

    let returns: Vec<f64> = closes.windows(2).map(|w| (w[1] - w[0]) / w[0]).collect();
    let mean = returns.iter().sum::<f64>() / returns.len() as f64;
    let variance = if returns.len() > 1 {
        returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (returns.len() - 1) as f64
    } else {
        0.0
    };
    let trend = if closes[closes.len() - 1] > closes[0] {
        "upward"
    } else {
        "downward"
    };

    Some((mean * 100.0, variance.sqrt() * 100.0, trend))
}

const SHORT_MA_WINDOW: usize = 20;
const LONG_MA_WINDOW: usize = 50;

/// Moving-average crossover over a close series: latest short/long averages
/// and the buy/sell call. None when the series is shorter than the long window.
fn moving_average_crossover(closes: &[f64]) -> Option<(f64, f64, &'static str)> {
    if closes.len() < LONG_MA_WINDOW {
        return None;
    }

    let tail_mean =
        |window: usize| closes[closes.len() - window..].iter().sum::<f64>() / window as f64;
    let short_ma = tail_mean(SHORT_MA_WINDOW);
    let long_ma = tail_mean(LONG_MA_WINDOW);
    let recommendation = if short_ma > long_ma { "buy" } else { "sell" };

    Some((short_ma, long_ma, recommendation))
}

pub struct StockPerformanceAnalysisTool {
    api: Option<MarketDataClient>,
}

impl StockPerformanceAnalysisTool {
    pub fn new(api: Option<MarketDataClient>) -> Self {
        Self { api }
    }
}

#[async_trait::async_trait]
impl Tool for StockPerformanceAnalysisTool {
    fn name(&self) -> &'static str {
        "stock_performance_analysis"
    }

    fn description(&self) -> &'static str {
        "Analyze historical performance of a stock over a period (default 1y): average return, volatility and trend"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "ticker": { "type": "string" },
                "period": { "type": "string", "description": "History period, e.g. 6mo or 1y" }
            },
            "required": ["ticker"]
        })
    }

    async fn execute(&self, args: &Value) -> Result<Value> {
        let api = require_api(&self.api)?;
        let ticker = require_str(args, "ticker")?;
        let period = args.get("period").and_then(Value::as_str).unwrap_or("1y");

        let closes = fetch_closes(api, ticker, period).await?;
        let (average_return, volatility, trend) =
            performance_stats(&closes).ok_or_else(|| {
                AgentError::ToolExecution(format!(
                    "No historical data available for ticker {}",
                    ticker
                ))
            })?;

        Ok(json!({
            "average_return": average_return,
            "volatility": volatility,
            "trend": trend,
        }))
    }
}

pub struct BuySellRecommendationTool {
    api: Option<MarketDataClient>,
}

impl BuySellRecommendationTool {
    pub fn new(api: Option<MarketDataClient>) -> Self {
        Self { api }
    }
}

#[async_trait::async_trait]
impl Tool for BuySellRecommendationTool {
    fn name(&self) -> &'static str {
        "buy_sell_recommendation"
    }

    fn description(&self) -> &'static str {
        "Recommend buying or selling a stock using a 20/50-day moving average crossover"
    }

    fn parameters(&self) -> Value {
        ticker_schema()
    }

    async fn execute(&self, args: &Value) -> Result<Value> {
        let api = require_api(&self.api)?;
        let ticker = require_str(args, "ticker")?;

        let closes = fetch_closes(api, ticker, "6mo").await?;
        let (short_ma, long_ma, recommendation) =
            moving_average_crossover(&closes).ok_or_else(|| {
                AgentError::ToolExecution(format!(
                    "Not enough historical data for ticker {}",
                    ticker
                ))
            })?;

        Ok(json!({
            "short_moving_average": short_ma,
            "long_moving_average": long_ma,
            "recommendation": recommendation,
        }))
    }
}

pub struct AggregateMarketDataTool {
    api: Option<MarketDataClient>,
}

impl AggregateMarketDataTool {
    pub fn new(api: Option<MarketDataClient>) -> Self {
        Self { api }
    }
}

#[async_trait::async_trait]
impl Tool for AggregateMarketDataTool {
    fn name(&self) -> &'static str {
        "aggregate_market_data"
    }

    fn description(&self) -> &'static str {
        "Aggregate market data for multiple tickers: per-ticker price and market cap plus a summary"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "tickers": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Ticker symbols to aggregate"
                }
            },
            "required": ["tickers"]
        })
    }

    async fn execute(&self, args: &Value) -> Result<Value> {
        let api = require_api(&self.api)?;
        let tickers: Vec<&str> = args
            .get("tickers")
            .and_then(Value::as_array)
            .map(|values| values.iter().filter_map(Value::as_str).collect())
            .ok_or_else(|| {
                AgentError::InvalidArguments(
                    "expected array argument 'tickers'".to_string(),
                )
            })?;

        let mut aggregated = serde_json::Map::new();
        let mut total_price = 0.0;
        let mut priced = 0usize;
        let mut market_caps: Vec<f64> = Vec::new();

        for ticker in tickers {
            let info = api.get_json(&format!("/v1/quote/{}", ticker)).await?;
            let price = info.get("regularMarketPrice").and_then(Value::as_f64);
            let market_cap = info.get("marketCap").and_then(Value::as_f64);

            if let Some(price) = price {
                total_price += price;
                priced += 1;
            }
            if let Some(cap) = market_cap {
                market_caps.push(cap);
            }

            aggregated.insert(
                ticker.to_string(),
                json!({ "price": price, "marketCap": market_cap }),
            );
        }

        let average_price = (priced > 0).then(|| total_price / priced as f64);
        let total_market_cap =
            (!market_caps.is_empty()).then(|| market_caps.iter().sum::<f64>());

        aggregated.insert(
            "summary".to_string(),
            json!({
                "average_price": average_price,
                "total_market_cap": total_market_cap,
            }),
        );

        Ok(Value::Object(aggregated))
    }
}
