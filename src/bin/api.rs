use fingpt_agent::{
    api::start_server,
    handler::{AgentConfig, QueryHandler},
    llm::GeminiClient,
    state::InMemoryPortfolioStore,
    tools::{create_default_registry, MarketDataClient},
};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    // Load environment variables
    dotenv::dotenv().ok();

    let gemini_api_key = std::env::var("GEMINI_API_KEY").unwrap_or_else(|_| {
        eprintln!("GEMINI_API_KEY not set in .env; model calls will fail until configured");
        String::new()
    });

    let api_port: u16 = std::env::var("PORT")
        .or_else(|_| std::env::var("API_PORT"))
        .unwrap_or_else(|_| "8080".to_string())
        .parse()?;

    info!("FinGPT Agent - API Server");
    info!("Port: {}", api_port);

    // Construct the immutable configuration once; a malformed registry is
    // the only fatal error, and only here at startup.
    let model = Arc::new(GeminiClient::new(gemini_api_key));
    let market_api = MarketDataClient::from_env();
    if market_api.is_none() {
        info!("MARKET_API_BASE_URL not set; market tools will report the provider as unconfigured");
    }
    let portfolio_store = Arc::new(InMemoryPortfolioStore::new());
    let registry = Arc::new(create_default_registry(market_api, portfolio_store)?);

    let handler = Arc::new(QueryHandler::new(model, registry, AgentConfig::default()));

    info!("Query handler initialized");

    start_server(handler, api_port).await?;

    Ok(())
}
