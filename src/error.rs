//! Error types for the FinGPT agent core

use thiserror::Error;

/// Result type alias for agent operations
pub type Result<T> = std::result::Result<T, AgentError>;

#[derive(Error, Debug)]
pub enum AgentError {

    // =============================
    // Classification / Routing
    // =============================

    #[error("Classification unavailable: {0}")]
    ClassificationUnavailable(String),

    // =============================
    // Model boundary
    // =============================

    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("Model response error: {0}")]
    ModelResponse(String),

    // =============================
    // Tool boundary
    // =============================

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),

    #[error("Tool execution error: {0}")]
    ToolExecution(String),

    #[error("Tool timed out after {0:?}")]
    ToolTimeout(std::time::Duration),

    // =============================
    // Startup (the only fatal class)
    // =============================

    #[error("Invalid capability registry: {0}")]
    InvalidRegistry(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
