//! Core data models for the FinGPT agent

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

//
// ================= Intent =================
//

/// Closed intent taxonomy. Produced fresh per query, never persisted by the core.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Intent {
    Greeting,
    General,
    MarketData,
    Personalized,
    Unclassified,
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Intent::Greeting => "greeting",
            Intent::General => "general",
            Intent::MarketData => "market-data",
            Intent::Personalized => "personalized",
            Intent::Unclassified => "unclassified",
        };
        write!(f, "{}", s)
    }
}

//
// ================= Conversation history =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
}

/// One persisted conversation turn. Owned by the external persistence
/// collaborator; the core only reads an ordered snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub role: TurnRole,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: TurnRole::User,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Assistant,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }
}

//
// ================= Loop transcript =================
//

/// One entry in the loop transcript. Model turns and observation turns
/// alternate; the provider client decides how each variant goes on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChatMessage {
    System { text: String },
    User { text: String },
    Assistant { text: String },
    /// Model turn that requested tool invocations.
    ToolRequest { calls: Vec<ToolCall> },
    /// Observation turn feeding tool results back to the model.
    ToolResult { observations: Vec<Observation> },
}

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self::System { text: text.into() }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::User { text: text.into() }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::Assistant { text: text.into() }
    }
}

//
// ================= Tool I/O =================
//

/// A single model-requested tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    pub name: String,
    pub arguments: serde_json::Value,
}

/// Normalized result of executing one ToolCall. Failures are values,
/// never raised faults, once inside the loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    pub tool_name: String,
    pub success: bool,
    pub payload: serde_json::Value,
    pub error: Option<String>,
    pub elapsed_ms: u64,
}

impl Observation {
    pub fn success(tool_name: impl Into<String>, payload: serde_json::Value, elapsed_ms: u64) -> Self {
        Self {
            tool_name: tool_name.into(),
            success: true,
            payload,
            error: None,
            elapsed_ms,
        }
    }

    pub fn failure(tool_name: impl Into<String>, message: impl Into<String>, elapsed_ms: u64) -> Self {
        Self {
            tool_name: tool_name.into(),
            success: false,
            payload: serde_json::Value::Null,
            error: Some(message.into()),
            elapsed_ms,
        }
    }
}

//
// ================= Query outcome =================
//

/// What `handle_query` returns to the caller. The caller persists the query
/// and the answer as new turns; the core never writes chat storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryOutcome {
    pub intent: Intent,
    pub answer: String,
}
