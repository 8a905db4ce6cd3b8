//! FinGPT Agent
//!
//! Natural-language financial Q&A built around an intent router and a
//! tool-calling execution loop:
//! - Classifies each query into a closed intent taxonomy
//! - Routes the intent to a responder path (fixed reply, direct model
//!   answer, or agent loop with a named capability set)
//! - Drives ask-model → invoke-tools → feed-results rounds until a final
//!   answer or the round bound
//! - Reconciles partial tool failures into a still-useful answer
//!
//! FLOW: QUERY → CLASSIFY → ROUTE → (LOOP: MODEL ⇄ TOOLS) → ANSWER

pub mod agent;
pub mod api;
pub mod classifier;
pub mod context;
pub mod error;
pub mod gateway;
pub mod handler;
pub mod llm;
pub mod models;
pub mod router;
pub mod state;
pub mod tools;

pub use error::Result;

// Re-export common types
pub use handler::{AgentConfig, QueryHandler};
pub use models::{Intent, Observation, QueryOutcome, ToolCall, Turn};
