//! Language-model service boundary
//!
//! The core is written against the `ChatModel` trait so the underlying
//! provider is swappable. `GeminiClient` is the production implementation;
//! `ScriptedModel` keeps the system functional without an LLM dependency.

use crate::models::{ChatMessage, ToolCall};
use crate::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Mutex;

pub mod gemini;
pub use gemini::GeminiClient;

/// Tool description handed to the model for tool selection.
#[derive(Debug, Clone)]
pub struct ToolDecl {
    pub name: String,
    pub description: String,
    /// JSON schema for the tool's arguments.
    pub parameters: Value,
}

/// One model turn: either a final natural-language answer or a batch of
/// requested tool invocations.
#[derive(Debug, Clone)]
pub enum ModelReply {
    Final(String),
    ToolCalls(Vec<ToolCall>),
}

/// Abstract completion contract: one transcript in, one reply out.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(&self, messages: &[ChatMessage], tools: &[ToolDecl]) -> Result<ModelReply>;
}

/// Scripted model for development & testing.
/// Pops pre-canned replies in order; errors once the script is exhausted.
pub struct ScriptedModel {
    replies: Mutex<Vec<ModelReply>>,
}

impl ScriptedModel {
    pub fn new(mut replies: Vec<ModelReply>) -> Self {
        // Stored reversed so `pop` yields replies in submission order.
        replies.reverse();
        Self {
            replies: Mutex::new(replies),
        }
    }

    /// A model that answers every call with the same final text.
    pub fn always(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            replies: Mutex::new(vec![ModelReply::Final(text)]),
        }
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    async fn complete(&self, _messages: &[ChatMessage], _tools: &[ToolDecl]) -> Result<ModelReply> {
        let mut replies = self.replies.lock().expect("script lock poisoned");
        match replies.len() {
            0 => Err(crate::error::AgentError::ModelUnavailable(
                "scripted model exhausted".to_string(),
            )),
            // Keep repeating the last reply so `always` behaves as named.
            1 => Ok(replies[0].clone()),
            _ => Ok(replies.pop().expect("non-empty script")),
        }
    }
}

/// Model whose every call fails. Simulates a provider outage in tests.
pub struct UnavailableModel;

#[async_trait]
impl ChatModel for UnavailableModel {
    async fn complete(&self, _messages: &[ChatMessage], _tools: &[ToolDecl]) -> Result<ModelReply> {
        Err(crate::error::AgentError::ModelUnavailable(
            "simulated outage".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_model_replays_in_order() {
        let model = ScriptedModel::new(vec![
            ModelReply::ToolCalls(vec![ToolCall {
                name: "stock_news".to_string(),
                arguments: serde_json::json!({"ticker": "ACME"}),
            }]),
            ModelReply::Final("done".to_string()),
        ]);

        match model.complete(&[], &[]).await.unwrap() {
            ModelReply::ToolCalls(calls) => assert_eq!(calls[0].name, "stock_news"),
            other => panic!("expected tool calls, got {:?}", other),
        }
        match model.complete(&[], &[]).await.unwrap() {
            ModelReply::Final(text) => assert_eq!(text, "done"),
            other => panic!("expected final, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn always_model_never_exhausts() {
        let model = ScriptedModel::always("hi");
        for _ in 0..3 {
            assert!(matches!(
                model.complete(&[], &[]).await.unwrap(),
                ModelReply::Final(_)
            ));
        }
    }
}
