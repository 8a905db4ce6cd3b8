//! Intent Classifier
//!
//! One model call maps (history, query) onto the closed intent taxonomy.
//! The model's free-text label is resolved deterministically by
//! priority-ordered substring matching; a model outage surfaces as
//! `ClassificationUnavailable`, never as a guessed intent.

use crate::error::AgentError;
use crate::llm::{ChatModel, ModelReply};
use crate::models::{ChatMessage, Intent};
use crate::Result;
use std::sync::Arc;
use tracing::{debug, warn};

const CLASSIFIER_SYSTEM_PROMPT: &str = "Your name is FinGPT. If you are asked about your identity or you are greeted, \
you will say that you are 'FinGPT', made by Team FinGPT. You are a highly accurate AI assistant that classifies user \
queries based on intent and remembers chat history as well. Your primary task is to determine whether the query is a \
'greeting', is seeking 'personalized advice', 'market data', or 'general information'. If the query is unrelated to \
these categories, label it 'off-topic'. Respond with the category label only. Do not reveal internal processes or \
chain logic.";

/// Matched in priority order so an answer containing several labels
/// resolves deterministically. Greeting/identity phrases first.
const GREETING_MARKERS: &[&str] = &["greeting", "who are you", "identity"];
const PERSONALIZED_MARKERS: &[&str] = &["personalized"];
const MARKET_MARKERS: &[&str] = &["real time", "real-time", "market"];
const GENERAL_MARKERS: &[&str] = &["general"];

pub struct IntentClassifier {
    model: Arc<dyn ChatModel>,
}

impl IntentClassifier {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self { model }
    }

    /// Classify a query in its conversation context.
    ///
    /// `history` is the already-adapted message window; `query` must be
    /// non-empty after trimming (the handler enforces this).
    pub async fn classify(&self, history: &[ChatMessage], query: &str) -> Result<Intent> {
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(ChatMessage::system(CLASSIFIER_SYSTEM_PROMPT));
        messages.extend_from_slice(history);
        messages.push(ChatMessage::user(format!(
            "Classify the intent of this query into one of the following categories: \
'greeting', 'personalized advice', 'market data', 'general information', or 'off-topic'.\nQuery: {}",
            query
        )));

        let reply = self.model.complete(&messages, &[]).await.map_err(|e| {
            warn!("Intent classification call failed: {}", e);
            AgentError::ClassificationUnavailable(e.to_string())
        })?;

        let raw = match reply {
            ModelReply::Final(text) => text,
            // No tools were offered; a tool request here is a malformed reply.
            ModelReply::ToolCalls(_) => {
                return Err(AgentError::ClassificationUnavailable(
                    "classifier returned tool calls instead of a label".to_string(),
                ))
            }
        };

        let intent = parse_intent(&raw);
        debug!(raw_label = %raw.trim(), intent = %intent, "Query classified");
        Ok(intent)
    }
}

/// Map the model's free-text label onto the closed taxonomy.
/// Case-insensitive, fixed priority order; anything unmatched is
/// `Unclassified`.
pub fn parse_intent(raw: &str) -> Intent {
    let lowered = raw.to_lowercase();
    let contains_any = |markers: &[&str]| markers.iter().any(|m| lowered.contains(m));

    if contains_any(GREETING_MARKERS) {
        Intent::Greeting
    } else if contains_any(PERSONALIZED_MARKERS) {
        Intent::Personalized
    } else if contains_any(MARKET_MARKERS) {
        Intent::MarketData
    } else if contains_any(GENERAL_MARKERS) {
        Intent::General
    } else {
        Intent::Unclassified
    }
}
