//! Router
//!
//! Maps a classified intent to a responder path. Greeting and off-topic
//! queries short-circuit to fixed replies; a failed classification maps to
//! a transient-error reply and must never fall through to a tool-bearing
//! path.

use crate::models::Intent;
use crate::tools::{MARKET_SET, PERSONALIZED_SET};

pub const IDENTITY_REPLY: &str = "Hello, my name is FinGPT, made by Team FinGPT.";

pub const OUT_OF_SCOPE_REPLY: &str = "I'm sorry, I can only answer queries about general market \
and finance info, personalized stock data, greetings, or real-time market data.";

pub const TRANSIENT_ERROR_REPLY: &str = "I'm having trouble processing requests right now. \
Please try again in a moment.";

pub const DEGRADED_LOOP_REPLY: &str = "I was unable to complete this request within the \
allotted steps. Please try rephrasing your question.";

/// One responder path for a classified query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponderPlan {
    /// Answer with a canned string, no model or tool calls.
    FixedReply(String),
    /// Single model call, no tools.
    DirectModel,
    /// Run the agent loop with the named capability set.
    Loop(&'static str),
}

pub fn route(intent: Intent) -> ResponderPlan {
    match intent {
        Intent::Greeting => ResponderPlan::FixedReply(IDENTITY_REPLY.to_string()),
        Intent::General => ResponderPlan::DirectModel,
        Intent::MarketData => ResponderPlan::Loop(MARKET_SET),
        Intent::Personalized => ResponderPlan::Loop(PERSONALIZED_SET),
        Intent::Unclassified => ResponderPlan::FixedReply(OUT_OF_SCOPE_REPLY.to_string()),
    }
}

/// Routing for a failed classification: a fixed transient reply.
pub fn route_unavailable() -> ResponderPlan {
    ResponderPlan::FixedReply(TRANSIENT_ERROR_REPLY.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn greeting_routes_to_identity_reply() {
        assert_eq!(
            route(Intent::Greeting),
            ResponderPlan::FixedReply(IDENTITY_REPLY.to_string())
        );
    }

    #[test]
    fn tool_intents_route_to_their_capability_sets() {
        assert_eq!(route(Intent::MarketData), ResponderPlan::Loop(MARKET_SET));
        assert_eq!(
            route(Intent::Personalized),
            ResponderPlan::Loop(PERSONALIZED_SET)
        );
    }

    #[test]
    fn general_routes_to_direct_model() {
        assert_eq!(route(Intent::General), ResponderPlan::DirectModel);
    }

    #[test]
    fn unclassified_routes_to_out_of_scope() {
        assert_eq!(
            route(Intent::Unclassified),
            ResponderPlan::FixedReply(OUT_OF_SCOPE_REPLY.to_string())
        );
    }

    #[test]
    fn classification_outage_never_reaches_a_tool_path() {
        match route_unavailable() {
            ResponderPlan::FixedReply(text) => assert_eq!(text, TRANSIENT_ERROR_REPLY),
            other => panic!("expected fixed reply, got {:?}", other),
        }
    }
}
