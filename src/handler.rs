//! Inbound query handler
//!
//! The boundary contract: `handle_query(user_id, query, history)` →
//! `{ intent, answer }`. The caller owns authentication, loading the
//! history snapshot, and persisting the returned answer; this module only
//! classifies, routes, and drives the selected responder path.

use crate::agent::{AgentLoop, CancelSignal, LoopOutcome, DEFAULT_MAX_ROUNDS};
use crate::classifier::IntentClassifier;
use crate::context::{adapt_history, DEFAULT_HISTORY_WINDOW};
use crate::gateway::{ToolGateway, DEFAULT_TOOL_TIMEOUT};
use crate::llm::{ChatModel, ModelReply};
use crate::models::{ChatMessage, Intent, QueryOutcome, Turn};
use crate::router::{route, route_unavailable, ResponderPlan, OUT_OF_SCOPE_REPLY, TRANSIENT_ERROR_REPLY};
use crate::tools::CapabilityRegistry;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

const GENERAL_SYSTEM_PROMPT: &str = "Your name is FinGPT. If you are asked about your identity or you are greeted, \
you will say that you are 'FinGPT', made by Team FinGPT. You are a helpful and friendly AI assistant. Your primary \
and only task is to provide general or educational financial information. If a query is off-topic, you politely \
refuse without sharing any internal chain logic. If you don't know something just say it in a polite way. Don't \
provide wrong information or hallucinate.";

const MARKET_SYSTEM_PROMPT: &str = "Your name is FinGPT. If you are asked about your identity or you are greeted, \
you will say that you are 'FinGPT', made by Team FinGPT. You are a helpful and friendly AI assistant. Your primary \
and only task is to answer real-time market questions using the available tools. If a query is off-topic, you \
politely refuse without sharing any internal chain logic or tool-call details.";

const PERSONALIZED_SYSTEM_PROMPT: &str = "Your name is FinGPT. If you are asked about your identity or you are \
greeted, you will say that you are 'FinGPT', made by Team FinGPT. You are a versatile and intelligent AI assistant, \
designed to help the user in a personalized and friendly manner. You excel at answering portfolio questions, \
performing calculations, and analyzing stock performance using the available tools. You always prioritize what \
benefits the user. If a request is beyond your scope, you politely decline without revealing internal logic or \
processes. Don't hallucinate. If you don't know or can't do something, just tell it.";

/// Immutable per-process configuration for the responder paths.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub max_rounds: u32,
    pub tool_timeout: Duration,
    pub history_window: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_rounds: DEFAULT_MAX_ROUNDS,
            tool_timeout: DEFAULT_TOOL_TIMEOUT,
            history_window: DEFAULT_HISTORY_WINDOW,
        }
    }
}

/// Routes one query at a time; each query gets its own loop state, so
/// concurrent in-flight queries share nothing mutable.
pub struct QueryHandler {
    model: Arc<dyn ChatModel>,
    classifier: IntentClassifier,
    registry: Arc<CapabilityRegistry>,
    agent: AgentLoop,
    config: AgentConfig,
}

impl QueryHandler {
    pub fn new(
        model: Arc<dyn ChatModel>,
        registry: Arc<CapabilityRegistry>,
        config: AgentConfig,
    ) -> Self {
        let classifier = IntentClassifier::new(model.clone());
        let gateway = Arc::new(ToolGateway::new(config.tool_timeout));
        let agent = AgentLoop::new(model.clone(), gateway, config.max_rounds);

        Self {
            model,
            classifier,
            registry,
            agent,
            config,
        }
    }

    pub async fn handle_query(
        &self,
        user_id: Uuid,
        query: &str,
        history: &[Turn],
    ) -> QueryOutcome {
        self.handle_query_with(user_id, query, history, &CancelSignal::new())
            .await
    }

    pub async fn handle_query_with(
        &self,
        user_id: Uuid,
        query: &str,
        history: &[Turn],
        cancel: &CancelSignal,
    ) -> QueryOutcome {
        let query = query.trim();
        if query.is_empty() {
            return QueryOutcome {
                intent: Intent::Unclassified,
                answer: OUT_OF_SCOPE_REPLY.to_string(),
            };
        }

        let messages = adapt_history(history, self.config.history_window);

        let (intent, plan) = match self.classifier.classify(&messages, query).await {
            Ok(intent) => (intent, route(intent)),
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "Classification unavailable");
                (Intent::Unclassified, route_unavailable())
            }
        };

        info!(user_id = %user_id, intent = %intent, "Query routed");

        let answer = match plan {
            ResponderPlan::FixedReply(text) => text,
            ResponderPlan::DirectModel => self.direct_answer(&messages, query).await,
            ResponderPlan::Loop(set_name) => {
                self.loop_answer(set_name, user_id, &messages, query, cancel)
                    .await
            }
        };

        QueryOutcome { intent, answer }
    }

    /// Single model call, no tools.
    async fn direct_answer(&self, history: &[ChatMessage], query: &str) -> String {
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(ChatMessage::system(GENERAL_SYSTEM_PROMPT));
        messages.extend_from_slice(history);
        messages.push(ChatMessage::user(query));

        match self.model.complete(&messages, &[]).await {
            Ok(ModelReply::Final(text)) => text,
            Ok(ModelReply::ToolCalls(_)) => {
                warn!("Direct-answer path received tool calls with no tools offered");
                TRANSIENT_ERROR_REPLY.to_string()
            }
            Err(e) => {
                warn!(error = %e, "Direct model answer failed");
                TRANSIENT_ERROR_REPLY.to_string()
            }
        }
    }

    async fn loop_answer(
        &self,
        set_name: &str,
        user_id: Uuid,
        history: &[ChatMessage],
        query: &str,
        cancel: &CancelSignal,
    ) -> String {
        let Some(active_set) = self.registry.get(set_name) else {
            // A routed set missing from the registry is a wiring bug;
            // answer degraded rather than crash the query.
            warn!(capability_set = %set_name, "Routed capability set not registered");
            return TRANSIENT_ERROR_REPLY.to_string();
        };

        let system_prompt = match set_name {
            crate::tools::PERSONALIZED_SET => format!(
                "{}\nThe current user's id is {}. Pass it as user_id when a tool requires it.",
                PERSONALIZED_SYSTEM_PROMPT, user_id
            ),
            _ => MARKET_SYSTEM_PROMPT.to_string(),
        };

        let outcome = self
            .agent
            .run(active_set, &system_prompt, history, query, cancel)
            .await;

        match outcome {
            LoopOutcome::Answered(text) => text,
            LoopOutcome::Degraded(text) => text,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ModelReply, ScriptedModel, UnavailableModel};
    use crate::models::{Observation, ToolCall};
    use crate::router::IDENTITY_REPLY;
    use crate::state::InMemoryPortfolioStore;
    use crate::tools::{create_default_registry, CapabilityRegistry, CapabilitySet, Tool};
    use crate::Result;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingTool {
        invocations: Arc<AtomicU32>,
    }

    #[async_trait::async_trait]
    impl Tool for CountingTool {
        fn name(&self) -> &'static str {
            "stock_news"
        }
        fn description(&self) -> &'static str {
            "Counts invocations"
        }
        fn parameters(&self) -> Value {
            json!({ "type": "object", "properties": {} })
        }
        async fn execute(&self, _args: &Value) -> Result<Value> {
            self.invocations.fetch_add(1, Ordering::SeqCst);
            Ok(json!({ "articles": [] }))
        }
    }

    fn counting_registry(invocations: Arc<AtomicU32>) -> Arc<CapabilityRegistry> {
        let mut registry = CapabilityRegistry::new();
        let mut market = CapabilitySet::new(crate::tools::MARKET_SET);
        market
            .register(Arc::new(CountingTool {
                invocations: invocations.clone(),
            }))
            .unwrap();
        registry.insert(market).unwrap();

        let mut personalized = CapabilitySet::new(crate::tools::PERSONALIZED_SET);
        personalized
            .register(Arc::new(CountingTool { invocations }))
            .unwrap();
        registry.insert(personalized).unwrap();

        Arc::new(registry)
    }

    fn default_registry() -> Arc<CapabilityRegistry> {
        Arc::new(create_default_registry(None, Arc::new(InMemoryPortfolioStore::new())).unwrap())
    }

    #[tokio::test]
    async fn greeting_short_circuits_with_zero_tool_calls() {
        let invocations = Arc::new(AtomicU32::new(0));
        let model = Arc::new(ScriptedModel::always("greeting"));
        let handler = QueryHandler::new(
            model,
            counting_registry(invocations.clone()),
            AgentConfig::default(),
        );

        let outcome = handler
            .handle_query(Uuid::new_v4(), "Hi, who are you?", &[])
            .await;

        assert_eq!(outcome.intent, Intent::Greeting);
        assert_eq!(outcome.answer, IDENTITY_REPLY);
        assert_eq!(invocations.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn greeting_wins_regardless_of_history() {
        let model = Arc::new(ScriptedModel::always("greeting"));
        let handler = QueryHandler::new(model, default_registry(), AgentConfig::default());

        let history = vec![
            Turn::user("What is ACME's market cap?"),
            Turn::assistant("ACME's market cap is around $3B."),
        ];
        let outcome = handler
            .handle_query(Uuid::new_v4(), "hello again", &history)
            .await;

        assert_eq!(outcome.answer, IDENTITY_REPLY);
    }

    #[tokio::test]
    async fn classification_outage_answers_transient_and_never_invokes_tools() {
        let invocations = Arc::new(AtomicU32::new(0));
        let handler = QueryHandler::new(
            Arc::new(UnavailableModel),
            counting_registry(invocations.clone()),
            AgentConfig::default(),
        );

        let outcome = handler
            .handle_query(Uuid::new_v4(), "What's the latest on ACME?", &[])
            .await;

        assert_eq!(outcome.intent, Intent::Unclassified);
        assert_eq!(outcome.answer, TRANSIENT_ERROR_REPLY);
        assert_eq!(invocations.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn empty_query_is_out_of_scope_without_model_calls() {
        let handler = QueryHandler::new(
            Arc::new(UnavailableModel),
            default_registry(),
            AgentConfig::default(),
        );

        let outcome = handler.handle_query(Uuid::new_v4(), "   ", &[]).await;
        assert_eq!(outcome.intent, Intent::Unclassified);
        assert_eq!(outcome.answer, OUT_OF_SCOPE_REPLY);
    }

    #[tokio::test]
    async fn market_query_runs_one_tool_round_to_an_answer() {
        let invocations = Arc::new(AtomicU32::new(0));
        let model = Arc::new(ScriptedModel::new(vec![
            // Classification call, then the loop's two rounds.
            ModelReply::Final("market data".to_string()),
            ModelReply::ToolCalls(vec![ToolCall {
                name: "stock_news".to_string(),
                arguments: json!({}),
            }]),
            ModelReply::Final("ACME was quiet today.".to_string()),
        ]));

        let handler = QueryHandler::new(
            model,
            counting_registry(invocations.clone()),
            AgentConfig::default(),
        );

        let outcome = handler
            .handle_query(Uuid::new_v4(), "What's the latest news on ACME?", &[])
            .await;

        assert_eq!(outcome.intent, Intent::MarketData);
        assert_eq!(outcome.answer, "ACME was quiet today.");
        assert_eq!(invocations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn personalized_query_with_failing_portfolio_still_answers() {
        // Real default registry, no portfolio seeded: the lookup fails with
        // a descriptive message and the model still closes with an answer.
        let model = Arc::new(ScriptedModel::new(vec![
            ModelReply::Final("personalized advice".to_string()),
            ModelReply::ToolCalls(vec![ToolCall {
                name: "get_user_portfolio".to_string(),
                arguments: json!({ "user_id": Uuid::new_v4().to_string() }),
            }]),
            ModelReply::Final(
                "I couldn't access your portfolio right now, so here is general guidance."
                    .to_string(),
            ),
        ]));

        let handler = QueryHandler::new(model, default_registry(), AgentConfig::default());

        let outcome = handler
            .handle_query(Uuid::new_v4(), "How are my holdings doing?", &[])
            .await;

        assert_eq!(outcome.intent, Intent::Personalized);
        assert!(!outcome.answer.is_empty());
        // The internal error text never leaks verbatim as the whole answer.
        assert_ne!(outcome.answer, "No portfolio found for user");
    }

    #[tokio::test]
    async fn general_query_is_answered_without_tools() {
        let invocations = Arc::new(AtomicU32::new(0));
        let model = Arc::new(ScriptedModel::new(vec![
            ModelReply::Final("general information".to_string()),
            ModelReply::Final("A P/E ratio compares price to earnings.".to_string()),
        ]));

        let handler = QueryHandler::new(
            model,
            counting_registry(invocations.clone()),
            AgentConfig::default(),
        );

        let outcome = handler
            .handle_query(Uuid::new_v4(), "What is a P/E ratio?", &[])
            .await;

        assert_eq!(outcome.intent, Intent::General);
        assert!(outcome.answer.contains("P/E"));
        assert_eq!(invocations.load(Ordering::SeqCst), 0);
    }

    fn _assert_traits() {
        fn send_sync<T: Send + Sync>() {}
        send_sync::<QueryHandler>();
        send_sync::<Observation>();
    }
}
