//! Agent Execution Loop
//!
//! The iterative state machine behind the tool-bearing responder paths:
//! ask the model, invoke whatever tools it requested, feed the observations
//! back, repeat. Bounded by a maximum round count; every failure below this
//! boundary terminates in a degraded answer, never an error to the caller.
//!
//! Rounds are explicit: `start` seeds the transcript, `step` runs exactly
//! one model-call/tool-invocation cycle, and `run` drives `step` until a
//! terminal outcome. Tests drive the loop round-by-round with a scripted
//! model.

use crate::gateway::ToolGateway;
use crate::llm::{ChatModel, ModelReply};
use crate::models::{ChatMessage, Observation};
use crate::router::{DEGRADED_LOOP_REPLY, TRANSIENT_ERROR_REPLY};
use crate::tools::CapabilitySet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

pub const DEFAULT_MAX_ROUNDS: u32 = 6;

pub const CANCELLED_REPLY: &str = "This request was cancelled before it could be completed.";

/// Cooperative cancellation signal, checked between rounds. Tool calls
/// already dispatched run to completion or timeout; their observations are
/// simply discarded.
#[derive(Clone, Default)]
pub struct CancelSignal(Arc<AtomicBool>);

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Terminal result of one routed query's loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopOutcome {
    /// The model produced a final natural-language answer.
    Answered(String),
    /// The loop could not converge; a user-visible fallback text.
    Degraded(String),
}

impl LoopOutcome {
    pub fn answer(&self) -> &str {
        match self {
            LoopOutcome::Answered(text) | LoopOutcome::Degraded(text) => text,
        }
    }
}

/// Per-query loop state. Created when a query is routed, owned exclusively
/// by that query, discarded after the final answer — never persisted.
pub struct LoopState {
    transcript: Vec<ChatMessage>,
    round: u32,
    outcome: Option<LoopOutcome>,
}

impl LoopState {
    pub fn transcript(&self) -> &[ChatMessage] {
        &self.transcript
    }

    /// Completed model rounds.
    pub fn round(&self) -> u32 {
        self.round
    }

    pub fn outcome(&self) -> Option<&LoopOutcome> {
        self.outcome.as_ref()
    }

    pub fn is_terminal(&self) -> bool {
        self.outcome.is_some()
    }

    /// Tool-invocation rounds recorded so far.
    pub fn tool_rounds(&self) -> usize {
        self.transcript
            .iter()
            .filter(|m| matches!(m, ChatMessage::ToolResult { .. }))
            .count()
    }
}

pub struct AgentLoop {
    model: Arc<dyn ChatModel>,
    gateway: Arc<ToolGateway>,
    max_rounds: u32,
}

impl AgentLoop {
    pub fn new(model: Arc<dyn ChatModel>, gateway: Arc<ToolGateway>, max_rounds: u32) -> Self {
        Self {
            model,
            gateway,
            max_rounds,
        }
    }

    /// Seed the transcript: system instruction, prior conversation window,
    /// the new user query.
    pub fn start(
        &self,
        system_prompt: &str,
        history: &[ChatMessage],
        query: &str,
    ) -> LoopState {
        let mut transcript = Vec::with_capacity(history.len() + 2);
        transcript.push(ChatMessage::system(system_prompt));
        transcript.extend_from_slice(history);
        transcript.push(ChatMessage::user(query));

        LoopState {
            transcript,
            round: 0,
            outcome: None,
        }
    }

    /// Run one round: a model call plus, if the model asked for tools, one
    /// concurrent tool-invocation batch. Sets the terminal outcome when the
    /// model answers or becomes unavailable.
    pub async fn step(&self, state: &mut LoopState, active_set: &Arc<CapabilitySet>) {
        if state.is_terminal() {
            return;
        }

        state.round += 1;
        debug!(
            round = state.round,
            capability_set = %active_set.name(),
            "Loop round: awaiting model"
        );

        let reply = match self
            .model
            .complete(&state.transcript, &active_set.declarations())
            .await
        {
            Ok(reply) => reply,
            Err(e) => {
                warn!(round = state.round, error = %e, "Model call failed mid-loop");
                state.outcome = Some(LoopOutcome::Degraded(TRANSIENT_ERROR_REPLY.to_string()));
                return;
            }
        };

        match reply {
            ModelReply::Final(text) => {
                info!(rounds = state.round, "Loop finished with a final answer");
                state.outcome = Some(LoopOutcome::Answered(text));
            }
            ModelReply::ToolCalls(calls) => {
                debug!(
                    round = state.round,
                    requested = calls.len(),
                    "Model requested tool calls"
                );

                let observations = self.dispatch_round(&calls, active_set).await;
                state.transcript.push(ChatMessage::ToolRequest { calls });
                state.transcript.push(ChatMessage::ToolResult { observations });
            }
        }
    }

    /// Dispatch every requested call concurrently and wait for all of them.
    /// One tool's failure never cancels its siblings; observations come back
    /// in request order.
    async fn dispatch_round(
        &self,
        calls: &[crate::models::ToolCall],
        active_set: &Arc<CapabilitySet>,
    ) -> Vec<Observation> {
        let mut tasks = JoinSet::new();

        for (index, call) in calls.iter().cloned().enumerate() {
            let gateway = self.gateway.clone();
            let set = active_set.clone();
            tasks.spawn(async move { (index, gateway.invoke(&call, &set).await) });
        }

        let mut indexed = Vec::with_capacity(calls.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(pair) => indexed.push(pair),
                Err(e) => warn!("Tool invocation task panicked: {}", e),
            }
        }

        // A panicked task loses its index; backfill a failure observation
        // so the round always carries one observation per requested call.
        if indexed.len() < calls.len() {
            let seen: std::collections::HashSet<usize> =
                indexed.iter().map(|(index, _)| *index).collect();
            for (index, call) in calls.iter().enumerate() {
                if !seen.contains(&index) {
                    indexed.push((
                        index,
                        Observation::failure(
                            call.name.clone(),
                            "tool invocation aborted unexpectedly",
                            0,
                        ),
                    ));
                }
            }
        }

        indexed.sort_by_key(|(index, _)| *index);
        indexed.into_iter().map(|(_, obs)| obs).collect()
    }

    /// Drive the loop to termination. Checks the cancellation signal and
    /// the round bound between rounds.
    pub async fn run(
        &self,
        active_set: Arc<CapabilitySet>,
        system_prompt: &str,
        history: &[ChatMessage],
        query: &str,
        cancel: &CancelSignal,
    ) -> LoopOutcome {
        let mut state = self.start(system_prompt, history, query);

        loop {
            if let Some(outcome) = state.outcome.take() {
                return outcome;
            }

            if cancel.is_cancelled() {
                info!(rounds = state.round, "Loop cancelled by caller");
                return LoopOutcome::Degraded(CANCELLED_REPLY.to_string());
            }

            if state.round >= self.max_rounds {
                warn!(
                    rounds = state.round,
                    max_rounds = self.max_rounds,
                    "Loop bound exceeded, degrading"
                );
                return LoopOutcome::Degraded(DEGRADED_LOOP_REPLY.to_string());
            }

            self.step(&mut state, &active_set).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AgentError;
    use crate::llm::{ScriptedModel, UnavailableModel};
    use crate::models::ToolCall;
    use crate::tools::Tool;
    use crate::Result;
    use serde_json::{json, Value};
    use std::sync::atomic::AtomicU32;

    struct NewsStub {
        invocations: Arc<AtomicU32>,
    }

    #[async_trait::async_trait]
    impl Tool for NewsStub {
        fn name(&self) -> &'static str {
            "stock_news"
        }
        fn description(&self) -> &'static str {
            "Latest news for a ticker"
        }
        fn parameters(&self) -> Value {
            json!({
                "type": "object",
                "properties": { "ticker": { "type": "string" } },
                "required": ["ticker"]
            })
        }
        async fn execute(&self, args: &Value) -> Result<Value> {
            self.invocations.fetch_add(1, Ordering::SeqCst);
            Ok(json!({
                "ticker": args["ticker"],
                "articles": [
                    { "title": "ACME beats expectations" },
                    { "title": "ACME announces widget recall" }
                ]
            }))
        }
    }

    struct FailingPortfolioStub;

    #[async_trait::async_trait]
    impl Tool for FailingPortfolioStub {
        fn name(&self) -> &'static str {
            "get_user_portfolio"
        }
        fn description(&self) -> &'static str {
            "Always times out upstream"
        }
        fn parameters(&self) -> Value {
            json!({ "type": "object", "properties": {} })
        }
        async fn execute(&self, _args: &Value) -> Result<Value> {
            Err(AgentError::ToolExecution(
                "portfolio provider timed out".to_string(),
            ))
        }
    }

    fn news_call() -> ToolCall {
        ToolCall {
            name: "stock_news".to_string(),
            arguments: json!({ "ticker": "ACME" }),
        }
    }

    fn test_set(invocations: Arc<AtomicU32>) -> Arc<CapabilitySet> {
        let mut set = CapabilitySet::new("market");
        set.register(Arc::new(NewsStub { invocations })).unwrap();
        Arc::new(set)
    }

    fn agent(model: Arc<dyn ChatModel>, max_rounds: u32) -> AgentLoop {
        AgentLoop::new(model, Arc::new(ToolGateway::default()), max_rounds)
    }

    #[tokio::test]
    async fn one_tool_round_then_final_answer() {
        let invocations = Arc::new(AtomicU32::new(0));
        let set = test_set(invocations.clone());

        let model = Arc::new(ScriptedModel::new(vec![
            ModelReply::ToolCalls(vec![news_call()]),
            ModelReply::Final("ACME had two notable headlines today.".to_string()),
        ]));

        let agent = agent(model, DEFAULT_MAX_ROUNDS);
        let outcome = agent
            .run(
                set,
                "You are FinGPT.",
                &[],
                "What's the latest news on ACME?",
                &CancelSignal::new(),
            )
            .await;

        match outcome {
            LoopOutcome::Answered(text) => assert!(!text.is_empty()),
            other => panic!("expected answer, got {:?}", other),
        }
        assert_eq!(invocations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn round_bound_degrades_after_exactly_max_rounds() {
        let invocations = Arc::new(AtomicU32::new(0));
        let set = test_set(invocations.clone());

        // One scripted reply repeats forever: always ask for a tool.
        let model = Arc::new(ScriptedModel::new(vec![ModelReply::ToolCalls(vec![
            news_call(),
        ])]));

        let agent = agent(model, 4);
        let outcome = agent
            .run(set, "sys", &[], "never converges", &CancelSignal::new())
            .await;

        assert_eq!(
            outcome,
            LoopOutcome::Degraded(DEGRADED_LOOP_REPLY.to_string())
        );
        // One tool invocation per round, never more than the bound.
        assert_eq!(invocations.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn sibling_failure_does_not_abort_the_round() {
        let invocations = Arc::new(AtomicU32::new(0));
        let mut set = CapabilitySet::new("personalized");
        set.register(Arc::new(FailingPortfolioStub)).unwrap();
        set.register(Arc::new(NewsStub {
            invocations: invocations.clone(),
        }))
        .unwrap();
        let set = Arc::new(set);

        let model = Arc::new(ScriptedModel::new(vec![
            ModelReply::ToolCalls(vec![
                ToolCall {
                    name: "get_user_portfolio".to_string(),
                    arguments: json!({}),
                },
                news_call(),
            ]),
            ModelReply::Final("Portfolio data is unavailable, but here is the news.".to_string()),
        ]));

        let agent = agent(model, DEFAULT_MAX_ROUNDS);
        let mut state = agent.start("sys", &[], "how is my portfolio doing?");

        agent.step(&mut state, &set).await;
        assert!(!state.is_terminal());
        assert_eq!(state.tool_rounds(), 1);

        // Both observations are in the transcript, in request order.
        let Some(ChatMessage::ToolResult { observations }) = state.transcript().last() else {
            panic!("expected an observation turn");
        };
        assert_eq!(observations.len(), 2);
        assert!(!observations[0].success);
        assert!(observations[0]
            .error
            .as_deref()
            .unwrap()
            .contains("portfolio provider timed out"));
        assert!(observations[1].success);

        agent.step(&mut state, &set).await;
        assert!(matches!(state.outcome(), Some(LoopOutcome::Answered(_))));
        assert_eq!(state.tool_rounds(), 1);
    }

    struct AbortingTool;

    #[async_trait::async_trait]
    impl Tool for AbortingTool {
        fn name(&self) -> &'static str {
            "get_current_price"
        }
        fn description(&self) -> &'static str {
            "Aborts its task"
        }
        fn parameters(&self) -> Value {
            json!({ "type": "object", "properties": {} })
        }
        async fn execute(&self, _args: &Value) -> Result<Value> {
            panic!("provider client bug");
        }
    }

    #[tokio::test]
    async fn aborted_tool_task_still_yields_an_observation() {
        let invocations = Arc::new(AtomicU32::new(0));
        let mut set = CapabilitySet::new("market");
        set.register(Arc::new(AbortingTool)).unwrap();
        set.register(Arc::new(NewsStub {
            invocations: invocations.clone(),
        }))
        .unwrap();
        let set = Arc::new(set);

        let model = Arc::new(ScriptedModel::new(vec![ModelReply::ToolCalls(vec![
            ToolCall {
                name: "get_current_price".to_string(),
                arguments: json!({}),
            },
            news_call(),
        ])]));

        let agent = agent(model, DEFAULT_MAX_ROUNDS);
        let mut state = agent.start("sys", &[], "price and news for ACME");
        agent.step(&mut state, &set).await;

        // One observation per requested call, even for the aborted task.
        let Some(ChatMessage::ToolResult { observations }) = state.transcript().last() else {
            panic!("expected an observation turn");
        };
        assert_eq!(observations.len(), 2);
        assert_eq!(observations[0].tool_name, "get_current_price");
        assert!(!observations[0].success);
        assert!(observations[1].success);
        assert_eq!(state.tool_rounds(), 1);
    }

    #[tokio::test]
    async fn model_outage_mid_loop_degrades() {
        let set = test_set(Arc::new(AtomicU32::new(0)));
        let agent = agent(Arc::new(UnavailableModel), DEFAULT_MAX_ROUNDS);

        let outcome = agent
            .run(set, "sys", &[], "anything", &CancelSignal::new())
            .await;

        assert_eq!(
            outcome,
            LoopOutcome::Degraded(TRANSIENT_ERROR_REPLY.to_string())
        );
    }

    #[tokio::test]
    async fn cancellation_is_checked_between_rounds() {
        let invocations = Arc::new(AtomicU32::new(0));
        let set = test_set(invocations.clone());

        let model = Arc::new(ScriptedModel::new(vec![ModelReply::ToolCalls(vec![
            news_call(),
        ])]));

        let cancel = CancelSignal::new();
        cancel.cancel();

        let agent = agent(model, DEFAULT_MAX_ROUNDS);
        let outcome = agent.run(set, "sys", &[], "anything", &cancel).await;

        assert_eq!(outcome, LoopOutcome::Degraded(CANCELLED_REPLY.to_string()));
        assert_eq!(invocations.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn transcript_seeds_system_history_and_query() {
        let agent = agent(Arc::new(ScriptedModel::always("ok")), DEFAULT_MAX_ROUNDS);
        let history = vec![ChatMessage::user("earlier question")];
        let state = agent.start("system text", &history, "new question");

        assert_eq!(state.transcript().len(), 3);
        assert!(matches!(state.transcript()[0], ChatMessage::System { .. }));
        assert!(
            matches!(&state.transcript()[2], ChatMessage::User { text } if text == "new question")
        );
        assert_eq!(state.round(), 0);
    }
}
