//! Orchestration Loop
//!
//! Drives one conversational turn through bounded rounds:
//!
//! 1. Call the model with the turn context (under a timeout)
//! 2. Parse tool invocations out of the reply
//! 3. Filter them through the execution policy, run the admitted ones
//!    concurrently and fold the results back into the context
//! 4. Without anything to run, ask the completion heuristic whether the
//!    reply ends the turn, else try to recover a dropped call
//! 5. When the round budget runs out, ask once for a closing summary
//!
//! Cancellation is checked at every suspension point. Only fully completed
//! rounds are committed to the context, and the conversation's persistent
//! history is only touched when the turn ends normally. Tool execution
//! times outlive the turn, so a new message does not reopen a rate window.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use sdk::errors::HelixErrorExt;
use sdk::types::{ToolInvocation, ToolResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{AgentConfig, Config, ContextMode};
use crate::llm::{LLMError, LLMProvider, Message};
use crate::registry::CapabilityRegistry;

use super::completion::CompletionHeuristic;
use super::context::{ConversationContext, RoundRecord};
use super::parser::ResponseParser;
use super::policy::{canonical_key, ExecutionHistory, ExecutionPolicyEngine, PolicyDecision};

/// Number of recent rounds dropped-call recovery looks back over
const RECOVERY_WINDOW: usize = 3;

/// Prompt for the closing call once the round budget is spent
const EXHAUSTED_SUMMARY_PROMPT: &str = "The round limit for this request has been reached. \
Do not call any more tools. Summarize in plain text what was done and what the results show.";

/// Why a turn ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The model finished, by answering or by the completion heuristic
    Completed,
    /// Every tool call of a round failed
    NoProgress,
    /// The round budget ran out; the answer is a closing summary
    Exhausted,
}

/// Result of a finished turn
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnOutcome {
    pub turn_id: String,
    pub stop_reason: StopReason,
    pub answer: String,
    pub rounds: Vec<RoundRecord>,
    /// Model calls made, including the closing summary call
    pub model_calls: usize,
    pub duration_ms: u64,
}

/// Errors that end a turn without an answer
#[derive(Debug, thiserror::Error)]
pub enum TurnError {
    #[error("Model error: {0}")]
    Model(#[from] LLMError),

    #[error("Model did not respond within {0}s")]
    ModelTimeout(u64),

    #[error("Turn aborted")]
    Aborted,

    #[error("A turn is already in progress for this conversation")]
    TurnInProgress,
}

impl HelixErrorExt for TurnError {
    fn user_hint(&self) -> &str {
        match self {
            Self::Model(LLMError::ProviderUnavailable(_)) => {
                "The model server is unavailable. Check that Ollama is running"
            }
            Self::Model(LLMError::AuthenticationFailed(_)) => "The model server rejected the credentials",
            Self::Model(LLMError::NotFound(_)) => "The configured model was not found. Pull it or change llm.ollama.model",
            Self::Model(LLMError::RateLimitExceeded) => "The model server is rate limiting requests. Try again shortly",
            Self::Model(_) => "The model call failed. Try again",
            Self::ModelTimeout(_) => "The model took too long to respond. Try again or raise agent.llm_timeout_secs",
            Self::Aborted => "The request was cancelled before it finished",
            Self::TurnInProgress => "Wait for the current request to finish",
        }
    }

    fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            Self::Model(LLMError::AuthenticationFailed(_)) | Self::Model(LLMError::NotFound(_))
        )
    }
}

/// Clears the processing flag when a turn ends, however it ends
struct TurnGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for TurnGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Persistent chat history plus the "turn active" flag
#[derive(Debug, Default)]
pub struct Conversation {
    processing: AtomicBool,
    history: Mutex<Vec<Message>>,
    last_executions: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a turn is running
    pub fn is_processing(&self) -> bool {
        self.processing.load(Ordering::Acquire)
    }

    /// Full persistent history
    pub fn history(&self) -> Vec<Message> {
        self.history.lock().expect("Conversation lock poisoned").clone()
    }

    /// The last `window` persistent messages
    pub fn recent(&self, window: usize) -> Vec<Message> {
        let history = self.history.lock().expect("Conversation lock poisoned");
        let skip = history.len().saturating_sub(window);
        history[skip..].to_vec()
    }

    fn begin_turn(&self) -> Result<TurnGuard<'_>, TurnError> {
        self.processing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| TurnError::TurnInProgress)?;
        Ok(TurnGuard {
            flag: &self.processing,
        })
    }

    /// When each tool last ran in any turn of this conversation
    pub fn last_executions(&self) -> HashMap<String, DateTime<Utc>> {
        self.last_executions
            .lock()
            .expect("Conversation lock poisoned")
            .clone()
    }

    fn remember_executions(&self, times: HashMap<String, DateTime<Utc>>) {
        *self.last_executions.lock().expect("Conversation lock poisoned") = times;
    }

    fn commit(&self, user_message: &str, answer: &str) {
        let mut history = self.history.lock().expect("Conversation lock poisoned");
        history.push(Message::user(user_message));
        history.push(Message::assistant(answer));
    }
}

/// Supplies the current application state sent alongside every model call
pub type DomainContextFn = Arc<dyn Fn() -> String + Send + Sync>;

/// Orchestration loop over a model, a capability registry and a policy
pub struct Orchestrator {
    llm: Arc<dyn LLMProvider>,
    registry: Arc<CapabilityRegistry>,
    policy: ExecutionPolicyEngine,
    parser: ResponseParser,
    heuristic: CompletionHeuristic,
    settings: AgentConfig,
    domain_context: Option<DomainContextFn>,
}

impl Orchestrator {
    /// Create an orchestrator from the loaded configuration
    pub fn new(llm: Arc<dyn LLMProvider>, registry: Arc<CapabilityRegistry>, config: &Config) -> Self {
        Self {
            llm,
            registry,
            policy: ExecutionPolicyEngine::new(&config.policy),
            parser: ResponseParser::new().with_single_value_tool("navigate_to", "locus"),
            heuristic: CompletionHeuristic::new(config.agent.completion_threshold),
            settings: config.agent.clone(),
            domain_context: None,
        }
    }

    /// Replace the execution policy
    pub fn with_policy(mut self, policy: ExecutionPolicyEngine) -> Self {
        self.policy = policy;
        self
    }

    /// Replace the response parser
    pub fn with_parser(mut self, parser: ResponseParser) -> Self {
        self.parser = parser;
        self
    }

    /// Attach a domain-context supplier
    pub fn with_domain_context(mut self, supplier: DomainContextFn) -> Self {
        self.domain_context = Some(supplier);
        self
    }

    pub fn settings(&self) -> &AgentConfig {
        &self.settings
    }

    /// Run one turn for `conversation`.
    ///
    /// Rejects a second concurrent turn on the same conversation. On success
    /// the user message and the answer are appended to its history.
    pub async fn run_turn(
        &self,
        conversation: &Conversation,
        input: &str,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome, TurnError> {
        let _guard = conversation.begin_turn()?;

        let memory = match self.settings.context_mode {
            ContextMode::CurrentMessage => Vec::new(),
            ContextMode::FullHistory => conversation.recent(self.settings.memory_window),
        };

        let mut context =
            ConversationContext::for_turn(&self.registry.system_prompt(), &memory, input);

        // Tools that ran before a cancellation still count against their windows
        let mut history = ExecutionHistory::carrying(conversation.last_executions());
        let result = self.drive_with(&mut context, &mut history, cancel).await;
        conversation.remember_executions(history.last_executions());

        let outcome = result?;
        conversation.commit(input, &outcome.answer);

        Ok(outcome)
    }

    /// Drive the round loop over an already-built context
    pub async fn drive(
        &self,
        context: &mut ConversationContext,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome, TurnError> {
        self.drive_with(context, &mut ExecutionHistory::new(), cancel).await
    }

    /// Drive the round loop, recording executed tools into `history`
    pub async fn drive_with(
        &self,
        context: &mut ConversationContext,
        history: &mut ExecutionHistory,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome, TurnError> {
        let turn_id = Uuid::new_v4().to_string();
        let start = Instant::now();
        let max_rounds = self.settings.max_rounds.max(1);
        let mut model_calls = 0;

        info!("Starting turn {} (max {} rounds)", turn_id, max_rounds);

        for round_index in 1..=max_rounds {
            debug!(
                "Turn {} round {}/{} (~{} tokens of context)",
                turn_id,
                round_index,
                max_rounds,
                context.estimated_tokens()
            );

            let response = self.call_model(context.messages(), cancel).await?;
            model_calls += 1;

            let proposed: Vec<ToolInvocation> = self
                .parser
                .parse(&response)
                .into_iter()
                .map(|invocation| invocation.in_round(round_index))
                .collect();

            let mut round = RoundRecord::new(round_index, response.as_str());
            round.invocations_considered = proposed.clone();
            let mut admitted = self.admit(&proposed, history, round_index, &mut round);

            if admitted.is_empty() {
                if proposed.is_empty() && !self.settings.early_completion {
                    context.commit_reply(round);
                    return Ok(self.finish(turn_id, StopReason::Completed, response, context, model_calls, start));
                }

                if self.settings.early_completion {
                    let verdict = self.heuristic.evaluate(&response, false);
                    if verdict.is_complete {
                        info!(
                            "Turn {} complete in round {} ({}, confidence {:.2})",
                            turn_id, round_index, verdict.reason, verdict.confidence
                        );
                        context.commit_reply(round);
                        return Ok(self.finish(
                            turn_id,
                            StopReason::Completed,
                            verdict.summary_text,
                            context,
                            model_calls,
                            start,
                        ));
                    }
                }

                match self.recover(context, &response, history, round_index) {
                    Some(recovered) => {
                        info!("Recovered dropped call to '{}' in round {}", recovered.name, round_index);
                        round.invocations_considered.push(recovered.clone());
                        admitted.push(recovered);
                    }
                    None => {
                        context.commit_reply(round);
                        continue;
                    }
                }
            }

            let results = self.execute_all(&admitted, cancel).await?;
            for result in &results {
                history.record(result.clone());
            }
            round.invocations_executed = admitted;
            round.results = results;

            let no_progress = round.all_failed().then(|| explain_failures(&round.results));
            context.commit_round(round);

            if let Some(explanation) = no_progress {
                warn!("Turn {} made no progress in round {}", turn_id, round_index);
                return Ok(self.finish(turn_id, StopReason::NoProgress, explanation, context, model_calls, start));
            }
        }

        info!("Turn {} exhausted {} rounds, requesting summary", turn_id, max_rounds);

        let mut closing = context.messages().to_vec();
        closing.push(Message::user(EXHAUSTED_SUMMARY_PROMPT));
        let summary = self.call_model(&closing, cancel).await?;
        model_calls += 1;

        Ok(self.finish(turn_id, StopReason::Exhausted, summary, context, model_calls, start))
    }

    fn finish(
        &self,
        turn_id: String,
        stop_reason: StopReason,
        answer: String,
        context: &ConversationContext,
        model_calls: usize,
        start: Instant,
    ) -> TurnOutcome {
        let duration_ms = start.elapsed().as_millis() as u64;
        info!(
            "Turn {} ended: {:?} after {} rounds, {} model calls, {}ms",
            turn_id,
            stop_reason,
            context.rounds().len(),
            model_calls,
            duration_ms
        );

        TurnOutcome {
            turn_id,
            stop_reason,
            answer,
            rounds: context.rounds().to_vec(),
            model_calls,
            duration_ms,
        }
    }

    /// Decide every proposal before anything runs; later siblings see earlier admissions
    fn admit(
        &self,
        proposed: &[ToolInvocation],
        history: &ExecutionHistory,
        round_index: usize,
        round: &mut RoundRecord,
    ) -> Vec<ToolInvocation> {
        let mut admitted: Vec<ToolInvocation> = Vec::new();

        for invocation in proposed {
            let decision = self.decide(invocation, history, round_index, &admitted);
            if decision.allow {
                admitted.push(invocation.clone());
            } else {
                warn!(
                    "Policy rejected '{}' in round {}: {}",
                    invocation.name, round_index, decision.reason
                );
                round.rejected.push((invocation.clone(), decision.reason));
            }
        }

        admitted
    }

    fn decide(
        &self,
        invocation: &ToolInvocation,
        history: &ExecutionHistory,
        round_index: usize,
        admitted: &[ToolInvocation],
    ) -> PolicyDecision {
        let class = self.policy.classify(&invocation.name).or_else(|| {
            self.registry
                .source_id_for(&invocation.name)
                .and_then(|id| self.policy.source_default(&id))
        });
        self.policy
            .decide(class, invocation, history, round_index, admitted, Utc::now())
    }

    /// Find a call proposed in a recent round that never ran and is allowed now
    fn recover(
        &self,
        context: &ConversationContext,
        current_response: &str,
        history: &ExecutionHistory,
        round_index: usize,
    ) -> Option<ToolInvocation> {
        let earlier = context
            .rounds()
            .iter()
            .rev()
            .take(RECOVERY_WINDOW - 1)
            .map(|round| round.raw_response.as_str());

        std::iter::once(current_response)
            .chain(earlier)
            .flat_map(|raw| self.parser.scan_candidates(raw))
            .map(|candidate| candidate.in_round(round_index))
            .find(|candidate| {
                !history.executed(&canonical_key(candidate))
                    && self.decide(candidate, history, round_index, &[]).allow
            })
    }

    async fn call_model(
        &self,
        messages: &[Message],
        cancel: &CancellationToken,
    ) -> Result<String, TurnError> {
        if cancel.is_cancelled() {
            return Err(TurnError::Aborted);
        }

        let domain_context = self
            .domain_context
            .as_ref()
            .map(|supplier| supplier())
            .unwrap_or_default();
        let timeout_secs = self.settings.llm_timeout_secs;

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TurnError::Aborted),
            result = timeout(
                Duration::from_secs(timeout_secs),
                self.llm.generate(messages, &domain_context),
            ) => result,
        };

        if cancel.is_cancelled() {
            return Err(TurnError::Aborted);
        }

        match result {
            Ok(Ok(text)) => Ok(text),
            Ok(Err(e)) => {
                warn!("Model call failed ({}): {}", e.kind(), e);
                Err(TurnError::Model(e))
            }
            Err(_) => {
                warn!("Model call timed out after {}s", timeout_secs);
                Err(TurnError::ModelTimeout(timeout_secs))
            }
        }
    }

    /// Run admitted invocations concurrently; results come back in proposal order
    async fn execute_all(
        &self,
        admitted: &[ToolInvocation],
        cancel: &CancellationToken,
    ) -> Result<Vec<ToolResult>, TurnError> {
        for invocation in admitted {
            debug!("Executing '{}' with {}", invocation.name, serde_json::Value::Object(invocation.parameters.clone()));
        }

        let calls = admitted.iter().map(|invocation| self.registry.execute(invocation));

        let results = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TurnError::Aborted),
            results = join_all(calls) => results,
        };

        if cancel.is_cancelled() {
            return Err(TurnError::Aborted);
        }

        Ok(results)
    }
}

/// Per-tool explanation for a round where nothing succeeded
fn explain_failures(results: &[ToolResult]) -> String {
    let mut lines = vec!["I could not make progress: every tool call in the last step failed.".to_string()];
    for result in results {
        lines.push(format!(
            "- {}: {}",
            result.tool_name(),
            result.error.as_deref().unwrap_or("unknown error")
        ));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_turn_guard_resets_flag() {
        let conversation = Conversation::new();
        {
            let _guard = conversation.begin_turn().unwrap();
            assert!(conversation.is_processing());
            assert!(matches!(conversation.begin_turn(), Err(TurnError::TurnInProgress)));
        }
        assert!(!conversation.is_processing());
        assert!(conversation.begin_turn().is_ok());
    }

    #[test]
    fn test_recent_window() {
        let conversation = Conversation::new();
        conversation.commit("one", "1");
        conversation.commit("two", "2");

        let recent = conversation.recent(3);
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].content, "1");
        assert_eq!(conversation.recent(0).len(), 0);
        assert_eq!(conversation.history().len(), 4);
    }

    #[test]
    fn test_explain_failures_names_each_tool() {
        let results = vec![
            ToolResult::failure(ToolInvocation::new("navigate_to"), "unknown chromosome 'chr99'"),
            ToolResult::failure(ToolInvocation::new("gc_content"), "sequence is empty"),
        ];
        let explanation = explain_failures(&results);
        assert!(explanation.contains("- navigate_to: unknown chromosome 'chr99'"));
        assert!(explanation.contains("- gc_content: sequence is empty"));
    }

    #[test]
    fn test_turn_error_hints() {
        assert_eq!(
            TurnError::Aborted.user_hint(),
            "The request was cancelled before it finished"
        );
        assert!(TurnError::ModelTimeout(120).is_recoverable());
        assert!(!TurnError::Model(LLMError::NotFound("llama".into())).is_recoverable());
        assert_eq!(TurnError::ModelTimeout(5).to_string(), "Model did not respond within 5s");
    }
}
