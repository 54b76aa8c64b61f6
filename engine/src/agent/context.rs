//! Conversation Context
//!
//! The ordered message list sent to the model on every round of a turn:
//! system prompt, remembered history, the user message, then one assistant
//! entry and one tool-result entry per executed round.
//!
//! A context is created at turn start and discarded at turn end. Rounds are
//! committed whole through `commit_round`, so an interrupted round never
//! leaves a half-written entry behind.

use sdk::types::{ToolInvocation, ToolResult};
use serde::{Deserialize, Serialize};

use crate::llm::{Message, MessageRole};

/// Rough estimate used for logging only (1 token ≈ 4 characters)
const CHARS_PER_TOKEN: usize = 4;

/// Everything that happened in one round
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoundRecord {
    /// 1-based round index
    pub index: usize,

    /// Model text for the round, untouched
    pub raw_response: String,

    /// Every invocation the parser (or dropped-call recovery) proposed
    pub invocations_considered: Vec<ToolInvocation>,

    /// Invocations the policy admitted, in proposal order
    pub invocations_executed: Vec<ToolInvocation>,

    /// Invocations the policy denied, with the reason
    pub rejected: Vec<(ToolInvocation, String)>,

    /// One result per executed invocation, in the same order
    pub results: Vec<ToolResult>,
}

impl RoundRecord {
    pub fn new(index: usize, raw_response: impl Into<String>) -> Self {
        Self {
            index,
            raw_response: raw_response.into(),
            ..Default::default()
        }
    }

    /// Whether every executed invocation failed
    pub fn all_failed(&self) -> bool {
        !self.results.is_empty() && self.results.iter().all(|r| !r.success)
    }
}

/// Ephemeral per-turn message history
#[derive(Debug, Clone, Default)]
pub struct ConversationContext {
    messages: Vec<Message>,
    rounds: Vec<RoundRecord>,
}

impl ConversationContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a context from a system prompt, remembered history and the user message
    pub fn for_turn(system_prompt: &str, memory: &[Message], user_message: &str) -> Self {
        let mut context = Self::new();
        context.push_system(system_prompt);
        for message in memory {
            context.messages.push(message.clone());
        }
        context.push_user(user_message);
        context
    }

    pub fn push_system(&mut self, content: impl Into<String>) {
        self.messages.push(Message::system(content));
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.messages.push(Message::user(content));
    }

    pub fn push_assistant(&mut self, content: impl Into<String>) {
        self.messages.push(Message::assistant(content));
    }

    pub fn push_tool_result(&mut self, content: impl Into<String>) {
        self.messages.push(Message::tool_result(content));
    }

    /// Commit an executed round: the issued calls, then their outcomes
    pub fn commit_round(&mut self, round: RoundRecord) {
        self.push_assistant(render_invocations(&round.invocations_executed));
        self.push_tool_result(render_outcomes(&round.results, &round.rejected));
        self.rounds.push(round);
    }

    /// Commit a round that ran no tools: the response becomes an assistant entry,
    /// followed by the `[skipped]` lines of any calls the policy refused
    pub fn commit_reply(&mut self, round: RoundRecord) {
        self.push_assistant(round.raw_response.clone());
        if !round.rejected.is_empty() {
            self.push_tool_result(render_outcomes(&[], &round.rejected));
        }
        self.rounds.push(round);
    }

    /// Messages in insertion order
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Committed rounds in order
    pub fn rounds(&self) -> &[RoundRecord] {
        &self.rounds
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Number of entries with the given role
    pub fn count_role(&self, role: MessageRole) -> usize {
        self.messages.iter().filter(|m| m.role == role).count()
    }

    /// Approximate token size of the whole context
    pub fn estimated_tokens(&self) -> usize {
        self.messages
            .iter()
            .map(|m| m.content.len().div_ceil(CHARS_PER_TOKEN) + 10)
            .sum()
    }
}

/// Issued calls as the wire JSON array
pub fn render_invocations(invocations: &[ToolInvocation]) -> String {
    let wire: Vec<serde_json::Value> = invocations.iter().map(ToolInvocation::to_wire).collect();
    serde_json::Value::Array(wire).to_string()
}

/// One line per outcome, tagged `[ok]`, `[failed]` or `[skipped]`
pub fn render_outcomes(results: &[ToolResult], rejected: &[(ToolInvocation, String)]) -> String {
    let mut lines: Vec<String> = results
        .iter()
        .map(|result| {
            if result.success {
                let value = result
                    .value
                    .as_ref()
                    .map(|v| v.to_string())
                    .unwrap_or_else(|| "null".to_string());
                format!("[ok] {}: {}", result.tool_name(), value)
            } else {
                format!(
                    "[failed] {}: {}",
                    result.tool_name(),
                    result.error.as_deref().unwrap_or("unknown error")
                )
            }
        })
        .collect();

    lines.extend(
        rejected
            .iter()
            .map(|(invocation, reason)| format!("[skipped] {}: {}", invocation.name, reason)),
    );

    lines.join("\n")
}
