//! Per-request generation context.
//!
//! A [`TurnContext`] is created for each chat request and threaded through
//! the orchestration loop by `&mut`. It carries the messages the model sees,
//! the server-side ledger of tool invocations and the round counter.

use serde_json::Value;
use tracing::debug;

use super::detector::{CALL_CLOSE, CALL_OPEN};
use crate::invocation::{InvocationStatus, ToolInvocation};
use crate::model::ChatMessage;

/// Mutable state for one assistant turn.
#[derive(Debug, Clone)]
pub struct TurnContext {
    session_id: String,
    messages: Vec<ChatMessage>,
    ledger: Vec<ToolInvocation>,
    tool_rounds: u32,
}

impl TurnContext {
    /// Context seeded with a system prompt and the conversation so far.
    pub fn new(
        session_id: impl Into<String>,
        system_prompt: &str,
        history: impl IntoIterator<Item = ChatMessage>,
    ) -> Self {
        let mut messages = Vec::new();
        if !system_prompt.is_empty() {
            messages.push(ChatMessage::system(system_prompt));
        }
        messages.extend(history);
        Self {
            session_id: session_id.into(),
            messages,
            ledger: Vec::new(),
            tool_rounds: 0,
        }
    }

    /// Session id used in logs.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Messages the next generation round sees.
    #[must_use]
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Invocations run this turn, in declaration order.
    #[must_use]
    pub fn ledger(&self) -> &[ToolInvocation] {
        &self.ledger
    }

    /// Tool rounds started this turn.
    #[must_use]
    pub fn tool_rounds(&self) -> u32 {
        self.tool_rounds
    }

    /// Count a new tool round.
    pub fn begin_tool_round(&mut self) -> u32 {
        self.tool_rounds += 1;
        self.tool_rounds
    }

    /// Record the assistant's final prose for this round.
    pub fn push_assistant(&mut self, prose: &str) {
        if !prose.is_empty() {
            self.messages.push(ChatMessage::assistant(prose));
        }
    }

    /// Record a resolved tool call and ask the model to analyse it.
    ///
    /// Appends the assistant's prose plus its call, the tool outcome and
    /// `analysis_instruction`, in that order.
    pub fn push_tool_exchange(
        &mut self,
        prose: &str,
        raw_call: &str,
        invocation: ToolInvocation,
        analysis_instruction: &str,
    ) {
        self.messages.push(ChatMessage::assistant(format!(
            "{prose}{CALL_OPEN}{raw_call}{CALL_CLOSE}"
        )));
        self.messages.push(ChatMessage::tool(tool_outcome_text(&invocation)));
        if !analysis_instruction.is_empty() {
            self.messages.push(ChatMessage::user(analysis_instruction));
        }
        debug!(
            session_id = %self.session_id,
            invocation_id = %invocation.id,
            status = ?invocation.status,
            "turn context: tool exchange recorded"
        );
        self.ledger.push(invocation);
    }
}

fn tool_outcome_text(invocation: &ToolInvocation) -> String {
    let head = format!("Tool {} on {}", invocation.tool, invocation.server);
    match invocation.status {
        InvocationStatus::Completed => {
            let result = invocation.result.as_ref().unwrap_or(&Value::Null);
            format!("{head} returned: {result}")
        }
        InvocationStatus::Failed => format!(
            "{head} failed: {}",
            invocation.error.as_deref().unwrap_or("unknown error")
        ),
        InvocationStatus::Declared | InvocationStatus::Executing => {
            format!("{head} did not finish.")
        }
    }
}
