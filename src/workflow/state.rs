//! Inputs, outputs and progress events of one workflow run.

use serde::{Deserialize, Serialize};

use crate::providers::ChatMessage;
use crate::routing::{Category, RouteDecision};

/// One user turn submitted to the workflow.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowInput {
    /// The latest user message.
    pub input: String,
    /// Earlier turns held by the client, oldest first. Used when the thread
    /// has no stored memory yet.
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    /// Conversation thread; enables server-side memory when set.
    #[serde(default)]
    pub thread_id: Option<String>,
}

impl WorkflowInput {
    pub fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            ..Self::default()
        }
    }

    pub fn with_thread(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }

    pub fn with_messages(mut self, messages: Vec<ChatMessage>) -> Self {
        self.messages = messages;
        self
    }

    /// Thread id with surrounding whitespace removed; blank counts as absent.
    pub fn thread(&self) -> Option<&str> {
        self.thread_id
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }
}

/// Answer produced by one agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentOutcome {
    pub agent: Category,
    pub content: String,
}

/// Final state of a completed run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowState {
    pub input: String,
    pub decision: RouteDecision,
    /// One entry per routed category, in decision order.
    pub outputs: Vec<AgentOutcome>,
    /// Aggregated answer, or the only agent's answer verbatim.
    pub combined_output: String,
}

impl WorkflowState {
    /// Categories that produced an output, in decision order.
    pub fn agents(&self) -> Vec<Category> {
        self.outputs.iter().map(|o| o.agent).collect()
    }
}

/// Progress notification emitted by a streaming run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent {
    Decision { decision: RouteDecision },
    AgentOutput(AgentOutcome),
    /// Partial text of the merged answer; only sent when several agents ran.
    Delta { content: String },
    Combined { content: String },
    Error { message: String },
}

impl WorkflowEvent {
    /// SSE event name.
    pub fn name(&self) -> &'static str {
        match self {
            WorkflowEvent::Decision { .. } => "decision",
            WorkflowEvent::AgentOutput(_) => "agent_output",
            WorkflowEvent::Delta { .. } => "delta",
            WorkflowEvent::Combined { .. } => "combined",
            WorkflowEvent::Error { .. } => "error",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("input must not be empty")]
    EmptyInput,
    #[error("no agent configured for '{0}'")]
    MissingAgent(Category),
    /// A model, tool loop or memory call failed; the message is already sanitized.
    #[error("{stage} step failed: {message}")]
    Upstream { stage: String, message: String },
}

impl WorkflowError {
    pub(crate) fn upstream(stage: impl Into<String>, error: &anyhow::Error) -> Self {
        WorkflowError::Upstream {
            stage: stage.into(),
            message: format!("{error:#}"),
        }
    }
}
