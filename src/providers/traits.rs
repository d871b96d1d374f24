//! Provider traits and wire-neutral chat types.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::tools::ToolSpec;

/// A single chat history entry (`system`, `user` or `assistant`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".into(),
            content: content.into(),
        }
    }
}

/// A tool invocation requested by the model. `arguments` is the raw JSON string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

/// Result of one tool call, sent back to the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResultMessage {
    pub tool_call_id: String,
    pub content: String,
}

/// Conversation entries understood by the tool-calling loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ConversationMessage {
    Chat(ChatMessage),
    AssistantToolCalls {
        text: Option<String>,
        tool_calls: Vec<ToolCall>,
    },
    ToolResults(Vec<ToolResultMessage>),
}

impl From<ChatMessage> for ConversationMessage {
    fn from(message: ChatMessage) -> Self {
        Self::Chat(message)
    }
}

/// Output format requested from the model.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum ResponseFormat {
    #[default]
    Text,
    /// Structured output constrained by a JSON Schema.
    JsonSchema {
        name: String,
        schema: serde_json::Value,
    },
}

#[derive(Debug, Clone)]
pub struct ChatRequest<'a> {
    pub messages: &'a [ConversationMessage],
    pub tools: Option<&'a [ToolSpec]>,
    pub response_format: ResponseFormat,
}

impl<'a> ChatRequest<'a> {
    pub fn new(messages: &'a [ConversationMessage]) -> Self {
        Self {
            messages,
            tools: None,
            response_format: ResponseFormat::Text,
        }
    }

    pub fn with_tools(mut self, tools: &'a [ToolSpec]) -> Self {
        if !tools.is_empty() {
            self.tools = Some(tools);
        }
        self
    }

    pub fn with_response_format(mut self, format: ResponseFormat) -> Self {
        self.response_format = format;
        self
    }
}

/// Token accounting reported by the provider, when available.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

#[derive(Debug, Clone, Default)]
pub struct ChatResponse {
    pub text: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Option<TokenUsage>,
}

impl ChatResponse {
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    pub fn text_or_empty(&self) -> &str {
        self.text.as_deref().unwrap_or("")
    }
}

/// A hosted model backend.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Run one completion over a full conversation.
    async fn chat(
        &self,
        request: ChatRequest<'_>,
        model: &str,
        temperature: f64,
    ) -> anyhow::Result<ChatResponse>;

    /// One-shot helper: optional system prompt plus a single user message.
    async fn chat_with_system(
        &self,
        system_prompt: Option<&str>,
        message: &str,
        model: &str,
        temperature: f64,
    ) -> anyhow::Result<String> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = system_prompt {
            messages.push(ConversationMessage::Chat(ChatMessage::system(system)));
        }
        messages.push(ConversationMessage::Chat(ChatMessage::user(message)));

        let response = self
            .chat(ChatRequest::new(&messages), model, temperature)
            .await?;
        Ok(response.text.unwrap_or_default())
    }

    /// Stream content deltas through `tx`, returning the full text.
    ///
    /// Providers without streaming support send the whole answer as one delta.
    async fn stream_chat(
        &self,
        messages: &[ConversationMessage],
        model: &str,
        temperature: f64,
        tx: mpsc::UnboundedSender<String>,
    ) -> anyhow::Result<String> {
        let response = self
            .chat(ChatRequest::new(messages), model, temperature)
            .await?;
        let text = response.text.unwrap_or_default();
        let _ = tx.send(text.clone());
        Ok(text)
    }

    fn name(&self) -> &str;
}
