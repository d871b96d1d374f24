//! Conversation memory: per-agent, per-thread transcripts.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::providers::ChatMessage;

/// One agent's view of one conversation thread.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub agent_id: String,
    /// Client-supplied thread identifier.
    pub context: String,
}

impl SessionKey {
    pub fn new(agent_id: impl Into<String>, thread_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            context: thread_id.into(),
        }
    }
}

/// A tracked conversation session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub key: SessionKey,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    /// Model that answered the most recent turn.
    pub model: Option<String>,
    /// Completed user/agent exchanges.
    pub turns: u32,
}

/// A single entry in a session transcript.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TranscriptEntry {
    pub role: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl TranscriptEntry {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".into(),
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    /// Replay form handed back to the agent as history.
    pub fn to_chat_message(&self) -> ChatMessage {
        ChatMessage {
            role: self.role.clone(),
            content: self.content.clone(),
        }
    }
}

/// Filter criteria for listing sessions.
#[derive(Debug, Clone, Default)]
pub struct SessionFilter {
    pub agent_id: Option<String>,
    /// Restrict to one thread.
    pub context: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl SessionFilter {
    pub fn thread(thread_id: impl Into<String>) -> Self {
        Self {
            context: Some(thread_id.into()),
            ..Self::default()
        }
    }
}

/// Storage for agent sessions and their transcripts.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Create a new session, replacing any existing one with the same key.
    async fn create(&self, key: &SessionKey) -> Result<Session>;

    async fn get(&self, key: &SessionKey) -> Result<Option<Session>>;

    /// Bump `last_activity` and the turn counter, recording the answering model.
    async fn update_activity(&self, key: &SessionKey, model: Option<&str>) -> Result<()>;

    /// Sessions matching `filter`, most recently active first.
    async fn list(&self, filter: &SessionFilter) -> Result<Vec<Session>>;

    /// Delete a session and its transcript.
    async fn delete(&self, key: &SessionKey) -> Result<()>;

    /// Delete every agent's session for one thread. Returns how many were removed.
    async fn delete_thread(&self, thread_id: &str) -> Result<usize>;

    async fn append_transcript(&self, key: &SessionKey, entry: TranscriptEntry) -> Result<()>;

    /// Transcript in chronological order; with a limit, only the most recent entries.
    async fn get_transcript(
        &self,
        key: &SessionKey,
        limit: Option<usize>,
    ) -> Result<Vec<TranscriptEntry>>;

    fn name(&self) -> &str;
}
