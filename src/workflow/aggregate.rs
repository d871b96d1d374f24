use anyhow::{Context, Result};
use std::fmt::Write as _;
use std::sync::Arc;
use tokio::sync::mpsc;

use super::state::AgentOutcome;
use crate::agent::prompt::aggregator_prompt;
use crate::providers::{ChatMessage, ConversationMessage, Provider};

/// Merges several agents' answers into one reply with a single model call.
pub struct Aggregator {
    provider: Arc<dyn Provider>,
    model: String,
    temperature: f64,
    system_prompt: String,
}

impl Aggregator {
    pub fn new(provider: Arc<dyn Provider>, model: &str, temperature: f64, personality: &str) -> Self {
        Self {
            provider,
            model: model.to_string(),
            temperature,
            system_prompt: aggregator_prompt(personality),
        }
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub async fn combine(&self, input: &str, outputs: &[AgentOutcome]) -> Result<String> {
        let response = self
            .provider
            .chat_with_system(
                Some(&self.system_prompt),
                &combine_request(input, outputs),
                &self.model,
                self.temperature,
            )
            .await
            .context("aggregator model call failed")?;
        tracing::debug!(agents = outputs.len(), "Combined agent outputs");
        Ok(response)
    }

    /// Same as [`Aggregator::combine`], forwarding content deltas through `tx` as they arrive.
    pub async fn combine_stream(
        &self,
        input: &str,
        outputs: &[AgentOutcome],
        tx: mpsc::UnboundedSender<String>,
    ) -> Result<String> {
        let messages = [
            ConversationMessage::Chat(ChatMessage::system(self.system_prompt.clone())),
            ConversationMessage::Chat(ChatMessage::user(combine_request(input, outputs))),
        ];
        self.provider
            .stream_chat(&messages, &self.model, self.temperature, tx)
            .await
            .context("aggregator model call failed")
    }
}

/// User turn for the merge call: the original request, then each answer under its agent label.
fn combine_request(input: &str, outputs: &[AgentOutcome]) -> String {
    let mut request = format!("User request:\n{input}\n");
    for outcome in outputs {
        let _ = write!(
            request,
            "\n## {} agent\n{}\n",
            outcome.agent,
            outcome.content.trim()
        );
    }
    request
}
