//! The routing workflow: router step, concurrent agent steps, aggregation step.

use anyhow::Result;
use futures_util::future::try_join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

use super::aggregate::Aggregator;
use super::state::{AgentOutcome, WorkflowError, WorkflowEvent, WorkflowInput, WorkflowState};
use crate::agent::{create_agent, prompt, Agent};
use crate::config::Config;
use crate::providers::{create_provider, ChatMessage, Provider};
use crate::routing::{create_classifier, Category, Classifier};
use crate::sessions::{
    create_session_store, SessionFilter, SessionKey, SessionStore, TranscriptEntry,
};

type EventSink<'a> = Option<&'a mpsc::UnboundedSender<WorkflowEvent>>;

fn emit(sink: EventSink<'_>, event: WorkflowEvent) {
    if let Some(tx) = sink {
        // Receiver gone means the client disconnected; the run still completes.
        let _ = tx.send(event);
    }
}

/// Classifies each message, runs the chosen agents and merges their answers.
pub struct RouterWorkflow {
    classifier: Box<dyn Classifier>,
    agents: HashMap<Category, Agent>,
    aggregator: Aggregator,
    sessions: Arc<dyn SessionStore>,
    max_history: usize,
}

impl RouterWorkflow {
    pub fn new(
        classifier: Box<dyn Classifier>,
        agents: impl IntoIterator<Item = (Category, Agent)>,
        aggregator: Aggregator,
        sessions: Arc<dyn SessionStore>,
        max_history: usize,
    ) -> Self {
        Self {
            classifier,
            agents: agents.into_iter().collect(),
            aggregator,
            sessions,
            max_history,
        }
    }

    /// Build provider, router, every agent and the in-memory store from config.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let provider: Arc<dyn Provider> = Arc::from(create_provider(
            config.effective_provider(),
            config.api_key.as_deref(),
            config.api_url.as_deref(),
        )?);
        let personality = prompt::load_personality(&config.workspace_dir).await?;
        Self::with_provider(config, provider, &personality)
    }

    /// Like [`RouterWorkflow::from_config`], with an explicit provider and personality.
    pub fn with_provider(
        config: &Config,
        provider: Arc<dyn Provider>,
        personality: &str,
    ) -> Result<Self> {
        let agents = Category::ALL
            .iter()
            .map(|&category| {
                create_agent(category, config, provider.clone(), personality)
                    .map(|agent| (category, agent))
            })
            .collect::<Result<Vec<_>>>()?;
        let classifier = create_classifier(config, provider.clone());
        let aggregator = Aggregator::new(
            provider.clone(),
            config.effective_model(),
            config.default_temperature,
            personality,
        );

        tracing::info!(
            provider = provider.name(),
            model = config.effective_model(),
            multi_route = config.router.multi_route,
            "Routing workflow ready"
        );

        let max_history = config.sessions.max_history_messages;
        Ok(Self::new(
            classifier,
            agents,
            aggregator,
            create_session_store(max_history),
            max_history,
        ))
    }

    /// Agents in routing order.
    pub fn agents(&self) -> impl Iterator<Item = &Agent> {
        Category::ALL.iter().filter_map(|c| self.agents.get(c))
    }

    pub fn sessions(&self) -> &Arc<dyn SessionStore> {
        &self.sessions
    }

    /// Stored transcript of every agent that took part in `thread_id`.
    pub async fn thread_transcripts(
        &self,
        thread_id: &str,
    ) -> Result<Vec<(String, Vec<TranscriptEntry>)>> {
        let thread_id = thread_id.trim();
        let mut sessions = self
            .sessions
            .list(&SessionFilter::thread(thread_id))
            .await?;
        sessions.sort_by(|a, b| a.key.agent_id.cmp(&b.key.agent_id));

        let mut transcripts = Vec::with_capacity(sessions.len());
        for session in sessions {
            let entries = self.sessions.get_transcript(&session.key, None).await?;
            transcripts.push((session.key.agent_id, entries));
        }
        Ok(transcripts)
    }

    /// Forget all memory of `thread_id`. Returns how many agent sessions were dropped.
    pub async fn forget_thread(&self, thread_id: &str) -> Result<usize> {
        let thread_id = thread_id.trim();
        let removed = self.sessions.delete_thread(thread_id).await?;
        tracing::info!(thread_id, removed, "Thread forgotten");
        Ok(removed)
    }

    /// Run the whole workflow and return its final state.
    pub async fn invoke(&self, input: WorkflowInput) -> Result<WorkflowState, WorkflowError> {
        self.run(input, None).await
    }

    /// Run the workflow, sending a [`WorkflowEvent`] as each step completes.
    ///
    /// A failure is also reported as [`WorkflowEvent::Error`] before being returned.
    pub async fn stream(
        &self,
        input: WorkflowInput,
        tx: mpsc::UnboundedSender<WorkflowEvent>,
    ) -> Result<WorkflowState, WorkflowError> {
        let result = self.run(input, Some(&tx)).await;
        if let Err(error) = &result {
            emit(
                Some(&tx),
                WorkflowEvent::Error {
                    message: error.to_string(),
                },
            );
        }
        result
    }

    async fn run(
        &self,
        input: WorkflowInput,
        sink: EventSink<'_>,
    ) -> Result<WorkflowState, WorkflowError> {
        let text = input.input.trim();
        if text.is_empty() {
            return Err(WorkflowError::EmptyInput);
        }

        let decision = self
            .classifier
            .classify(text)
            .await
            .map_err(|e| WorkflowError::upstream("router", &e))?;
        tracing::info!(
            thread_id = input.thread().unwrap_or("-"),
            categories = ?decision.categories(),
            "Routed message"
        );
        emit(
            sink,
            WorkflowEvent::Decision {
                decision: decision.clone(),
            },
        );

        let outputs = try_join_all(
            decision
                .categories()
                .iter()
                .map(|&category| self.run_agent(category, text, &input, sink)),
        )
        .await?;

        let combined_output = if decision.is_multi() {
            self.aggregate(text, &outputs, sink)
                .await
                .map_err(|e| WorkflowError::upstream("aggregator", &e))?
        } else {
            outputs
                .first()
                .map(|o| o.content.clone())
                .unwrap_or_default()
        };
        emit(
            sink,
            WorkflowEvent::Combined {
                content: combined_output.clone(),
            },
        );

        Ok(WorkflowState {
            input: text.to_string(),
            decision,
            outputs,
            combined_output,
        })
    }

    async fn aggregate(
        &self,
        text: &str,
        outputs: &[AgentOutcome],
        sink: EventSink<'_>,
    ) -> Result<String> {
        if sink.is_none() {
            return self.aggregator.combine(text, outputs).await;
        }

        let (delta_tx, mut delta_rx) = mpsc::unbounded_channel();
        let forward = async {
            while let Some(content) = delta_rx.recv().await {
                emit(sink, WorkflowEvent::Delta { content });
            }
        };
        let (combined, ()) = tokio::join!(
            self.aggregator.combine_stream(text, outputs, delta_tx),
            forward
        );
        combined
    }

    async fn run_agent(
        &self,
        category: Category,
        text: &str,
        input: &WorkflowInput,
        sink: EventSink<'_>,
    ) -> Result<AgentOutcome, WorkflowError> {
        let agent = self
            .agents
            .get(&category)
            .ok_or(WorkflowError::MissingAgent(category))?;
        let key = input
            .thread()
            .map(|thread_id| SessionKey::new(agent.id(), thread_id));

        let mut history = self
            .history_for(key.as_ref(), &input.messages)
            .await
            .map_err(|e| WorkflowError::upstream("session", &e))?;
        history.push(ChatMessage::user(text));

        let output = agent
            .run(&history)
            .await
            .map_err(|e| WorkflowError::upstream(agent.id(), &e))?;
        tracing::debug!(
            agent = agent.id(),
            tool_calls = output.tool_calls_made,
            "Agent finished"
        );

        if let Some(key) = &key {
            self.remember(key, text, &output.response, agent.model())
                .await
                .map_err(|e| WorkflowError::upstream("session", &e))?;
        }

        let outcome = AgentOutcome {
            agent: category,
            content: output.response,
        };
        emit(sink, WorkflowEvent::AgentOutput(outcome.clone()));
        Ok(outcome)
    }

    /// Stored thread memory when there is any, else the client's own history.
    async fn history_for(
        &self,
        key: Option<&SessionKey>,
        client_messages: &[ChatMessage],
    ) -> Result<Vec<ChatMessage>> {
        if self.max_history == 0 {
            return Ok(Vec::new());
        }
        if let Some(key) = key {
            let stored = self
                .sessions
                .get_transcript(key, Some(self.max_history))
                .await?;
            if !stored.is_empty() {
                return Ok(stored.iter().map(TranscriptEntry::to_chat_message).collect());
            }
        }

        let mut replay: Vec<ChatMessage> = client_messages
            .iter()
            .filter(|m| m.role == "user" || m.role == "assistant")
            .cloned()
            .collect();
        let start = replay.len().saturating_sub(self.max_history);
        Ok(replay.split_off(start))
    }

    async fn remember(&self, key: &SessionKey, user: &str, reply: &str, model: &str) -> Result<()> {
        if self.sessions.get(key).await?.is_none() {
            self.sessions.create(key).await?;
        }
        self.sessions
            .append_transcript(key, TranscriptEntry::user(user))
            .await?;
        self.sessions
            .append_transcript(key, TranscriptEntry::assistant(reply))
            .await?;
        self.sessions.update_activity(key, Some(model)).await
    }
}
