use anyhow::{bail, Context, Result};
use std::sync::Arc;

use crate::providers::{
    ChatMessage, ChatRequest, ConversationMessage, Provider, ToolCall, ToolResultMessage,
};
use crate::tools::{Tool, ToolSpec};

const DEFAULT_MAX_TOOL_ITERATIONS: usize = 10;

/// Final answer of one agent run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentRunOutput {
    pub response: String,
    pub tool_calls_made: u32,
}

/// A tool-using conversational agent: one system prompt, one model, a fixed tool set.
pub struct Agent {
    id: String,
    provider: Arc<dyn Provider>,
    model: String,
    temperature: f64,
    system_prompt: String,
    tools: Vec<Box<dyn Tool>>,
    tool_specs: Vec<ToolSpec>,
    max_tool_iterations: usize,
}

impl Agent {
    pub fn builder() -> AgentBuilder {
        AgentBuilder::new()
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn tool_specs(&self) -> &[ToolSpec] {
        &self.tool_specs
    }

    async fn execute_tool(&self, call: &ToolCall) -> String {
        let Some(tool) = self.tools.iter().find(|t| t.name() == call.name) else {
            tracing::warn!(agent = %self.id, tool = %call.name, "Model requested unknown tool");
            return format!("Error: unknown tool '{}'", call.name);
        };

        let args: serde_json::Value = match serde_json::from_str(&call.arguments) {
            Ok(args) => args,
            Err(e) => return format!("Error: invalid arguments for '{}': {e}", call.name),
        };

        match tool.execute(args).await {
            Ok(result) => {
                tracing::debug!(
                    agent = %self.id,
                    tool = %call.name,
                    success = result.success,
                    "Tool finished"
                );
                result.model_content()
            }
            Err(e) => format!("Error: {} failed: {e}", call.name),
        }
    }

    /// Answer the conversation in `history`, calling tools as the model asks.
    pub async fn run(&self, history: &[ChatMessage]) -> Result<AgentRunOutput> {
        let mut messages: Vec<ConversationMessage> = Vec::with_capacity(history.len() + 1);
        messages.push(ConversationMessage::Chat(ChatMessage::system(
            self.system_prompt.clone(),
        )));
        messages.extend(history.iter().cloned().map(ConversationMessage::Chat));

        let mut tool_calls_made: u32 = 0;

        for iteration in 0..self.max_tool_iterations {
            let request = ChatRequest::new(&messages).with_tools(&self.tool_specs);
            let response = self
                .provider
                .chat(request, &self.model, self.temperature)
                .await
                .with_context(|| format!("{} agent model call failed", self.id))?;

            if !response.has_tool_calls() {
                tracing::debug!(agent = %self.id, iteration, tool_calls_made, "Agent answered");
                return Ok(AgentRunOutput {
                    response: response.text.unwrap_or_default(),
                    tool_calls_made,
                });
            }

            let mut results = Vec::with_capacity(response.tool_calls.len());
            for call in &response.tool_calls {
                let content = self.execute_tool(call).await;
                tool_calls_made += 1;
                results.push(ToolResultMessage {
                    tool_call_id: call.id.clone(),
                    content,
                });
            }

            messages.push(ConversationMessage::AssistantToolCalls {
                text: response.text,
                tool_calls: response.tool_calls,
            });
            messages.push(ConversationMessage::ToolResults(results));
        }

        bail!(
            "{} agent exceeded {} tool iterations without answering",
            self.id,
            self.max_tool_iterations
        )
    }
}

pub struct AgentBuilder {
    id: Option<String>,
    provider: Option<Arc<dyn Provider>>,
    model: Option<String>,
    temperature: f64,
    system_prompt: String,
    tools: Vec<Box<dyn Tool>>,
    max_tool_iterations: usize,
}

impl AgentBuilder {
    pub fn new() -> Self {
        Self {
            id: None,
            provider: None,
            model: None,
            temperature: 0.7,
            system_prompt: String::new(),
            tools: Vec::new(),
            max_tool_iterations: DEFAULT_MAX_TOOL_ITERATIONS,
        }
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn Provider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn tools(mut self, tools: Vec<Box<dyn Tool>>) -> Self {
        self.tools = tools;
        self
    }

    /// `0` falls back to the default of 10.
    pub fn max_tool_iterations(mut self, max: usize) -> Self {
        self.max_tool_iterations = if max == 0 {
            DEFAULT_MAX_TOOL_ITERATIONS
        } else {
            max
        };
        self
    }

    pub fn build(self) -> Result<Agent> {
        let provider = self.provider.context("agent provider is required")?;
        let model = self
            .model
            .filter(|m| !m.trim().is_empty())
            .context("agent model is required")?;
        let tool_specs = self.tools.iter().map(|t| t.spec()).collect();

        Ok(Agent {
            id: self.id.unwrap_or_else(|| "agent".to_string()),
            provider,
            model,
            temperature: self.temperature,
            system_prompt: self.system_prompt,
            tools: self.tools,
            tool_specs,
            max_tool_iterations: self.max_tool_iterations,
        })
    }
}

impl Default for AgentBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockProvider;
    use crate::tools::ToolResult;
    use async_trait::async_trait;
    use serde_json::json;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Echo the text back"
        }

        fn parameters_schema(&self) -> serde_json::Value {
            json!({"type": "object", "properties": {"text": {"type": "string"}}})
        }

        async fn execute(&self, args: serde_json::Value) -> anyhow::Result<ToolResult> {
            Ok(ToolResult::ok(format!(
                "echo: {}",
                args["text"].as_str().unwrap_or_default()
            )))
        }
    }

    fn agent_with(provider: Arc<MockProvider>, max_iterations: usize) -> Agent {
        Agent::builder()
            .id("test")
            .provider(provider)
            .model("gpt-4o-mini")
            .system_prompt("You are a test agent.")
            .tools(vec![Box::new(EchoTool)])
            .max_tool_iterations(max_iterations)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn answers_directly_without_tools() {
        let provider = Arc::new(MockProvider::new(|call| {
            assert_eq!(call.system_prompt().as_deref(), Some("You are a test agent."));
            assert_eq!(call.tool_names, vec!["echo".to_string()]);
            Ok(MockProvider::text("Onward!"))
        }));
        let agent = agent_with(provider.clone(), 5);

        let out = agent.run(&[ChatMessage::user("hi")]).await.unwrap();
        assert_eq!(out.response, "Onward!");
        assert_eq!(out.tool_calls_made, 0);
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn executes_requested_tool_then_answers() {
        let provider = Arc::new(MockProvider::new(|call| match call.last_tool_result() {
            None => Ok(MockProvider::tool_call("echo", json!({"text": "treasure"}))),
            Some(result) => Ok(MockProvider::text(&format!("Found {result}"))),
        }));
        let agent = agent_with(provider.clone(), 5);

        let out = agent.run(&[ChatMessage::user("find it")]).await.unwrap();
        assert_eq!(out.response, "Found echo: treasure");
        assert_eq!(out.tool_calls_made, 1);
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn unknown_tool_is_reported_to_model() {
        let provider = Arc::new(MockProvider::new(|call| match call.last_tool_result() {
            None => Ok(MockProvider::tool_call("teleport", json!({}))),
            Some(result) => Ok(MockProvider::text(&result)),
        }));
        let agent = agent_with(provider, 5);

        let out = agent.run(&[ChatMessage::user("go")]).await.unwrap();
        assert_eq!(out.response, "Error: unknown tool 'teleport'");
    }

    #[tokio::test]
    async fn invalid_arguments_are_reported_to_model() {
        let provider = Arc::new(MockProvider::new(|call| match call.last_tool_result() {
            None => Ok(crate::providers::ChatResponse {
                text: None,
                tool_calls: vec![ToolCall {
                    id: "c1".into(),
                    name: "echo".into(),
                    arguments: "{not json".into(),
                }],
                usage: None,
            }),
            Some(result) => Ok(MockProvider::text(&result)),
        }));
        let agent = agent_with(provider, 5);

        let out = agent.run(&[ChatMessage::user("go")]).await.unwrap();
        assert!(out.response.starts_with("Error: invalid arguments for 'echo'"));
    }

    #[tokio::test]
    async fn tool_loop_is_bounded() {
        let provider = Arc::new(MockProvider::new(|_| {
            Ok(MockProvider::tool_call("echo", json!({"text": "again"})))
        }));
        let agent = agent_with(provider.clone(), 3);

        let err = agent.run(&[ChatMessage::user("loop")]).await.unwrap_err();
        assert!(err.to_string().contains("exceeded 3 tool iterations"));
        assert_eq!(provider.call_count(), 3);
    }

    #[tokio::test]
    async fn provider_failure_propagates_with_agent_context() {
        let provider = Arc::new(MockProvider::new(|_| anyhow::bail!("503 from upstream")));
        let agent = agent_with(provider, 3);

        let err = agent.run(&[ChatMessage::user("hi")]).await.unwrap_err();
        assert!(err.to_string().contains("test agent model call failed"));
        assert!(format!("{err:#}").contains("503 from upstream"));
    }

    #[test]
    fn zero_iterations_fall_back_to_default() {
        let provider = Arc::new(MockProvider::new(|_| Ok(MockProvider::text("ok"))));
        let agent = agent_with(provider, 0);
        assert_eq!(agent.max_tool_iterations, DEFAULT_MAX_TOOL_ITERATIONS);
    }

    #[test]
    fn builder_requires_provider_and_model() {
        assert!(Agent::builder().model("m").build().is_err());
        let provider = Arc::new(MockProvider::new(|_| Ok(MockProvider::text("ok"))));
        assert!(Agent::builder().provider(provider).model("  ").build().is_err());
    }
}
