#[allow(clippy::module_inception)]
pub mod agent;
pub mod prompt;

pub use agent::{Agent, AgentBuilder, AgentRunOutput};

use crate::config::Config;
use crate::providers::Provider;
use crate::routing::Category;
use std::sync::Arc;

/// Build the pre-configured agent for `category`.
pub fn create_agent(
    category: Category,
    config: &Config,
    provider: Arc<dyn Provider>,
    personality: &str,
) -> anyhow::Result<Agent> {
    Agent::builder()
        .id(category.agent_id())
        .provider(provider)
        .model(config.effective_model())
        .temperature(config.default_temperature)
        .system_prompt(prompt::system_prompt(category, personality))
        .tools(crate::tools::tools_for(category, &config.tools))
        .max_tool_iterations(config.agent.max_tool_iterations)
        .build()
}
