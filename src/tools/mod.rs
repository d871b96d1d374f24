//! Tool subsystem for agent-callable lookups.
//!
//! Each tool implements the [`Tool`] trait defined in [`traits`]: a name, a
//! description, a JSON parameter schema, and an async `execute` returning a
//! [`ToolResult`]. Lookup failures never abort an agent; they come back as a
//! degraded result whose text the model relays to the user.
//!
//! Tools are bound to agents by [`tools_for`]: the weather agent gets
//! `get_weather`, the news agent gets `get_news`, the general agent gets none.

pub mod news;
pub mod traits;
pub mod weather;

pub use news::NewsTool;
pub use traits::Tool;
#[allow(unused_imports)]
pub use traits::{ToolResult, ToolSpec};
pub use weather::WeatherTool;

use crate::config::ToolsConfig;
use crate::routing::Category;

/// Build the tool set for the agent serving `category`.
pub fn tools_for(category: Category, config: &ToolsConfig) -> Vec<Box<dyn Tool>> {
    match category {
        Category::Weather => vec![Box::new(WeatherTool::new(&config.weather))],
        Category::News => vec![Box::new(NewsTool::new(&config.news))],
        Category::General => Vec::new(),
    }
}
