pub mod schema;

#[allow(unused_imports)]
pub use schema::{
    AgentConfig, Config, GatewayConfig, NewsToolConfig, RouterConfig, SessionsConfig, ToolsConfig,
    WeatherToolConfig, CONFIG_DIR_ENV,
};
