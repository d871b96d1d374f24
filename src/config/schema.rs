use anyhow::{Context, Result};
use directories::UserDirs;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
#[cfg(unix)]
use tokio::fs::File;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

/// Environment variable that relocates the config directory (set by `--config-dir`).
pub const CONFIG_DIR_ENV: &str = "EXPLORER_CONFIG_DIR";

const DEFAULT_PROVIDER: &str = "openai";
const DEFAULT_MODEL: &str = "gpt-4o-mini";

// ── Top-level config ──────────────────────────────────────────────

/// Top-level Explorer configuration, loaded from `config.toml`.
///
/// Resolution order: `EXPLORER_CONFIG_DIR` env → `~/.explorer/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Config {
    /// Workspace directory - computed from the config dir, not serialized
    #[serde(skip)]
    pub workspace_dir: PathBuf,
    /// Path to config.toml - computed from the config dir, not serialized
    #[serde(skip)]
    pub config_path: PathBuf,
    /// API key for the model provider. Overridden by `EXPLORER_API_KEY` or `OPENAI_API_KEY`.
    pub api_key: Option<String>,
    /// Base URL override for the provider API (any OpenAI-compatible endpoint).
    pub api_url: Option<String>,
    /// Provider ID. Default: `"openai"`.
    pub default_provider: Option<String>,
    /// Model used by the router, every agent and the aggregator. Default: `"gpt-4o-mini"`.
    pub default_model: Option<String>,
    /// Agent and aggregator temperature (0.0–2.0). Default: `0.7`.
    pub default_temperature: f64,

    /// Router step settings (`[router]`).
    #[serde(default)]
    pub router: RouterConfig,

    /// Agent tool-loop settings (`[agent]`).
    #[serde(default)]
    pub agent: AgentConfig,

    /// External lookup tools (`[tools.weather]`, `[tools.news]`).
    #[serde(default)]
    pub tools: ToolsConfig,

    /// Conversational memory (`[sessions]`).
    #[serde(default)]
    pub sessions: SessionsConfig,

    /// HTTP gateway: host, port, limits (`[gateway]`).
    #[serde(default)]
    pub gateway: GatewayConfig,
}

/// Router step configuration (`[router]` section).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RouterConfig {
    /// Allow one message to fan out to several agents. When false, only the
    /// first category chosen by the router runs. Default: `true`.
    #[serde(default = "default_true")]
    pub multi_route: bool,
    /// Temperature for the classification call. Default: `0.0`.
    #[serde(default)]
    pub temperature: f64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            multi_route: true,
            temperature: 0.0,
        }
    }
}

/// Agent orchestration configuration (`[agent]` section).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AgentConfig {
    /// Maximum tool-call loop turns per agent run. Default: `10`.
    /// Setting to `0` falls back to the safe default of `10`.
    #[serde(default = "default_agent_max_tool_iterations")]
    pub max_tool_iterations: usize,
}

fn default_agent_max_tool_iterations() -> usize {
    10
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_tool_iterations: default_agent_max_tool_iterations(),
        }
    }
}

// ── Tools ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct ToolsConfig {
    #[serde(default)]
    pub weather: WeatherToolConfig,
    #[serde(default)]
    pub news: NewsToolConfig,
}

/// OpenWeatherMap lookup (`[tools.weather]`).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct WeatherToolConfig {
    /// OpenWeatherMap key. Overridden by `OPENWEATHER_API_KEY`.
    pub api_key: Option<String>,
    /// Default: `https://api.openweathermap.org/data/2.5`.
    #[serde(default = "default_weather_base_url")]
    pub base_url: String,
    /// `metric`, `imperial` or `standard`. Default: `metric`.
    #[serde(default = "default_weather_units")]
    pub units: String,
}

fn default_weather_base_url() -> String {
    "https://api.openweathermap.org/data/2.5".into()
}

fn default_weather_units() -> String {
    "metric".into()
}

impl Default for WeatherToolConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_weather_base_url(),
            units: default_weather_units(),
        }
    }
}

/// NewsAPI lookup (`[tools.news]`).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct NewsToolConfig {
    /// NewsAPI key. Overridden by `NEWS_API_KEY`.
    pub api_key: Option<String>,
    /// Default: `https://newsapi.org/v2`.
    #[serde(default = "default_news_base_url")]
    pub base_url: String,
    /// Articles fetched per lookup (1–100). Default: `3`.
    #[serde(default = "default_news_page_size")]
    pub page_size: u32,
}

fn default_news_base_url() -> String {
    "https://newsapi.org/v2".into()
}

fn default_news_page_size() -> u32 {
    3
}

impl Default for NewsToolConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_news_base_url(),
            page_size: default_news_page_size(),
        }
    }
}

// ── Sessions ────────────────────────────────────────────────────

/// Conversational memory (`[sessions]` section). In-memory only.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SessionsConfig {
    /// Transcript entries replayed to an agent per thread. `0` disables memory. Default: `50`.
    #[serde(default = "default_max_history_messages")]
    pub max_history_messages: usize,
}

fn default_max_history_messages() -> usize {
    50
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            max_history_messages: default_max_history_messages(),
        }
    }
}

// ── Gateway ─────────────────────────────────────────────────────

/// Gateway server configuration (`[gateway]` section).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct GatewayConfig {
    /// Gateway port (default: 3000)
    #[serde(default = "default_gateway_port")]
    pub port: u16,
    /// Gateway host (default: 127.0.0.1)
    #[serde(default = "default_gateway_host")]
    pub host: String,
    /// Allow binding to a non-loopback address (default: false)
    #[serde(default)]
    pub allow_public_bind: bool,
    /// Maximum request body size in bytes (default: 64 KiB)
    #[serde(default = "default_gateway_max_body_bytes")]
    pub max_body_bytes: usize,
    /// Per-request timeout covering the whole workflow (default: 120)
    #[serde(default = "default_gateway_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_gateway_port() -> u16 {
    3000
}

fn default_gateway_host() -> String {
    "127.0.0.1".into()
}

fn default_gateway_max_body_bytes() -> usize {
    64 * 1024
}

fn default_gateway_request_timeout_secs() -> u64 {
    120
}

fn default_true() -> bool {
    true
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_gateway_port(),
            host: default_gateway_host(),
            allow_public_bind: false,
            max_body_bytes: default_gateway_max_body_bytes(),
            request_timeout_secs: default_gateway_request_timeout_secs(),
        }
    }
}

// ── Config impl ──────────────────────────────────────────────────

impl Default for Config {
    fn default() -> Self {
        let explorer_dir = default_config_dir().unwrap_or_else(|_| PathBuf::from(".explorer"));

        Self {
            workspace_dir: explorer_dir.join("workspace"),
            config_path: explorer_dir.join("config.toml"),
            api_key: None,
            api_url: None,
            default_provider: Some(DEFAULT_PROVIDER.to_string()),
            default_model: Some(DEFAULT_MODEL.to_string()),
            default_temperature: 0.7,
            router: RouterConfig::default(),
            agent: AgentConfig::default(),
            tools: ToolsConfig::default(),
            sessions: SessionsConfig::default(),
            gateway: GatewayConfig::default(),
        }
    }
}

fn default_config_dir() -> Result<PathBuf> {
    let home = UserDirs::new()
        .map(|u| u.home_dir().to_path_buf())
        .context("Could not find home directory")?;
    Ok(home.join(".explorer"))
}

/// `EXPLORER_CONFIG_DIR` when set and non-blank, else `~/.explorer`.
fn resolve_config_dir() -> Result<PathBuf> {
    match std::env::var(CONFIG_DIR_ENV) {
        Ok(dir) if !dir.trim().is_empty() => Ok(PathBuf::from(dir.trim())),
        _ => default_config_dir(),
    }
}

fn is_valid_temperature(t: f64) -> bool {
    (0.0..=2.0).contains(&t)
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl Config {
    pub async fn load_or_init() -> Result<Self> {
        let explorer_dir = resolve_config_dir()?;
        Self::load_or_init_in(&explorer_dir).await
    }

    /// Load `config.toml` from `explorer_dir`, writing defaults on first run.
    pub async fn load_or_init_in(explorer_dir: &Path) -> Result<Self> {
        let config_path = explorer_dir.join("config.toml");
        let workspace_dir = explorer_dir.join("workspace");

        fs::create_dir_all(explorer_dir).await.with_context(|| {
            format!(
                "Failed to create config directory: {}",
                explorer_dir.display()
            )
        })?;
        fs::create_dir_all(&workspace_dir)
            .await
            .context("Failed to create workspace directory")?;

        let initialized = !config_path.exists();
        let mut config = if initialized {
            let mut config = Config::default();
            config.config_path = config_path.clone();
            config.workspace_dir = workspace_dir;
            config.save().await?;

            // Restrict permissions on newly created config file (may contain API keys)
            #[cfg(unix)]
            {
                use std::{fs::Permissions, os::unix::fs::PermissionsExt};
                let _ = fs::set_permissions(&config_path, Permissions::from_mode(0o600)).await;
            }
            config
        } else {
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                if let Ok(meta) = fs::metadata(&config_path).await {
                    if meta.permissions().mode() & 0o004 != 0 {
                        tracing::warn!(
                            "Config file {:?} is world-readable (mode {:o}). \
                             Consider restricting with: chmod 600 {:?}",
                            config_path,
                            meta.permissions().mode() & 0o777,
                            config_path,
                        );
                    }
                }
            }

            let contents = fs::read_to_string(&config_path)
                .await
                .context("Failed to read config file")?;
            let mut config: Config =
                toml::from_str(&contents).context("Failed to parse config file")?;
            config.config_path = config_path.clone();
            config.workspace_dir = workspace_dir;
            config
        };

        config.apply_env_overrides();
        config.validate()?;
        tracing::info!(
            path = %config.config_path.display(),
            workspace = %config.workspace_dir.display(),
            initialized,
            "Config loaded"
        );
        Ok(config)
    }

    pub fn effective_provider(&self) -> &str {
        self.default_provider
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .unwrap_or(DEFAULT_PROVIDER)
    }

    pub fn effective_model(&self) -> &str {
        self.default_model
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or(DEFAULT_MODEL)
    }

    /// Validate configuration values that would cause runtime failures.
    pub fn validate(&self) -> Result<()> {
        if self.gateway.host.trim().is_empty() {
            anyhow::bail!("gateway.host must not be empty");
        }
        if self.gateway.max_body_bytes == 0 {
            anyhow::bail!("gateway.max_body_bytes must be greater than 0");
        }
        if self.gateway.request_timeout_secs == 0 {
            anyhow::bail!("gateway.request_timeout_secs must be greater than 0");
        }
        if !is_valid_temperature(self.default_temperature) {
            anyhow::bail!(
                "default_temperature must be between 0.0 and 2.0 (got {})",
                self.default_temperature
            );
        }
        if !is_valid_temperature(self.router.temperature) {
            anyhow::bail!(
                "router.temperature must be between 0.0 and 2.0 (got {})",
                self.router.temperature
            );
        }
        if !(1..=100).contains(&self.tools.news.page_size) {
            anyhow::bail!(
                "tools.news.page_size must be between 1 and 100 (got {})",
                self.tools.news.page_size
            );
        }
        if !matches!(
            self.tools.weather.units.as_str(),
            "metric" | "imperial" | "standard"
        ) {
            anyhow::bail!(
                "tools.weather.units must be metric, imperial or standard (got {})",
                self.tools.weather.units
            );
        }
        Ok(())
    }

    /// Apply environment variable overrides to config
    pub fn apply_env_overrides(&mut self) {
        // API key: EXPLORER_API_KEY wins over the provider's own variable
        if let Some(key) = non_empty_env("EXPLORER_API_KEY").or_else(|| non_empty_env("OPENAI_API_KEY"))
        {
            self.api_key = Some(key);
        }

        if let Some(provider) = non_empty_env("EXPLORER_PROVIDER") {
            self.default_provider = Some(provider);
        }

        if let Some(model) = non_empty_env("EXPLORER_MODEL") {
            self.default_model = Some(model);
        }

        if let Some(temp_str) = non_empty_env("EXPLORER_TEMPERATURE") {
            match temp_str.parse::<f64>() {
                Ok(temp) if is_valid_temperature(temp) => self.default_temperature = temp,
                _ => tracing::warn!(
                    value = %temp_str,
                    "Ignoring invalid EXPLORER_TEMPERATURE (expected 0.0-2.0)"
                ),
            }
        }

        if let Some(key) = non_empty_env("OPENWEATHER_API_KEY") {
            self.tools.weather.api_key = Some(key);
        }

        if let Some(key) = non_empty_env("NEWS_API_KEY") {
            self.tools.news.api_key = Some(key);
        }

        // Gateway port: EXPLORER_GATEWAY_PORT or PORT
        if let Some(port_str) =
            non_empty_env("EXPLORER_GATEWAY_PORT").or_else(|| non_empty_env("PORT"))
        {
            if let Ok(port) = port_str.parse::<u16>() {
                self.gateway.port = port;
            }
        }

        // Gateway host: EXPLORER_GATEWAY_HOST or HOST
        if let Some(host) = non_empty_env("EXPLORER_GATEWAY_HOST").or_else(|| non_empty_env("HOST"))
        {
            self.gateway.host = host;
        }
    }

    pub async fn save(&self) -> Result<()> {
        let toml_str = toml::to_string_pretty(self).context("Failed to serialize config")?;

        let parent_dir = self
            .config_path
            .parent()
            .context("Config path must have a parent directory")?;

        fs::create_dir_all(parent_dir).await.with_context(|| {
            format!(
                "Failed to create config directory: {}",
                parent_dir.display()
            )
        })?;

        let file_name = self
            .config_path
            .file_name()
            .and_then(|v| v.to_str())
            .unwrap_or("config.toml");
        let temp_path = parent_dir.join(format!(".{file_name}.tmp-{}", uuid::Uuid::new_v4()));

        let mut temp_file = OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await
            .with_context(|| {
                format!(
                    "Failed to create temporary config file: {}",
                    temp_path.display()
                )
            })?;
        temp_file
            .write_all(toml_str.as_bytes())
            .await
            .context("Failed to write temporary config contents")?;
        temp_file
            .sync_all()
            .await
            .context("Failed to fsync temporary config file")?;
        drop(temp_file);

        if let Err(e) = fs::rename(&temp_path, &self.config_path).await {
            let _ = fs::remove_file(&temp_path).await;
            anyhow::bail!("Failed to atomically replace config file: {e}");
        }

        sync_directory(parent_dir).await
    }
}

async fn sync_directory(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        let dir = File::open(path)
            .await
            .with_context(|| format!("Failed to open directory for fsync: {}", path.display()))?;
        dir.sync_all()
            .await
            .with_context(|| format!("Failed to fsync directory metadata: {}", path.display()))?;
        Ok(())
    }

    #[cfg(not(unix))]
    {
        let _ = path;
        Ok(())
    }
}
