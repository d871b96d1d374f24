#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::doc_markdown,
    clippy::missing_errors_doc,
    clippy::module_name_repetitions,
    clippy::needless_pass_by_value,
    clippy::similar_names,
    clippy::single_match_else,
    clippy::too_many_lines,
    clippy::uninlined_format_args
)]

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use explorer::config::{Config, CONFIG_DIR_ENV};
use explorer::util::redact;
use explorer::{gateway, providers, RouterWorkflow, WorkflowInput, WorkflowState};

/// `explorer` - weather, news and everything else, routed to the right agent.
#[derive(Parser, Debug)]
#[command(name = "explorer")]
#[command(version)]
#[command(about = "Multi-agent chat router for weather, news and general questions.", long_about = None)]
struct Cli {
    /// Directory holding config.toml and the workspace (default: ~/.explorer)
    #[arg(long, global = true)]
    config_dir: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Chat with the agents from the terminal
    #[command(long_about = "\
Chat with the agents from the terminal.

Each message goes through the router, the selected agents and, when \
more than one agent answered, the aggregator. Without --message an \
interactive session starts; type 'exit' to leave.

Examples:
  explorer chat
  explorer chat -m \"What's the weather in Lisbon?\"
  explorer chat --thread trip-planning")]
    Chat {
        /// Single message mode (don't enter interactive mode)
        #[arg(short, long)]
        message: Option<String>,

        /// Conversation thread for agent memory (interactive sessions get a fresh one)
        #[arg(long)]
        thread: Option<String>,
    },

    /// Start the HTTP gateway
    #[command(long_about = "\
Start the HTTP gateway.

Serves POST /api/chat, POST /api/chat/stream (SSE), GET /api/agents, \
GET|DELETE /api/sessions/{thread_id} and GET /health.

Examples:
  explorer gateway
  explorer gateway --port 8080
  explorer gateway --host 0.0.0.0   # needs gateway.allow_public_bind")]
    Gateway {
        /// Port to listen on (use 0 for random available port); defaults to config gateway.port
        #[arg(short, long)]
        port: Option<u16>,

        /// Host to bind to; defaults to config gateway.host
        #[arg(long)]
        host: Option<String>,
    },

    /// Show effective configuration (secrets redacted)
    Status,

    /// Manage configuration
    #[command(long_about = "\
Manage Explorer configuration.

Use 'schema' to dump the full JSON Schema for the config file, which \
documents every available key, type, and default value.

Examples:
  explorer config schema > schema.json")]
    Config {
        #[command(subcommand)]
        config_command: ConfigCommands,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Dump the full configuration JSON Schema to stdout
    Schema,
}

fn secret_status(value: Option<&str>) -> String {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        Some(v) => redact(v),
        None => "(not set)".to_string(),
    }
}

fn print_state(state: &WorkflowState, out: &mut impl Write) -> std::io::Result<()> {
    let agents: Vec<String> = state.agents().iter().map(ToString::to_string).collect();
    writeln!(out, "[{}]", agents.join(", "))?;
    writeln!(out, "{}", state.combined_output)?;
    out.flush()
}

async fn run_chat(config: Config, message: Option<String>, thread: Option<String>) -> Result<()> {
    let workflow = RouterWorkflow::from_config(&config).await?;

    if let Some(message) = message {
        let mut input = WorkflowInput::new(message);
        input.thread_id = thread;
        let state = workflow.invoke(input).await?;
        print_state(&state, &mut std::io::stdout().lock())?;
        return Ok(());
    }

    let thread = thread.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    info!(thread_id = %thread, "Interactive chat started");
    println!("Explorer ready. Type 'exit' to leave.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if matches!(line, "exit" | "quit" | "/exit" | "/quit") {
            break;
        }

        match workflow
            .invoke(WorkflowInput::new(line).with_thread(thread.clone()))
            .await
        {
            Ok(state) => print_state(&state, &mut std::io::stdout().lock())?,
            Err(e) => eprintln!("Error: {e}"),
        }
    }
    Ok(())
}

fn print_status(config: &Config) {
    println!("Explorer Status");
    println!();
    println!("Version:     {}", env!("CARGO_PKG_VERSION"));
    println!("Workspace:   {}", config.workspace_dir.display());
    println!("Config:      {}", config.config_path.display());
    println!();
    println!("Provider:    {}", config.effective_provider());
    println!("  Model:       {}", config.effective_model());
    println!("  Temperature: {}", config.default_temperature);
    println!("  API key:     {}", secret_status(config.api_key.as_deref()));
    println!(
        "  API URL:     {}",
        config.api_url.as_deref().unwrap_or("(default)")
    );
    println!(
        "  Available:   {}",
        providers::list_providers()
            .iter()
            .map(|p| format!("{} ({})", p.display_name, p.name))
            .collect::<Vec<_>>()
            .join(", ")
    );
    println!();
    println!("Router:");
    println!("  Multi-route:  {}", config.router.multi_route);
    println!("  Temperature:  {}", config.router.temperature);
    println!(
        "  Tool budget:  {} iterations",
        config.agent.max_tool_iterations
    );
    println!();
    println!("Tools:");
    println!(
        "  Weather: {} (key {}, units {})",
        config.tools.weather.base_url,
        secret_status(config.tools.weather.api_key.as_deref()),
        config.tools.weather.units
    );
    println!(
        "  News:    {} (key {}, {} articles)",
        config.tools.news.base_url,
        secret_status(config.tools.news.api_key.as_deref()),
        config.tools.news.page_size
    );
    println!();
    println!(
        "Sessions:    in-memory, {} messages replayed",
        config.sessions.max_history_messages
    );
    println!(
        "Gateway:     {}:{} (public bind {})",
        config.gateway.host,
        config.gateway.port,
        if config.gateway.allow_public_bind {
            "allowed"
        } else {
            "refused"
        }
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(config_dir) = &cli.config_dir {
        if config_dir.trim().is_empty() {
            bail!("--config-dir cannot be empty");
        }
        std::env::set_var(CONFIG_DIR_ENV, config_dir);
    }

    // Schema export is stdout-only and needs neither config nor logging.
    if let Commands::Config {
        config_command: ConfigCommands::Schema,
    } = &cli.command
    {
        let schema = schemars::schema_for!(Config);
        println!("{}", serde_json::to_string_pretty(&schema)?);
        return Ok(());
    }

    // Initialize logging - respects RUST_LOG env var, defaults to INFO
    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let config = Config::load_or_init().await?;

    match cli.command {
        Commands::Chat { message, thread } => run_chat(config, message, thread).await,

        Commands::Gateway { port, host } => {
            let port = port.unwrap_or(config.gateway.port);
            let host = host.unwrap_or_else(|| config.gateway.host.clone());
            if port == 0 {
                info!("Starting Explorer gateway on {host} (random port)");
            } else {
                info!("Starting Explorer gateway on {host}:{port}");
            }
            gateway::run_gateway(&host, port, config).await
        }

        Commands::Status => {
            print_status(&config);
            Ok(())
        }

        Commands::Config { .. } => Ok(()),
    }
}
