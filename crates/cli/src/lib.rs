pub mod commands;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use datapac_agent::AgentRuntime;
use datapac_backend::BackendClient;
use datapac_core::config::{AppConfig, LoadOptions, LogFormat};
use tracing_subscriber::EnvFilter;

use crate::commands::CommandResult;

#[derive(Debug, Parser)]
#[command(
    name = "datapac",
    about = "Data Pac conversational data assistant",
    long_about = "Ask business questions in natural language and get answers from the data warehouse, or talk to the data service directly.",
    after_help = "Examples:\n  datapac\n  datapac ask \"Mostre vendas por marca\"\n  datapac schema eatopia_all_orders orders_eatopia\n  datapac doctor --json"
)]
pub struct Cli {
    #[arg(long, global = true, help = "Path to a datapac.toml file")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Interactive question-and-answer session (default)")]
    Chat,
    #[command(about = "Answer a single question and exit")]
    Ask {
        #[arg(required = true, num_args = 1.., help = "The question, in natural language")]
        question: Vec<String>,
    },
    #[command(about = "Print the table catalog envelope as JSON")]
    Tables,
    #[command(about = "Print the schema envelope of a table as JSON")]
    Schema { dataset: String, table: String },
    #[command(about = "Execute an easy-query payload and print the result envelope")]
    Query {
        dataset: String,
        table: String,
        #[arg(long, help = "Payload JSON, or @path to read it from a file")]
        payload: String,
    },
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Check configuration, backend reachability and model readiness")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::Ask { .. } => "ask",
            Self::Tables => "tables",
            Self::Schema { .. } => "schema",
            Self::Query { .. } => "query",
            Self::Config => "config",
            Self::Doctor { .. } => "doctor",
        }
    }

    fn backend_only(&self) -> bool {
        matches!(self, Self::Tables | Self::Schema { .. } | Self::Query { .. })
    }
}

pub async fn run() -> ExitCode {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    let config_path = cli.config;
    let command = cli.command.unwrap_or(Command::Chat);

    let result = match command {
        Command::Config => {
            CommandResult { exit_code: 0, output: commands::config::run(config_path.as_deref()) }
        }
        Command::Doctor { json } => commands::doctor::run(json, config_path.as_deref()).await,
        command => run_with_config(command, config_path.as_deref()).await,
    };

    if !result.output.is_empty() {
        println!("{}", result.output);
    }
    ExitCode::from(result.exit_code)
}

async fn run_with_config(command: Command, config_path: Option<&Path>) -> CommandResult {
    let name = command.name();
    let options = LoadOptions {
        config_path: config_path.map(Path::to_path_buf),
        backend_only: command.backend_only(),
        ..LoadOptions::default()
    };
    let config = match AppConfig::load(options) {
        Ok(config) => config,
        Err(error) => return CommandResult::failure(name, "config_validation", error.to_string(), 2),
    };
    init_logging(&config);

    if command.backend_only() {
        let backend = match BackendClient::new(&config.backend) {
            Ok(backend) => backend,
            Err(error) => return CommandResult::failure(name, "backend_client", error.to_string(), 3),
        };
        return match command {
            Command::Schema { dataset, table } => commands::schema::run(&backend, &dataset, &table).await,
            Command::Query { dataset, table, payload } => {
                commands::query::run(&backend, &dataset, &table, &payload).await
            }
            _ => commands::tables::run(&backend).await,
        };
    }

    let runtime = match AgentRuntime::from_config(&config) {
        Ok(runtime) => runtime,
        Err(error) => return CommandResult::failure(name, "runtime_init", error.to_string(), 3),
    };
    tracing::info!(
        event_name = "cli.runtime.ready",
        correlation_id = %runtime.session().correlation_id(),
        strategy = runtime.strategy_name(),
        backend = %config.backend.base_url,
        "agent runtime ready"
    );

    match command {
        Command::Ask { question } => commands::ask::run(&runtime, &question.join(" ")).await,
        _ => commands::chat::run_stdio(&runtime).await,
    }
}

/// Logs go to stderr so answers on stdout stay clean. `RUST_LOG` wins over `logging.level`.
fn init_logging(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.trim().to_ascii_lowercase()));
    let builder = tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    let _ = match config.logging.format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}
