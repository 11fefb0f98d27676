//! Compass CLI - ask questions about PCI DSS from the terminal
//!
//! The `compass` command drives the planning pipeline against a requirement
//! fixture or database and prints its progress as it streams.

mod commands;
mod config;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use commands::{ask, chat, parse, tool, tools};

/// Compass CLI - PCI DSS question answering
#[derive(Parser, Debug)]
#[command(
    name = "compass",
    author,
    version,
    about = "Compass - PCI DSS question answering",
    long_about = "Compass plans which requirement lookups a question needs, runs them, and streams an answer grounded in what they returned."
)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "warn", global = true)]
    log_level: String,

    /// Configuration file (defaults to ./compass.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// JSON requirement fixture (overrides the configured store)
    #[arg(short, long, global = true)]
    data: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Answer one question
    ///
    /// Streams materials and the answer as they are produced.
    Ask {
        /// The question
        message: String,

        /// Print raw events as newline-delimited JSON
        #[arg(long)]
        json: bool,
    },

    /// Interactive session
    ///
    /// Type `exit` or `quit` to leave. Ctrl-C stops the current answer.
    Chat,

    /// Run one tool directly and print its result envelope
    Tool {
        /// Tool name (e.g. get, search)
        name: String,

        /// Tool input as a JSON object
        #[arg(short, long, default_value = "{}")]
        input: String,
    },

    /// List the available tools
    Tools {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Parse planner output and print the resulting plan
    Parse {
        /// Planner text, e.g. `get: 8.3.6`
        text: String,
    },

    /// Print the effective configuration as TOML
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level)?;

    let config = config::load_config(args.config.as_deref(), args.data.as_deref())?;

    match args.command {
        Command::Ask { message, json } => ask::execute(&config, &message, json).await?,
        Command::Chat => chat::execute(&config).await?,
        Command::Tool { name, input } => tool::execute(&config, &name, &input).await?,
        Command::Tools { json } => tools::execute(&config, json)?,
        Command::Parse { text } => parse::execute(&config, &text)?,
        Command::Config => println!("{}", config::render(&config)?),
    }

    Ok(())
}

/// Installs the log subscriber. `RUST_LOG` wins over `--log-level` when set.
///
/// Logs go to stderr so `--json` output stays machine-readable.
fn init_logging(log_level: &str) -> anyhow::Result<()> {
    if std::env::var_os("RUST_LOG").is_some() {
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(EnvFilter::from_default_env())
            .without_time()
            .with_target(false)
            .with_writer(std::io::stderr)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
        return Ok(());
    }

    let level = match log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "error" => Level::ERROR,
        _ => Level::WARN,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .without_time()
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}
