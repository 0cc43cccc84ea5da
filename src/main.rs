// Cerebra - confirmation-gated Jira/Confluence assistant
// Main entry point

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

use cerebra::cli::{tool_listing, Repl};
use cerebra::config::{load_config, load_config_from, Config};
use cerebra::errors::missing_credentials_error;
use cerebra::tools::Profile;
use cerebra::Orchestrator;
use tracing_subscriber::prelude::*;

#[derive(Parser, Debug)]
#[command(name = "cerebra")]
#[command(about = "Confirmation-gated Jira/Confluence requirements assistant", version)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Config file (default: ~/.cerebra/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Role profile, overrides the config file
    #[arg(long, global = true)]
    profile: Option<Profile>,

    /// Debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Parser, Debug)]
enum Command {
    /// Interactive session (default)
    Chat,
    /// List the tools enabled for the active profile
    Tools,
    /// Handle a single utterance; changes are previewed, never executed
    Ask {
        /// Utterance text
        utterance: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let mut config = match &args.config {
        Some(path) => {
            let mut config = load_config_from(path)?;
            cerebra::config::apply_env(&mut config, |name| std::env::var(name).ok());
            config
        }
        None => load_config()?,
    };
    if let Some(profile) = args.profile {
        config.profile = Some(profile);
    }

    match args.command.unwrap_or(Command::Chat) {
        Command::Chat => run_chat(&config).await,
        Command::Tools => {
            let orchestrator = Orchestrator::from_config(&config)?;
            println!("{}", tool_listing(&orchestrator));
            Ok(())
        }
        Command::Ask { utterance } => run_ask(&config, &utterance).await,
    }
}

async fn run_chat(config: &Config) -> Result<()> {
    for (service, variables) in config.missing_services() {
        eprintln!("{}", missing_credentials_error(service, variables));
    }
    let orchestrator =
        Orchestrator::from_config(config).context("Failed to set up the assistant")?;
    Repl::new(orchestrator).run().await
}

async fn run_ask(config: &Config, utterance: &str) -> Result<()> {
    let mut orchestrator =
        Orchestrator::from_config(config).context("Failed to set up the assistant")?;
    let response = orchestrator.handle(utterance).await;
    println!("{}", response.text);

    if response.awaiting_confirmation.is_some() {
        println!("\nNot executed: confirm changes in an interactive session (cerebra chat).");
    }
    orchestrator.end_session();
    Ok(())
}

/// Initialize tracing
///
/// Logs go to stderr so they never mix with responses on stdout.
fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // Bridge log crate → tracing (for dependencies using log crate)
    tracing_log::LogTracer::init().ok();
}
