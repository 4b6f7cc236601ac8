//! Conduit CLI - Main entry point

mod cli;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Conduit - run an agentic coding task in an isolated sandbox
#[derive(Parser, Debug)]
#[command(name = "conduit")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Extra configuration file, applied over the global and project files
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level when RUST_LOG is not set
    #[arg(long, global = true, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a task and run it to completion
    Run {
        /// Instruction for the agent
        #[arg(short, long)]
        instruction: String,

        /// Requesting user id stored with the task
        #[arg(short, long, default_value = "local")]
        user: String,

        /// Sandbox image (overrides config)
        #[arg(long)]
        image: Option<String>,

        /// Task deadline in seconds (overrides config)
        #[arg(long)]
        timeout: Option<u64>,

        /// Print raw stream events as JSON lines
        #[arg(long)]
        events: bool,
    },
    /// Print a stored task record as JSON
    Show {
        /// Task id
        task_id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&args.log_level)),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let config = cli::load_config(args.config.as_deref())?;

    match args.command {
        Command::Run {
            instruction,
            user,
            image,
            timeout,
            events,
        } => {
            let options = cli::RunOptions {
                instruction,
                user,
                image,
                timeout_secs: timeout,
                print_events: events,
            };
            let phase = cli::run_task(config, options).await?;
            let code = cli::exit_code(&phase);
            if code != 0 {
                std::process::exit(code);
            }
        }
        Command::Show { task_id } => cli::show_task(&config, &task_id).await?,
    }

    Ok(())
}
