//! Lyncs CLI - inspect how call batches are scheduled.

mod config;
mod plan;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "lyncs")]
#[command(about = "Pooled script contexts and conflict-aware parallel calls")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the rounds and slots a batch of calls would be scheduled into
    Plan {
        /// Path to a JSON array of calls
        calls: PathBuf,

        /// Runtime configuration file (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Override the number of workers
        #[arg(short, long)]
        workers: Option<usize>,

        /// Override the maximum calls per slot
        #[arg(long)]
        capacity: Option<usize>,

        /// Print the plan as JSON
        #[arg(long)]
        json: bool,
    },

    /// Validate and print the effective runtime configuration
    Config {
        /// Runtime configuration file (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        tracing_subscriber::EnvFilter::from_default_env()
            .add_directive(tracing::Level::DEBUG.into())
    } else {
        tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Plan {
            calls,
            config,
            workers,
            capacity,
            json,
        } => {
            let config = config::resolve(config.as_deref(), workers, capacity)?;
            plan::execute(&calls, &config, json)?;
        }

        Commands::Config { config } => {
            let config = config::resolve(config.as_deref(), None, None)?;
            config::print(&config)?;
        }
    }

    Ok(())
}
