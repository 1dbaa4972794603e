//! Stepline - scheduled state-machine pipelines for batch ML jobs
//!
//! Main entry point for the stepline CLI.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;

use commands::{run, schedule, serve, validate};

// ─────────────────────────────────────────────────────────────────────────────
// CLI Structure
// ─────────────────────────────────────────────────────────────────────────────

/// Stepline - scheduled state-machine pipelines for batch ML jobs
#[derive(Parser)]
#[command(name = "stepline")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output as JSON (for scripting)
    #[arg(long, global = true)]
    pub json: bool,

    /// User config directory (default: platform config dir)
    #[arg(long, global = true, env = "STEPLINE_CONFIG_DIR")]
    pub config_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Load and validate pipeline definitions
    Validate(validate::ValidateArgs),

    /// Run one pipeline to completion
    Run(run::RunArgs),

    /// Show the next fire time of each configured trigger
    Schedule(schedule::ScheduleArgs),

    /// Register pipelines and run triggers until Ctrl-C
    Serve(serve::ServeArgs),
}

// ─────────────────────────────────────────────────────────────────────────────
// Main
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let loaded = stepline_config::load(cli.config_dir.as_deref());
    let config = loaded.config;

    // Console (human-readable) + optional rotating JSON file
    let filter = if cli.verbose {
        "stepline=debug,stepline_engine=debug,stepline_config=debug,info"
    } else {
        "stepline=info,stepline_engine=info,warn"
    };

    let logging = config.logging();
    let mut _guard = None;
    let file_layer = match logging.log_dir() {
        Some(log_dir) if logging.json => {
            let file_appender = tracing_appender::rolling::daily(&log_dir, "stepline.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            _guard = Some(guard);
            Some(non_blocking)
        }
        _ => None,
    };

    use tracing_subscriber::prelude::*;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr)
                .with_filter(tracing_subscriber::EnvFilter::new(filter)),
        )
        .with(file_layer.map(|writer| {
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(writer)
                .with_filter(tracing_subscriber::EnvFilter::new(
                    "stepline=trace,stepline_engine=trace,stepline_config=trace,info",
                ))
        }))
        .init();

    for path in &loaded.loaded {
        tracing::debug!("Config loaded from {}", path.display());
    }
    for warning in &loaded.warnings {
        tracing::warn!("{}", warning);
    }

    let ctx = commands::Context {
        config,
        json_output: cli.json,
        verbose: cli.verbose,
    };

    match cli.command {
        Commands::Validate(args) => validate::run(args, &ctx).await,
        Commands::Run(args) => run::run(args, &ctx).await,
        Commands::Schedule(args) => schedule::run(args, &ctx).await,
        Commands::Serve(args) => serve::run(args, &ctx).await,
    }
}
