//! Serve command - run configured triggers until interrupted.

use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::Args;
use console::Style;

use super::Context;

/// Arguments for the serve command.
#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Pipelines directory (overrides `[pipelines] dir`)
    #[arg(long)]
    pub dir: Option<PathBuf>,
}

/// Run the serve command.
pub async fn run(args: ServeArgs, ctx: &Context) -> Result<()> {
    let dir = ctx.pipelines_dir(args.dir.as_deref());
    let engine = ctx.engine_with_pipelines(&dir)?;
    let pipelines = engine.pipeline_names();
    if pipelines.is_empty() {
        bail!("no valid pipelines found in {}", dir.display());
    }

    let scheduler = ctx.scheduler(&engine)?;
    let triggers = scheduler.triggers().len();

    if !ctx.json_output {
        let dim = Style::new().dim();
        println!(
            "Serving {} pipelines with {} triggers {}",
            pipelines.len(),
            triggers,
            dim.apply_to("(Ctrl-C to stop)")
        );
    }

    let handle = scheduler.spawn();
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested");

    handle.stop().await;
    engine.shutdown().await;
    Ok(())
}
