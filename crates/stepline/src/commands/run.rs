//! Run command - execute one pipeline to completion.

use std::path::PathBuf;

use anyhow::{Context as _, Result, bail};
use clap::Args;
use console::{Style, style};
use serde_json::Value;
use stepline_engine::{Engine, ExecutionSnapshot, ExecutionStatus};

use super::Context;

/// Arguments for the run command.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Pipeline name
    pub pipeline: String,

    /// Initial context document (JSON object)
    #[arg(long)]
    pub context: Option<String>,

    /// Run each upstream pipeline first
    #[arg(long)]
    pub with_upstream: bool,

    /// Pipelines directory (overrides `[pipelines] dir`)
    #[arg(long)]
    pub dir: Option<PathBuf>,
}

/// Run the run command.
pub async fn run(args: RunArgs, ctx: &Context) -> Result<()> {
    let initial_context = args
        .context
        .as_deref()
        .map(serde_json::from_str::<Value>)
        .transpose()
        .context("--context is not valid JSON")?;

    let dir = ctx.pipelines_dir(args.dir.as_deref());
    let engine = ctx.engine_with_pipelines(&dir)?;
    let Some(definition) = engine.pipeline(&args.pipeline) else {
        bail!(
            "pipeline '{}' not found in {} (available: {})",
            args.pipeline,
            dir.display(),
            engine.pipeline_names().join(", ")
        );
    };

    let mut snapshots = Vec::new();
    if args.with_upstream {
        for upstream in definition.upstream() {
            let snapshot = run_once(&engine, upstream, None).await?;
            if !ctx.json_output {
                print_snapshot(&snapshot, ctx.verbose);
            }
            snapshots.push(snapshot);
        }
    }

    let snapshot = run_once(&engine, &args.pipeline, initial_context).await?;
    let status = snapshot.status;
    if ctx.json_output {
        snapshots.push(snapshot);
        let output = if snapshots.len() == 1 {
            serde_json::to_value(&snapshots[0])?
        } else {
            serde_json::to_value(&snapshots)?
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        print_snapshot(&snapshot, ctx.verbose);
    }

    engine.shutdown().await;
    if status != ExecutionStatus::Succeeded {
        bail!("pipeline '{}' ended {}", args.pipeline, status);
    }
    Ok(())
}

/// Start `pipeline` and wait for it; Ctrl-C cancels the execution.
async fn run_once(
    engine: &Engine,
    pipeline: &str,
    initial_context: Option<Value>,
) -> Result<ExecutionSnapshot> {
    let id = engine.start_execution(pipeline, initial_context).await?;
    tracing::info!("Running {} ({})", pipeline, id);

    tokio::select! {
        snapshot = engine.wait(&id) => Ok(snapshot?),
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("Interrupted; cancelling {}", id);
            engine.cancel_execution(&id)?;
            Ok(engine.wait(&id).await?)
        }
    }
}

fn print_snapshot(snapshot: &ExecutionSnapshot, verbose: bool) {
    let dim = Style::new().dim();
    let status = match snapshot.status {
        ExecutionStatus::Succeeded => Style::new().green().apply_to(snapshot.status),
        ExecutionStatus::Failed => Style::new().red().apply_to(snapshot.status),
        _ => Style::new().yellow().apply_to(snapshot.status),
    };

    println!();
    println!("{} {}", style(&snapshot.pipeline).bold(), status);
    println!("  {} {}", dim.apply_to("Execution:"), snapshot.id);
    println!("  {} {}", dim.apply_to("States:   "), snapshot.visited.join(" → "));
    if let Some(finished) = snapshot.finished_at {
        let elapsed = finished - snapshot.started_at;
        println!(
            "  {} {:.1}s",
            dim.apply_to("Duration: "),
            elapsed.num_milliseconds() as f64 / 1000.0
        );
    }
    if let Some(error) = &snapshot.error {
        println!(
            "  {} {}: {}",
            dim.apply_to("Error:    "),
            style(&error.error).red(),
            error.cause
        );
    }
    if verbose {
        println!();
        match serde_json::to_string_pretty(&snapshot.context) {
            Ok(context) => println!("{}", context),
            Err(e) => tracing::warn!("could not render context: {}", e),
        }
    }
    println!();
}
