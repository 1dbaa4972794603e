//! Schedule command - show when each configured trigger fires next.

use std::path::PathBuf;

use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::Args;
use console::{Style, style};
use serde::Serialize;

use super::Context;

/// Arguments for the schedule command.
#[derive(Args, Debug)]
pub struct ScheduleArgs {
    /// Pipelines directory (overrides `[pipelines] dir`)
    #[arg(long)]
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
struct TriggerOutput {
    pipeline: String,
    expression: String,
    enabled: bool,
    next: Option<DateTime<Utc>>,
}

/// Run the schedule command.
pub async fn run(args: ScheduleArgs, ctx: &Context) -> Result<()> {
    let dir = ctx.pipelines_dir(args.dir.as_deref());
    let engine = ctx.engine_with_pipelines(&dir)?;
    let scheduler = ctx.scheduler(&engine)?;

    let upcoming: Vec<TriggerOutput> = scheduler
        .upcoming(Utc::now())
        .into_iter()
        .map(|fire| TriggerOutput {
            pipeline: fire.pipeline,
            expression: fire.expression,
            enabled: fire.enabled,
            next: fire.next,
        })
        .collect();

    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(&upcoming)?);
        return Ok(());
    }

    let dim = Style::new().dim();
    println!();
    println!("{}", style("Triggers").bold());
    println!("{}", dim.apply_to("─".repeat(40)));
    if upcoming.is_empty() {
        println!("  {}", dim.apply_to("No triggers configured"));
    }
    for fire in &upcoming {
        let next = match fire.next {
            Some(next) => next.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
            None => "never".to_string(),
        };
        let state = if fire.enabled {
            Style::new().green().apply_to("enabled")
        } else {
            Style::new().yellow().apply_to("disabled")
        };
        println!(
            "  {} {} {}",
            style(&fire.pipeline).cyan(),
            dim.apply_to(format!("[{}]", fire.expression)),
            state
        );
        println!("    {} {}", dim.apply_to("next:"), next);
    }
    println!();
    Ok(())
}
