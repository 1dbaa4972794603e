//! Validate command - load and check pipeline definitions.

use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::Args;
use console::Style;
use serde::Serialize;
use stepline_engine::{ConnectorRegistry, LoadEvent, PipelineDefinition, load_dir};

use super::Context;

/// Arguments for the validate command.
#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Definition files to validate (default: every file in the pipelines dir)
    pub files: Vec<PathBuf>,

    /// Pipelines directory (overrides `[pipelines] dir`)
    #[arg(long, conflicts_with = "files")]
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
struct ValidationOutput {
    path: String,
    pipeline: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    states: Option<usize>,
    error: Option<String>,
}

/// Run the validate command.
pub async fn run(args: ValidateArgs, ctx: &Context) -> Result<()> {
    let registry = ctx.registry();
    let results: Vec<ValidationOutput> = if args.files.is_empty() {
        let dir = ctx.pipelines_dir(args.dir.as_deref());
        load_dir(&dir)?
            .into_iter()
            .map(|event| check_event(event, &registry))
            .collect()
    } else {
        args.files
            .iter()
            .map(|path| {
                let event = match PipelineDefinition::from_file(path) {
                    Ok(definition) => LoadEvent::Loaded {
                        name: definition.name().to_string(),
                        path: path.clone(),
                        definition: Box::new(definition),
                    },
                    Err(e) => LoadEvent::Error {
                        path: path.clone(),
                        error: e.to_string(),
                    },
                };
                check_event(event, &registry)
            })
            .collect()
    };

    let failed = results.iter().filter(|r| r.error.is_some()).count();

    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(&results)?);
    } else {
        let green = Style::new().green();
        let red = Style::new().red();
        let dim = Style::new().dim();
        for result in &results {
            match (&result.pipeline, &result.error) {
                (Some(name), None) => {
                    println!(
                        "  {} {} {}",
                        green.apply_to("✓"),
                        name,
                        dim.apply_to(format!(
                            "({} states, {})",
                            result.states.unwrap_or_default(),
                            result.path
                        ))
                    );
                    if let Some(description) = &result.description {
                        println!("    {}", dim.apply_to(description));
                    }
                }
                (_, Some(error)) => {
                    println!("  {} {}", red.apply_to("✗"), result.path);
                    println!("    {}", red.apply_to(error));
                }
                (None, None) => {}
            }
        }
        if results.is_empty() {
            println!("{}", dim.apply_to("No pipeline files found"));
        }
    }

    if failed > 0 {
        bail!("{} of {} pipeline files are invalid", failed, results.len());
    }
    Ok(())
}

fn check_event(event: LoadEvent, registry: &ConnectorRegistry) -> ValidationOutput {
    match event {
        LoadEvent::Loaded {
            name,
            path,
            definition,
        } => {
            let unknown: Vec<&str> = definition
                .connector_kinds()
                .into_iter()
                .filter(|kind| !registry.contains(kind))
                .collect();
            let error = (!unknown.is_empty())
                .then(|| format!("unknown connector kinds: {}", unknown.join(", ")));
            let description =
                Some(definition.description().to_string()).filter(|d| !d.is_empty());
            ValidationOutput {
                path: path.display().to_string(),
                pipeline: Some(name),
                description,
                states: Some(definition.states().count()),
                error,
            }
        }
        LoadEvent::Error { path, error } => ValidationOutput {
            path: path.display().to_string(),
            pipeline: None,
            description: None,
            states: None,
            error: Some(error),
        },
    }
}
