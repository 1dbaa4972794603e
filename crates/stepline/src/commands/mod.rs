//! CLI command handlers.

pub mod run;
pub mod schedule;
pub mod serve;
pub mod validate;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context as _, Result};
use stepline_config::StepLineConfig;
use stepline_engine::{
    ConnectorRegistry, Engine, EngineConfig, InMemoryExecutionStore, LoadEvent, Scheduler,
    SimulatedBatchService, SimulatedMlService, Trigger, builtin_registry, load_dir,
};

/// Shared context for all commands.
#[derive(Debug, Clone)]
pub struct Context {
    /// Merged configuration layers.
    pub config: StepLineConfig,
    /// Output as JSON for scripting.
    pub json_output: bool,
    /// Verbose output enabled.
    pub verbose: bool,
}

impl Context {
    /// Pipeline directory, `override_dir` first.
    pub fn pipelines_dir(&self, override_dir: Option<&Path>) -> PathBuf {
        override_dir
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.config.pipelines().dir)
    }

    /// Engine wired to the simulated batch and ML services.
    pub fn build_engine(&self) -> Engine {
        let engine_section = self.config.engine();
        let config = EngineConfig {
            poll_interval: engine_section.poll_interval(),
            default_task_timeout: engine_section.default_task_timeout(),
            cancel_grace: engine_section.cancel_grace(),
        };
        Engine::new(
            self.registry(),
            Arc::new(InMemoryExecutionStore::new()),
            &config,
        )
    }

    /// Built-in connectors backed by the simulated services.
    pub fn registry(&self) -> ConnectorRegistry {
        let connectors = self.config.connectors();
        let batch = Arc::new(
            SimulatedBatchService::new(connectors.latency())
                .with_failing_jobs(connectors.fail_jobs.iter().cloned()),
        );
        let ml = Arc::new(
            SimulatedMlService::new(connectors.latency())
                .with_failing_jobs(connectors.fail_jobs.iter().cloned()),
        );
        builtin_registry(batch, ml, self.config.engine().poll_interval())
    }

    /// Engine with every valid pipeline in `dir` registered.
    ///
    /// Files that fail to load or register are logged and skipped.
    pub fn engine_with_pipelines(&self, dir: &Path) -> Result<Engine> {
        let engine = self.build_engine();
        let events = load_dir(dir)
            .with_context(|| format!("loading pipelines from {}", dir.display()))?;
        for event in events {
            match event {
                LoadEvent::Loaded {
                    name,
                    path,
                    definition,
                } => {
                    if let Err(e) = engine.register_pipeline(*definition) {
                        tracing::warn!("Skipping {} ({}): {}", name, path.display(), e);
                    }
                }
                LoadEvent::Error { path, error } => {
                    tracing::warn!("Skipping {}: {}", path.display(), error);
                }
            }
        }
        Ok(engine)
    }

    /// Scheduler with every configured trigger whose pipeline is registered.
    pub fn scheduler(&self, engine: &Engine) -> Result<Scheduler> {
        let mut scheduler = Scheduler::new(engine.clone());
        for trigger in &self.config.triggers {
            let parsed = Trigger::new(&trigger.pipeline, &trigger.cron, trigger.enabled)
                .with_context(|| format!("trigger for '{}'", trigger.pipeline))?;
            if let Err(e) = scheduler.add_trigger(parsed) {
                tracing::warn!("Skipping trigger: {}", e);
            }
        }
        Ok(scheduler)
    }
}
