//! Configuration types mapping to the TOML schema.
//!
//! ```toml
//! [engine]                 # polling, timeouts, cancellation grace
//! [pipelines]              # definition directory
//! [[triggers]]             # one cron trigger per entry
//! [connectors]             # simulated job services
//! [logging]                # log directory and JSON file output
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{ConfigError, Result};

// ─────────────────────────────────────────────────────────────────────────────
// Top-level Config
// ─────────────────────────────────────────────────────────────────────────────

/// Root configuration structure.
///
/// All sections are optional so that partial configs (e.g. a project-local
/// `stepline.toml` that only adds triggers) can be loaded and merged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StepLineConfig {
    pub engine: Option<EngineSection>,
    pub pipelines: Option<PipelinesSection>,
    pub triggers: Vec<TriggerConfig>,
    pub connectors: Option<ConnectorsSection>,
    pub logging: Option<LoggingSection>,
}

impl StepLineConfig {
    /// Create an empty config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from a TOML string and validate.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: StepLineConfig = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Merge another config on top of this one (other takes priority).
    ///
    /// Sections are replaced whole. Triggers are keyed by pipeline: a trigger
    /// in `other` replaces one for the same pipeline, others are appended.
    pub fn merge(&mut self, other: StepLineConfig) {
        if other.engine.is_some() {
            self.engine = other.engine;
        }

        if other.pipelines.is_some() {
            self.pipelines = other.pipelines;
        }

        for trigger in other.triggers {
            match self
                .triggers
                .iter_mut()
                .find(|t| t.pipeline == trigger.pipeline)
            {
                Some(existing) => *existing = trigger,
                None => self.triggers.push(trigger),
            }
        }

        if other.connectors.is_some() {
            self.connectors = other.connectors;
        }

        if other.logging.is_some() {
            self.logging = other.logging;
        }
    }

    /// Reject values that parse but cannot be used.
    pub fn validate(&self) -> Result<()> {
        if let Some(engine) = &self.engine {
            if engine.poll_interval_ms == 0 {
                return Err(invalid("engine.poll_interval_ms", "must be greater than 0"));
            }
            if engine.default_task_timeout_secs == 0 {
                return Err(invalid(
                    "engine.default_task_timeout_secs",
                    "must be greater than 0",
                ));
            }
        }
        for (i, trigger) in self.triggers.iter().enumerate() {
            if trigger.pipeline.trim().is_empty() {
                return Err(invalid(&format!("triggers[{i}].pipeline"), "must not be empty"));
            }
            if trigger.cron.trim().is_empty() {
                return Err(invalid(&format!("triggers[{i}].cron"), "must not be empty"));
            }
        }
        Ok(())
    }

    /// Engine settings, defaults when the section is absent.
    pub fn engine(&self) -> EngineSection {
        self.engine.clone().unwrap_or_default()
    }

    pub fn pipelines(&self) -> PipelinesSection {
        self.pipelines.clone().unwrap_or_default()
    }

    pub fn connectors(&self) -> ConnectorsSection {
        self.connectors.clone().unwrap_or_default()
    }

    pub fn logging(&self) -> LoggingSection {
        self.logging.clone().unwrap_or_default()
    }
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Engine
// ─────────────────────────────────────────────────────────────────────────────

/// `[engine]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineSection {
    /// How often submit-and-wait connectors poll job status.
    pub poll_interval_ms: u64,
    /// Timeout for task states that declare none.
    pub default_task_timeout_secs: u64,
    /// How long a cancelled connector gets to stop its job.
    pub cancel_grace_secs: u64,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            poll_interval_ms: 5_000,
            default_task_timeout_secs: 86_400,
            cancel_grace_secs: 30,
        }
    }
}

impl EngineSection {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn default_task_timeout(&self) -> Duration {
        Duration::from_secs(self.default_task_timeout_secs)
    }

    pub fn cancel_grace(&self) -> Duration {
        Duration::from_secs(self.cancel_grace_secs)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Pipelines
// ─────────────────────────────────────────────────────────────────────────────

/// `[pipelines]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelinesSection {
    /// Directory of `*.json` / `*.toml` pipeline definitions.
    pub dir: PathBuf,
}

impl Default for PipelinesSection {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("pipelines"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Triggers
// ─────────────────────────────────────────────────────────────────────────────

/// One `[[triggers]]` entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TriggerConfig {
    pub pipeline: String,
    /// 5- or 6-field cron expression, or `hourly` / `daily` / `weekly`.
    pub cron: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

// ─────────────────────────────────────────────────────────────────────────────
// Connectors
// ─────────────────────────────────────────────────────────────────────────────

/// `[connectors]` section, driving the simulated job services.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConnectorsSection {
    /// How long a simulated job runs before finishing.
    pub latency_ms: u64,
    /// Job names the simulated services report as failed.
    pub fail_jobs: Vec<String>,
}

impl Default for ConnectorsSection {
    fn default() -> Self {
        Self {
            latency_ms: 2_000,
            fail_jobs: Vec::new(),
        }
    }
}

impl ConnectorsSection {
    pub fn latency(&self) -> Duration {
        Duration::from_millis(self.latency_ms)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Logging
// ─────────────────────────────────────────────────────────────────────────────

/// `[logging]` section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingSection {
    /// Log directory; the platform data dir is used when unset.
    pub dir: Option<PathBuf>,
    /// Write JSON logs to daily rolling files.
    pub json: bool,
}

impl LoggingSection {
    /// Resolved log directory.
    pub fn log_dir(&self) -> Option<PathBuf> {
        self.dir
            .clone()
            .or_else(|| dirs::data_local_dir().map(|d| d.join("stepline").join("logs")))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
