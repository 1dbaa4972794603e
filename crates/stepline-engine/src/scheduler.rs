//! Cron triggers for pipeline executions.
//!
//! Provides:
//! - Cron expression normalization (5-field, 6-field with seconds, aliases)
//! - [`Trigger`]: one schedule for one pipeline, enabled or disabled
//! - [`Scheduler`]: fires triggers against an [`Engine`], dropping a fire when
//!   the pipeline already has a running execution

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::engine::Engine;
use crate::error::EngineError;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can occur while configuring triggers.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// Invalid cron expression or alias.
    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),

    /// The trigger names a pipeline the engine does not know.
    #[error("pipeline {0} not registered with the engine")]
    PipelineNotFound(String),
}

// ---------------------------------------------------------------------------
// Schedule normalization
// ---------------------------------------------------------------------------

/// Normalize a schedule string to a 6-field cron expression.
///
/// Supported forms:
/// - 5-field cron (`"0 9 * * *"`), seconds prepended as `0`
/// - 6-field cron with seconds, returned as-is
/// - `"hourly"`, `"daily"`, `"weekly"`
pub fn normalize_schedule(input: &str) -> Result<String, SchedulerError> {
    let trimmed = input.trim();

    let parts: Vec<&str> = trimmed.split_whitespace().collect();
    if parts.len() == 5 {
        return Ok(format!("0 {trimmed}"));
    }
    if parts.len() == 6 {
        return Ok(trimmed.to_string());
    }

    match trimmed.to_lowercase().as_str() {
        "hourly" => Ok("0 0 * * * *".to_string()),
        "daily" => Ok("0 0 0 * * *".to_string()),
        "weekly" => Ok("0 0 0 * * SUN".to_string()),
        _ => Err(SchedulerError::InvalidSchedule(format!(
            "unrecognized schedule format: '{trimmed}'"
        ))),
    }
}

// ---------------------------------------------------------------------------
// Trigger
// ---------------------------------------------------------------------------

/// A cron schedule bound to one pipeline.
pub struct Trigger {
    pipeline: String,
    expression: String,
    cron: croner::Cron,
    enabled: bool,
}

impl Trigger {
    /// Parse `schedule` for `pipeline`.
    pub fn new(
        pipeline: impl Into<String>,
        schedule: &str,
        enabled: bool,
    ) -> Result<Self, SchedulerError> {
        let expression = normalize_schedule(schedule)?;
        let cron = expression
            .parse::<croner::Cron>()
            .map_err(|e| SchedulerError::InvalidSchedule(format!("'{}': {}", schedule, e)))?;
        Ok(Self {
            pipeline: pipeline.into(),
            expression,
            cron,
            enabled,
        })
    }

    pub fn pipeline(&self) -> &str {
        &self.pipeline
    }

    /// The normalized 6-field expression.
    pub fn expression(&self) -> &str {
        &self.expression
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// First fire time strictly after `after`.
    pub fn next_fire_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.cron.iter_after(after).next()
    }
}

impl std::fmt::Debug for Trigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Trigger")
            .field("pipeline", &self.pipeline)
            .field("expression", &self.expression)
            .field("enabled", &self.enabled)
            .finish()
    }
}

/// Result of firing a trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FireOutcome {
    /// A new execution was started.
    Started(String),
    /// The pipeline was already running; nothing was started.
    Dropped,
    /// The trigger is disabled; nothing was started.
    Disabled,
}

/// Next fire time of one trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpcomingFire {
    pub pipeline: String,
    pub expression: String,
    pub enabled: bool,
    pub next: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Fires cron triggers against an engine.
pub struct Scheduler {
    engine: Engine,
    triggers: Vec<Arc<Trigger>>,
}

impl Scheduler {
    pub fn new(engine: Engine) -> Self {
        Self {
            engine,
            triggers: Vec::new(),
        }
    }

    /// Add a trigger for a registered pipeline.
    pub fn add_trigger(&mut self, trigger: Trigger) -> Result<(), SchedulerError> {
        if !self.engine.has_pipeline(trigger.pipeline()) {
            return Err(SchedulerError::PipelineNotFound(trigger.pipeline.clone()));
        }
        info!(
            "Cron trigger registered: {} ({}{})",
            trigger.pipeline,
            trigger.expression,
            if trigger.enabled { "" } else { ", disabled" }
        );
        self.triggers.push(Arc::new(trigger));
        Ok(())
    }

    pub fn triggers(&self) -> &[Arc<Trigger>] {
        &self.triggers
    }

    /// Fire `trigger` once.
    ///
    /// A pipeline that is already running yields [`FireOutcome::Dropped`];
    /// other engine errors are returned to the caller.
    pub async fn fire(&self, trigger: &Trigger) -> Result<FireOutcome, EngineError> {
        fire(&self.engine, trigger).await
    }

    /// Next fire time of every trigger after `now`, disabled ones included.
    pub fn upcoming(&self, now: DateTime<Utc>) -> Vec<UpcomingFire> {
        self.triggers
            .iter()
            .map(|t| UpcomingFire {
                pipeline: t.pipeline.clone(),
                expression: t.expression.clone(),
                enabled: t.enabled,
                next: t.next_fire_after(now),
            })
            .collect()
    }

    /// Run one loop per trigger until the returned handle is stopped.
    pub fn spawn(self) -> SchedulerHandle {
        let cancel = CancellationToken::new();
        let tasks = self
            .triggers
            .iter()
            .map(|trigger| {
                tokio::spawn(run_trigger(
                    self.engine.clone(),
                    trigger.clone(),
                    cancel.clone(),
                ))
            })
            .collect();
        info!("Scheduler started with {} triggers", self.triggers.len());
        SchedulerHandle { cancel, tasks }
    }
}

async fn fire(engine: &Engine, trigger: &Trigger) -> Result<FireOutcome, EngineError> {
    if !trigger.enabled {
        debug!(pipeline = %trigger.pipeline, "trigger disabled; not firing");
        return Ok(FireOutcome::Disabled);
    }
    match engine.start_scheduled(&trigger.pipeline).await {
        Ok(id) => {
            info!(pipeline = %trigger.pipeline, execution_id = %id, "trigger fired");
            Ok(FireOutcome::Started(id))
        }
        Err(EngineError::ConcurrentRunRejected { pipeline, running }) => {
            warn!(
                pipeline = %pipeline,
                running = %running,
                "trigger dropped: pipeline already has a running execution"
            );
            Ok(FireOutcome::Dropped)
        }
        Err(e) => Err(e),
    }
}

async fn run_trigger(engine: Engine, trigger: Arc<Trigger>, cancel: CancellationToken) {
    let mut last_fire: Option<DateTime<Utc>> = None;
    loop {
        let now = Utc::now();
        let from = last_fire.map_or(now, |last| last.max(now));
        let Some(next) = trigger.next_fire_after(from) else {
            warn!(pipeline = %trigger.pipeline, "schedule has no upcoming fire time");
            return;
        };
        let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
        debug!(pipeline = %trigger.pipeline, %next, "next fire in {:?}", wait);

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(wait) => {}
        }
        last_fire = Some(next);

        if !trigger.enabled {
            debug!(pipeline = %trigger.pipeline, %next, "trigger disabled; skipping fire");
            continue;
        }
        if let Err(e) = fire(&engine, &trigger).await {
            warn!(pipeline = %trigger.pipeline, "trigger failed to start execution: {}", e);
        }
    }
}

/// Running scheduler; dropping it leaves the trigger loops running.
pub struct SchedulerHandle {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Stop every trigger loop. Executions already started keep running.
    pub async fn stop(self) {
        self.cancel.cancel();
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!("trigger loop ended abnormally: {}", e);
            }
        }
        info!("Scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_normalize_five_field() {
        assert_eq!(normalize_schedule("0 9 * * *").unwrap(), "0 0 9 * * *");
    }

    #[test]
    fn test_normalize_six_field_passthrough() {
        assert_eq!(normalize_schedule("*/30 * * * * *").unwrap(), "*/30 * * * * *");
    }

    #[test]
    fn test_normalize_aliases() {
        assert_eq!(normalize_schedule("hourly").unwrap(), "0 0 * * * *");
        assert_eq!(normalize_schedule("Daily").unwrap(), "0 0 0 * * *");
        assert_eq!(normalize_schedule("weekly").unwrap(), "0 0 0 * * SUN");
    }

    #[test]
    fn test_normalize_rejects_garbage() {
        assert!(matches!(
            normalize_schedule("every tuesday-ish"),
            Err(SchedulerError::InvalidSchedule(_))
        ));
    }

    #[test]
    fn test_trigger_rejects_bad_cron() {
        assert!(Trigger::new("p", "99 99 * * *", true).is_err());
    }

    #[test]
    fn test_next_fire_after() {
        let trigger = Trigger::new("p", "0 9 * * *", true).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 8, 30, 0).unwrap();
        assert_eq!(
            trigger.next_fire_after(now),
            Some(Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap())
        );
        let after_fire = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
        assert_eq!(
            trigger.next_fire_after(after_fire),
            Some(Utc.with_ymd_and_hms(2024, 3, 2, 9, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_disabled_trigger_still_computes() {
        let trigger = Trigger::new("p", "daily", false).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        assert!(!trigger.is_enabled());
        assert_eq!(
            trigger.next_fire_after(now),
            Some(Utc.with_ymd_and_hms(2024, 3, 2, 0, 0, 0).unwrap())
        );
    }
}
