//! Execution records.
//!
//! An [`Execution`] is owned by the interpreter while it runs; everything else
//! observes it through [`ExecutionSnapshot`]s.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::context::{ContextDocument, ExecutionMeta};
use crate::error::{ErrorKind, TerminalError};

/// Lifecycle of an execution: `NotStarted → Running → {Succeeded, Failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExecutionStatus {
    NotStarted,
    Running,
    Succeeded,
    Failed,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecutionStatus::Succeeded | ExecutionStatus::Failed)
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExecutionStatus::NotStarted => "NotStarted",
            ExecutionStatus::Running => "Running",
            ExecutionStatus::Succeeded => "Succeeded",
            ExecutionStatus::Failed => "Failed",
        };
        f.write_str(s)
    }
}

/// What started an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionOrigin {
    #[default]
    Manual,
    Schedule,
}

/// One run of a pipeline.
#[derive(Debug, Clone)]
pub struct Execution {
    pub(crate) meta: ExecutionMeta,
    pub(crate) origin: ExecutionOrigin,
    pub(crate) status: ExecutionStatus,
    pub(crate) current_state: Option<String>,
    pub(crate) context: ContextDocument,
    pub(crate) error: Option<TerminalError>,
    pub(crate) visited: Vec<String>,
    pub(crate) finished_at: Option<DateTime<Utc>>,
}

impl Execution {
    /// New execution of `pipeline` with a generated id.
    pub fn new(pipeline: impl Into<String>, context: ContextDocument) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), pipeline, context)
    }

    pub fn with_id(
        id: impl Into<String>,
        pipeline: impl Into<String>,
        context: ContextDocument,
    ) -> Self {
        Self {
            meta: ExecutionMeta::new(id, pipeline),
            origin: ExecutionOrigin::Manual,
            status: ExecutionStatus::NotStarted,
            current_state: None,
            context,
            error: None,
            visited: Vec::new(),
            finished_at: None,
        }
    }

    pub fn with_origin(mut self, origin: ExecutionOrigin) -> Self {
        self.origin = origin;
        self
    }

    /// Seed `$$.upstream` with final contexts of upstream pipelines.
    pub fn with_upstream(mut self, upstream: Map<String, Value>) -> Self {
        self.meta.upstream = upstream;
        self
    }

    pub fn id(&self) -> &str {
        &self.meta.execution_id
    }

    pub fn pipeline(&self) -> &str {
        &self.meta.pipeline_name
    }

    pub fn meta(&self) -> &ExecutionMeta {
        &self.meta
    }

    pub fn status(&self) -> ExecutionStatus {
        self.status
    }

    pub fn current_state(&self) -> Option<&str> {
        self.current_state.as_deref()
    }

    pub fn context(&self) -> &ContextDocument {
        &self.context
    }

    pub fn error(&self) -> Option<&TerminalError> {
        self.error.as_ref()
    }

    /// State names in the order they were entered.
    pub fn visited(&self) -> &[String] {
        &self.visited
    }

    pub(crate) fn enter(&mut self, state: &str) {
        self.current_state = Some(state.to_string());
        self.visited.push(state.to_string());
    }

    pub(crate) fn succeed(&mut self) {
        self.status = ExecutionStatus::Succeeded;
        self.finished_at = Some(Utc::now());
    }

    pub(crate) fn fail(&mut self, error: TerminalError) {
        self.status = ExecutionStatus::Failed;
        self.error = Some(error);
        self.finished_at = Some(Utc::now());
    }

    pub fn snapshot(&self) -> ExecutionSnapshot {
        ExecutionSnapshot {
            id: self.meta.execution_id.clone(),
            pipeline: self.meta.pipeline_name.clone(),
            origin: self.origin,
            status: self.status,
            started_at: self.meta.start_time,
            finished_at: self.finished_at,
            current_state: self.current_state.clone(),
            context: self.context.as_value().clone(),
            error: self.error.clone(),
            visited: self.visited.clone(),
        }
    }
}

/// Point-in-time, read-only view of an execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionSnapshot {
    pub id: String,
    pub pipeline: String,
    pub origin: ExecutionOrigin,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_state: Option<String>,
    pub context: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TerminalError>,
    #[serde(default)]
    pub visited: Vec<String>,
}

impl ExecutionSnapshot {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Runtime failure kind behind the terminal error, if any.
    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().and_then(TerminalError::kind)
    }
}
