//! Task connector framework.
//!
//! This module defines the [`Connector`] trait that every task integration
//! implements, the [`ConnectorRegistry`] the interpreter dispatches through, and
//! [`JobLocks`], the shared table enforcing at most one in-flight invocation per
//! external job name.
//!
//! Every invocation is submit-and-wait: `invoke` returns only once the external
//! job has reached a terminal state (or the invocation was cancelled).

pub mod batch;
pub mod ml;
pub mod simulated;

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::Failure;

pub use batch::{BatchJobConnector, BatchJobService, JobRun, JobRunState};
pub use ml::{
    MlJobConnector, MlJobDescription, MlJobService, MlJobStatus, MlOperation, ModelRequest,
    ResourceConfig, TrainingJobRequest, TransformJobRequest,
};
pub use simulated::{SimulatedBatchService, SimulatedMlService};

/// Error returned by an external job service API.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct ServiceError(pub String);

impl From<ServiceError> for Failure {
    fn from(err: ServiceError) -> Self {
        Failure::connector(err.0)
    }
}

/// Context handed to a connector for one invocation.
#[derive(Debug, Clone)]
pub struct InvocationContext {
    pub execution_id: String,
    pub state_name: String,
    /// Cancelled when the execution is cancelled or the task times out.
    pub cancellation: CancellationToken,
}

impl InvocationContext {
    pub fn new(execution_id: impl Into<String>, state_name: impl Into<String>) -> Self {
        Self {
            execution_id: execution_id.into(),
            state_name: state_name.into(),
            cancellation: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = cancellation;
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

/// A pluggable integration that runs one external job to completion.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connector kind referenced by task states (e.g. `batch:startJobRun.sync`).
    fn kind(&self) -> &str;

    /// Submit the job described by `request` and wait until it is terminal.
    async fn invoke(&self, request: Value, ctx: &InvocationContext) -> Result<Value, Failure>;
}

/// Registry of connectors keyed by kind.
#[derive(Default, Clone)]
pub struct ConnectorRegistry {
    connectors: HashMap<String, Arc<dyn Connector>>,
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connector. A connector with the same kind is replaced.
    pub fn register<C: Connector + 'static>(&mut self, connector: C) {
        self.register_arc(Arc::new(connector));
    }

    pub fn register_arc(&mut self, connector: Arc<dyn Connector>) {
        let kind = connector.kind().to_string();
        self.connectors.insert(kind, connector);
    }

    pub fn get(&self, kind: &str) -> Option<Arc<dyn Connector>> {
        self.connectors.get(kind).cloned()
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.connectors.contains_key(kind)
    }

    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.connectors.keys().map(|s| s.as_str()).collect();
        kinds.sort_unstable();
        kinds
    }

    pub fn len(&self) -> usize {
        self.connectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connectors.is_empty()
    }
}

impl std::fmt::Debug for ConnectorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectorRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

/// Registry holding every built-in connector over `batch` and `ml`.
///
/// All connectors share one [`JobLocks`] table, so a job name is exclusive
/// across connector kinds.
pub fn builtin_registry(
    batch: Arc<dyn BatchJobService>,
    ml: Arc<dyn MlJobService>,
    poll_interval: Duration,
) -> ConnectorRegistry {
    let locks = JobLocks::new();
    let mut registry = ConnectorRegistry::new();
    registry.register(BatchJobConnector::new(batch, locks.clone(), poll_interval));
    for connector in MlJobConnector::all(ml, locks, poll_interval) {
        registry.register(connector);
    }
    registry
}

/// Shared table of job names with an invocation in flight.
#[derive(Debug, Clone, Default)]
pub struct JobLocks {
    held: Arc<Mutex<HashSet<String>>>,
}

impl JobLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `job_name`, failing fast if another invocation holds it.
    pub fn try_acquire(&self, job_name: &str) -> Result<JobLease, Failure> {
        let mut held = self.held.lock();
        if !held.insert(job_name.to_string()) {
            return Err(Failure::concurrent_run(format!(
                "job '{}' already has an invocation in flight",
                job_name
            )));
        }
        Ok(JobLease {
            job_name: job_name.to_string(),
            held: self.held.clone(),
        })
    }

    pub fn is_held(&self, job_name: &str) -> bool {
        self.held.lock().contains(job_name)
    }
}

/// Claim on a job name; released on drop.
#[derive(Debug)]
pub struct JobLease {
    job_name: String,
    held: Arc<Mutex<HashSet<String>>>,
}

impl Drop for JobLease {
    fn drop(&mut self) {
        self.held.lock().remove(&self.job_name);
    }
}

/// Outcome of one status check while waiting on an external job.
#[derive(Debug)]
pub enum PollStatus<T> {
    Pending,
    Done(T),
}

/// Poll `check` every `interval` until it reports `Done`, fails, or `ctx` is cancelled.
///
/// Cancellation returns a `Cancelled` failure; the caller is responsible for
/// asking the external service to stop the job.
pub async fn wait_for_terminal<T, F, Fut>(
    ctx: &InvocationContext,
    interval: Duration,
    mut check: F,
) -> Result<T, Failure>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<PollStatus<T>, Failure>>,
{
    loop {
        if ctx.is_cancelled() {
            return Err(Failure::cancelled("invocation cancelled"));
        }
        match check().await? {
            PollStatus::Done(value) => return Ok(value),
            PollStatus::Pending => {
                debug!(state = %ctx.state_name, "job still running; next poll in {:?}", interval);
            }
        }
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = ctx.cancellation.cancelled() => {
                return Err(Failure::cancelled("invocation cancelled"));
            }
        }
    }
}

/// Deserialize a resolved request into a connector's typed request.
pub(crate) fn parse_request<T: DeserializeOwned>(kind: &str, request: Value) -> Result<T, Failure> {
    serde_json::from_value(request)
        .map_err(|e| Failure::connector(format!("invalid {} request: {}", kind, e)))
}
