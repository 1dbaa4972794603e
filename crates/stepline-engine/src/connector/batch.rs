//! Batch-job connector (`batch:startJobRun.sync`).
//!
//! Starts a named batch job with a flat map of string arguments and polls the
//! job run until it reports a terminal state. The job's own error message is
//! surfaced as the `ConnectorFailure` message on non-success.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{info, warn};

use super::{
    Connector, InvocationContext, JobLocks, PollStatus, ServiceError, parse_request,
    wait_for_terminal,
};
use crate::error::{ErrorKind, Failure};

pub const BATCH_CONNECTOR_KIND: &str = "batch:startJobRun.sync";

/// State of a batch job run as reported by the external service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobRunState {
    Starting,
    Running,
    Stopping,
    Succeeded,
    Failed,
    Stopped,
    Timeout,
}

impl JobRunState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobRunState::Succeeded | JobRunState::Failed | JobRunState::Stopped | JobRunState::Timeout
        )
    }
}

/// A job run snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRun {
    pub run_id: String,
    pub state: JobRunState,
    pub error_message: Option<String>,
    pub execution_time_secs: u64,
}

/// External batch-job API.
#[async_trait]
pub trait BatchJobService: Send + Sync {
    /// Start a run of `job_name`; returns the run id.
    async fn start_job_run(
        &self,
        job_name: &str,
        arguments: &BTreeMap<String, String>,
    ) -> Result<String, ServiceError>;

    async fn get_job_run(&self, job_name: &str, run_id: &str) -> Result<JobRun, ServiceError>;

    async fn stop_job_run(&self, job_name: &str, run_id: &str) -> Result<(), ServiceError>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct StartJobRunRequest {
    job_name: String,
    #[serde(default)]
    arguments: BTreeMap<String, String>,
}

/// Connector running batch jobs through a [`BatchJobService`].
pub struct BatchJobConnector {
    service: Arc<dyn BatchJobService>,
    locks: JobLocks,
    poll_interval: Duration,
}

impl BatchJobConnector {
    pub fn new(service: Arc<dyn BatchJobService>, locks: JobLocks, poll_interval: Duration) -> Self {
        Self {
            service,
            locks,
            poll_interval,
        }
    }

    async fn stop_quietly(&self, job_name: &str, run_id: &str) {
        if let Err(e) = self.service.stop_job_run(job_name, run_id).await {
            warn!(job = job_name, run_id, "failed to stop job run: {}", e);
        }
    }
}

#[async_trait]
impl Connector for BatchJobConnector {
    fn kind(&self) -> &str {
        BATCH_CONNECTOR_KIND
    }

    async fn invoke(&self, request: Value, ctx: &InvocationContext) -> Result<Value, Failure> {
        let request: StartJobRunRequest = parse_request(self.kind(), request)?;
        let _lease = self.locks.try_acquire(&request.job_name)?;

        let run_id = self
            .service
            .start_job_run(&request.job_name, &request.arguments)
            .await?;
        info!(
            execution_id = %ctx.execution_id,
            job = %request.job_name,
            %run_id,
            "batch job run started"
        );

        let service = self.service.clone();
        let job_name = request.job_name.as_str();
        let run_id_ref = run_id.as_str();
        let outcome = wait_for_terminal(ctx, self.poll_interval, || {
            let service = service.clone();
            async move {
                let run = service.get_job_run(job_name, run_id_ref).await?;
                Ok::<_, Failure>(if run.state.is_terminal() {
                    PollStatus::Done(run)
                } else {
                    PollStatus::Pending
                })
            }
        })
        .await;

        let run = match outcome {
            Ok(run) => run,
            Err(failure) => {
                if failure.kind == ErrorKind::Cancelled {
                    self.stop_quietly(job_name, &run_id).await;
                }
                return Err(failure);
            }
        };

        match run.state {
            JobRunState::Succeeded => {
                info!(job = job_name, %run_id, "batch job run succeeded");
                Ok(json!({
                    "jobName": job_name,
                    "jobRunId": run.run_id,
                    "jobRunState": run.state,
                    "executionTimeSecs": run.execution_time_secs,
                }))
            }
            JobRunState::Timeout => Err(Failure::timeout(run.error_message.unwrap_or_else(|| {
                format!("job '{}' run {} timed out", job_name, run_id)
            }))),
            state => Err(Failure::connector(run.error_message.unwrap_or_else(|| {
                format!("job '{}' run {} ended in state {:?}", job_name, run_id, state)
            }))),
        }
    }
}
