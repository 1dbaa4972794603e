//! ML-job connector: training jobs, model registration and batch transform.
//!
//! One [`MlJobConnector`] serves one [`MlOperation`]; register one per
//! operation, all sharing the same [`MlJobService`] and [`JobLocks`].
//!
//! | kind                          | operation                             |
//! |-------------------------------|---------------------------------------|
//! | `ml:createTrainingJob.sync`   | train, wait for completion or timeout |
//! | `ml:createModel`              | register a model from its artifacts   |
//! | `ml:createTransformJob.sync`  | batch-score with a named model        |

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

pub const TRAINING_CONNECTOR_KIND: &str = "ml:createTrainingJob.sync";
pub const CREATE_MODEL_CONNECTOR_KIND: &str = "ml:createModel";
pub const TRANSFORM_CONNECTOR_KIND: &str = "ml:createTransformJob.sync";

/// Compute sizing for a training or transform job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceConfig {
    pub instance_type: String,
    #[serde(default = "default_instance_count")]
    pub instance_count: u32,
    #[serde(default)]
    pub volume_size_gb: Option<u32>,
}

fn default_instance_count() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TrainingJobRequest {
    pub training_job_name: String,
    pub image: String,
    /// Channel name (e.g. `train`, `validation`) to S3 prefix.
    pub input_channels: BTreeMap<String, String>,
    pub output_path: String,
    pub resources: ResourceConfig,
    #[serde(default)]
    pub hyper_parameters: BTreeMap<String, String>,
    pub max_runtime_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ModelRequest {
    pub model_name: String,
    pub image: String,
    pub model_artifacts: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TransformJobRequest {
    pub transform_job_name: String,
    pub model_name: String,
    pub input_location: String,
    pub output_location: String,
    #[serde(default)]
    pub content_type: Option<String>,
    pub resources: ResourceConfig,
    #[serde(default)]
    pub max_runtime_seconds: Option<u64>,
}

/// Status of an ML job as reported by the external service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MlJobStatus {
    InProgress,
    Completed,
    Failed,
    Stopping,
    Stopped,
}

impl MlJobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            MlJobStatus::Completed | MlJobStatus::Failed | MlJobStatus::Stopped
        )
    }
}

/// Snapshot of a training or transform job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MlJobDescription {
    pub status: MlJobStatus,
    pub failure_reason: Option<String>,
    /// Model artifact location (training) or output location (transform).
    pub output: Option<String>,
    /// Set when the service stopped the job for exceeding its runtime bound.
    pub max_runtime_exceeded: bool,
}

/// External ML-job API.
#[async_trait]
pub trait MlJobService: Send + Sync {
    async fn create_training_job(&self, request: &TrainingJobRequest) -> Result<(), ServiceError>;
    async fn describe_training_job(&self, name: &str) -> Result<MlJobDescription, ServiceError>;
    async fn stop_training_job(&self, name: &str) -> Result<(), ServiceError>;

    /// Register a model; returns its ARN.
    async fn create_model(&self, request: &ModelRequest) -> Result<String, ServiceError>;

    async fn create_transform_job(&self, request: &TransformJobRequest)
    -> Result<(), ServiceError>;
    async fn describe_transform_job(&self, name: &str) -> Result<MlJobDescription, ServiceError>;
    async fn stop_transform_job(&self, name: &str) -> Result<(), ServiceError>;
}

/// Which ML operation a connector instance performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MlOperation {
    Train,
    CreateModel,
    Transform,
}

impl MlOperation {
    pub fn kind(&self) -> &'static str {
        match self {
            MlOperation::Train => TRAINING_CONNECTOR_KIND,
            MlOperation::CreateModel => CREATE_MODEL_CONNECTOR_KIND,
            MlOperation::Transform => TRANSFORM_CONNECTOR_KIND,
        }
    }
}

#[derive(Clone, Copy)]
enum JobFamily {
    Training,
    Transform,
}

/// Connector for one ML operation.
pub struct MlJobConnector {
    operation: MlOperation,
    service: Arc<dyn MlJobService>,
    locks: JobLocks,
    poll_interval: Duration,
}

impl MlJobConnector {
    pub fn new(
        operation: MlOperation,
        service: Arc<dyn MlJobService>,
        locks: JobLocks,
        poll_interval: Duration,
    ) -> Self {
        Self {
            operation,
            service,
            locks,
            poll_interval,
        }
    }

    /// One connector per operation, sharing `service` and `locks`.
    pub fn all(
        service: Arc<dyn MlJobService>,
        locks: JobLocks,
        poll_interval: Duration,
    ) -> Vec<MlJobConnector> {
        [
            MlOperation::Train,
            MlOperation::CreateModel,
            MlOperation::Transform,
        ]
        .into_iter()
        .map(|op| MlJobConnector::new(op, service.clone(), locks.clone(), poll_interval))
        .collect()
    }

    async fn train(&self, request: Value, ctx: &InvocationContext) -> Result<Value, Failure> {
        let request: TrainingJobRequest = parse_request(self.kind(), request)?;
        let name = request.training_job_name.clone();
        let _lease = self.locks.try_acquire(&name)?;

        self.service.create_training_job(&request).await?;
        info!(execution_id = %ctx.execution_id, job = %name, "training job started");

        let limit = Duration::from_secs(request.max_runtime_seconds);
        let job = self
            .await_job(JobFamily::Training, &name, Some(limit), ctx)
            .await?;
        let artifacts = job.output.unwrap_or_default();
        info!(job = %name, %artifacts, "training job completed");
        Ok(json!({
            "trainingJobName": name,
            "trainingJobStatus": job.status,
            "modelArtifacts": artifacts,
        }))
    }

    async fn create_model(&self, request: Value) -> Result<Value, Failure> {
        let request: ModelRequest = parse_request(self.kind(), request)?;
        let _lease = self.locks.try_acquire(&request.model_name)?;

        let arn = self.service.create_model(&request).await?;
        info!(model = %request.model_name, %arn, "model registered");
        Ok(json!({
            "modelName": request.model_name,
            "modelArn": arn,
        }))
    }

    async fn transform(&self, request: Value, ctx: &InvocationContext) -> Result<Value, Failure> {
        let request: TransformJobRequest = parse_request(self.kind(), request)?;
        let name = request.transform_job_name.clone();
        let _lease = self.locks.try_acquire(&name)?;

        self.service.create_transform_job(&request).await?;
        info!(
            execution_id = %ctx.execution_id,
            job = %name,
            model = %request.model_name,
            "transform job started"
        );

        let limit = request.max_runtime_seconds.map(Duration::from_secs);
        let job = self
            .await_job(JobFamily::Transform, &name, limit, ctx)
            .await?;
        Ok(json!({
            "transformJobName": name,
            "transformJobStatus": job.status,
            "outputLocation": job.output.unwrap_or(request.output_location),
        }))
    }

    /// Wait for a training or transform job, enforcing its runtime bound.
    async fn await_job(
        &self,
        family: JobFamily,
        name: &str,
        limit: Option<Duration>,
        ctx: &InvocationContext,
    ) -> Result<MlJobDescription, Failure> {
        let service = self.service.clone();
        let wait = wait_for_terminal(ctx, self.poll_interval, || {
            let service = service.clone();
            async move {
                let job = match family {
                    JobFamily::Training => service.describe_training_job(name).await?,
                    JobFamily::Transform => service.describe_transform_job(name).await?,
                };
                Ok::<_, Failure>(if job.status.is_terminal() {
                    PollStatus::Done(job)
                } else {
                    PollStatus::Pending
                })
            }
        });

        let outcome = match limit {
            Some(limit) => match tokio::time::timeout(limit, wait).await {
                Ok(outcome) => outcome,
                Err(_) => Err(Failure::timeout(format!(
                    "job '{}' exceeded its maximum runtime of {}s",
                    name,
                    limit.as_secs()
                ))),
            },
            None => wait.await,
        };

        let job = match outcome {
            Ok(job) => job,
            Err(failure) => {
                if matches!(failure.kind, ErrorKind::Cancelled | ErrorKind::Timeout) {
                    self.stop_quietly(family, name).await;
                }
                return Err(failure);
            }
        };

        match job.status {
            MlJobStatus::Completed => Ok(job),
            _ if job.max_runtime_exceeded => Err(Failure::timeout(
                job.failure_reason
                    .unwrap_or_else(|| format!("job '{}' exceeded its maximum runtime", name)),
            )),
            status => Err(Failure::connector(job.failure_reason.unwrap_or_else(|| {
                format!("job '{}' ended with status {:?}", name, status)
            }))),
        }
    }

    async fn stop_quietly(&self, family: JobFamily, name: &str) {
        let result = match family {
            JobFamily::Training => self.service.stop_training_job(name).await,
            JobFamily::Transform => self.service.stop_transform_job(name).await,
        };
        if let Err(e) = result {
            warn!(job = name, "failed to stop job: {}", e);
        }
    }
}

#[async_trait]
impl Connector for MlJobConnector {
    fn kind(&self) -> &str {
        self.operation.kind()
    }

    async fn invoke(&self, request: Value, ctx: &InvocationContext) -> Result<Value, Failure> {
        match self.operation {
            MlOperation::Train => self.train(request, ctx).await,
            MlOperation::CreateModel => self.create_model(request).await,
            MlOperation::Transform => self.transform(request, ctx).await,
        }
    }
}
