//! In-process stand-ins for the external batch and ML job services.
//!
//! Every job "runs" for a fixed latency measured on the tokio clock, so tests
//! using paused time complete instantly. Jobs named in the failing set end in
//! a failed state with a message naming the job.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;
use uuid::Uuid;

use super::ServiceError;
use super::batch::{BatchJobService, JobRun, JobRunState};
use super::ml::{
    MlJobDescription, MlJobService, MlJobStatus, ModelRequest, TrainingJobRequest,
    TransformJobRequest,
};

#[derive(Debug)]
struct SimJob {
    name: String,
    started: Instant,
    stopped: bool,
}

impl SimJob {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            started: Instant::now(),
            stopped: false,
        }
    }

    fn finished(&self, latency: Duration) -> bool {
        self.started.elapsed() >= latency
    }
}

/// Simulated batch-job service.
#[derive(Debug, Default)]
pub struct SimulatedBatchService {
    latency: Duration,
    failing: HashSet<String>,
    runs: Mutex<HashMap<String, SimJob>>,
    submitted: Mutex<Vec<(String, BTreeMap<String, String>)>>,
    stopped: Mutex<Vec<String>>,
}

impl SimulatedBatchService {
    pub fn new(latency: Duration) -> Self {
        Self {
            latency,
            ..Default::default()
        }
    }

    /// Report runs of `job_name` as failed.
    pub fn with_failing_job(mut self, job_name: impl Into<String>) -> Self {
        self.failing.insert(job_name.into());
        self
    }

    pub fn with_failing_jobs<I, S>(mut self, job_names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.failing.extend(job_names.into_iter().map(Into::into));
        self
    }

    /// Job names and arguments of every started run, in submission order.
    pub fn submitted(&self) -> Vec<(String, BTreeMap<String, String>)> {
        self.submitted.lock().clone()
    }

    /// Job names of runs that were asked to stop.
    pub fn stopped(&self) -> Vec<String> {
        self.stopped.lock().clone()
    }
}

#[async_trait]
impl BatchJobService for SimulatedBatchService {
    async fn start_job_run(
        &self,
        job_name: &str,
        arguments: &BTreeMap<String, String>,
    ) -> Result<String, ServiceError> {
        let run_id = format!("jr_{}", Uuid::new_v4().simple());
        self.runs
            .lock()
            .insert(run_id.clone(), SimJob::new(job_name));
        self.submitted
            .lock()
            .push((job_name.to_string(), arguments.clone()));
        Ok(run_id)
    }

    async fn get_job_run(&self, job_name: &str, run_id: &str) -> Result<JobRun, ServiceError> {
        let runs = self.runs.lock();
        let run = runs
            .get(run_id)
            .filter(|r| r.name == job_name)
            .ok_or_else(|| ServiceError(format!("job '{}' has no run {}", job_name, run_id)))?;

        let elapsed = run.started.elapsed().as_secs();
        let (state, error_message) = if run.stopped {
            (JobRunState::Stopped, None)
        } else if !run.finished(self.latency) {
            (JobRunState::Running, None)
        } else if self.failing.contains(job_name) {
            (
                JobRunState::Failed,
                Some(format!("job '{}' failed: simulated job error", job_name)),
            )
        } else {
            (JobRunState::Succeeded, None)
        };

        Ok(JobRun {
            run_id: run_id.to_string(),
            state,
            error_message,
            execution_time_secs: elapsed,
        })
    }

    async fn stop_job_run(&self, job_name: &str, run_id: &str) -> Result<(), ServiceError> {
        let mut runs = self.runs.lock();
        let run = runs
            .get_mut(run_id)
            .ok_or_else(|| ServiceError(format!("job '{}' has no run {}", job_name, run_id)))?;
        run.stopped = true;
        self.stopped.lock().push(job_name.to_string());
        Ok(())
    }
}

#[derive(Debug)]
struct SimMlJob {
    job: SimJob,
    output: String,
}

/// Simulated ML-job service.
#[derive(Debug, Default)]
pub struct SimulatedMlService {
    latency: Duration,
    failing: HashSet<String>,
    training: Mutex<HashMap<String, SimMlJob>>,
    transforms: Mutex<HashMap<String, SimMlJob>>,
    models: Mutex<BTreeMap<String, ModelRequest>>,
    training_requests: Mutex<Vec<TrainingJobRequest>>,
    transform_requests: Mutex<Vec<TransformJobRequest>>,
    stopped: Mutex<Vec<String>>,
}

impl SimulatedMlService {
    pub fn new(latency: Duration) -> Self {
        Self {
            latency,
            ..Default::default()
        }
    }

    /// Report the training or transform job `job_name` as failed.
    pub fn with_failing_job(mut self, job_name: impl Into<String>) -> Self {
        self.failing.insert(job_name.into());
        self
    }

    pub fn with_failing_jobs<I, S>(mut self, job_names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.failing.extend(job_names.into_iter().map(Into::into));
        self
    }

    pub fn training_jobs(&self) -> Vec<TrainingJobRequest> {
        self.training_requests.lock().clone()
    }

    pub fn transform_jobs(&self) -> Vec<TransformJobRequest> {
        self.transform_requests.lock().clone()
    }

    pub fn model_names(&self) -> Vec<String> {
        self.models.lock().keys().cloned().collect()
    }

    pub fn stopped(&self) -> Vec<String> {
        self.stopped.lock().clone()
    }

    fn describe(
        &self,
        jobs: &Mutex<HashMap<String, SimMlJob>>,
        family: &str,
        name: &str,
    ) -> Result<MlJobDescription, ServiceError> {
        let jobs = jobs.lock();
        let job = jobs
            .get(name)
            .ok_or_else(|| ServiceError(format!("{} job '{}' not found", family, name)))?;

        let description = if job.job.stopped {
            MlJobDescription {
                status: MlJobStatus::Stopped,
                failure_reason: None,
                output: None,
                max_runtime_exceeded: false,
            }
        } else if !job.job.finished(self.latency) {
            MlJobDescription {
                status: MlJobStatus::InProgress,
                failure_reason: None,
                output: None,
                max_runtime_exceeded: false,
            }
        } else if self.failing.contains(name) {
            MlJobDescription {
                status: MlJobStatus::Failed,
                failure_reason: Some(format!(
                    "{} job '{}' failed: AlgorithmError: simulated failure",
                    family, name
                )),
                output: None,
                max_runtime_exceeded: false,
            }
        } else {
            MlJobDescription {
                status: MlJobStatus::Completed,
                failure_reason: None,
                output: Some(job.output.clone()),
                max_runtime_exceeded: false,
            }
        };
        Ok(description)
    }

    fn stop(
        &self,
        jobs: &Mutex<HashMap<String, SimMlJob>>,
        family: &str,
        name: &str,
    ) -> Result<(), ServiceError> {
        let mut jobs = jobs.lock();
        let job = jobs
            .get_mut(name)
            .ok_or_else(|| ServiceError(format!("{} job '{}' not found", family, name)))?;
        job.job.stopped = true;
        self.stopped.lock().push(name.to_string());
        Ok(())
    }
}

#[async_trait]
impl MlJobService for SimulatedMlService {
    async fn create_training_job(&self, request: &TrainingJobRequest) -> Result<(), ServiceError> {
        let name = &request.training_job_name;
        let output = format!(
            "{}/{}/output/model.tar.gz",
            request.output_path.trim_end_matches('/'),
            name
        );
        self.training.lock().insert(
            name.clone(),
            SimMlJob {
                job: SimJob::new(name),
                output,
            },
        );
        self.training_requests.lock().push(request.clone());
        Ok(())
    }

    async fn describe_training_job(&self, name: &str) -> Result<MlJobDescription, ServiceError> {
        self.describe(&self.training, "training", name)
    }

    async fn stop_training_job(&self, name: &str) -> Result<(), ServiceError> {
        self.stop(&self.training, "training", name)
    }

    async fn create_model(&self, request: &ModelRequest) -> Result<String, ServiceError> {
        let mut models = self.models.lock();
        if models.contains_key(&request.model_name) {
            return Err(ServiceError(format!(
                "model '{}' already exists",
                request.model_name
            )));
        }
        models.insert(request.model_name.clone(), request.clone());
        Ok(format!(
            "arn:sim:ml:local:000000000000:model/{}",
            request.model_name
        ))
    }

    async fn create_transform_job(
        &self,
        request: &TransformJobRequest,
    ) -> Result<(), ServiceError> {
        if !self.models.lock().contains_key(&request.model_name) {
            return Err(ServiceError(format!(
                "could not find model '{}'",
                request.model_name
            )));
        }
        let name = &request.transform_job_name;
        self.transforms.lock().insert(
            name.clone(),
            SimMlJob {
                job: SimJob::new(name),
                output: request.output_location.clone(),
            },
        );
        self.transform_requests.lock().push(request.clone());
        Ok(())
    }

    async fn describe_transform_job(&self, name: &str) -> Result<MlJobDescription, ServiceError> {
        self.describe(&self.transforms, "transform", name)
    }

    async fn stop_transform_job(&self, name: &str) -> Result<(), ServiceError> {
        self.stop(&self.transforms, "transform", name)
    }
}
