//! Pipeline engine.
//!
//! Provides [`Engine`], which owns registered pipeline definitions, the
//! interpreter, the execution store and the table of in-flight executions.
//! Each execution runs on its own tokio task; at most one execution per
//! pipeline is in flight at any time.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::connector::ConnectorRegistry;
use crate::context::ContextDocument;
use crate::definition::PipelineDefinition;
use crate::error::{EngineError, Failure, Result, TerminalError};
use crate::execution::{Execution, ExecutionOrigin, ExecutionSnapshot, ExecutionStatus};
use crate::interpreter::{Interpreter, InterpreterSettings};
use crate::store::ExecutionStore;

/// Configuration for the engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How often connectors poll external jobs.
    pub poll_interval: Duration,

    /// Timeout for task states without `timeoutSeconds`.
    pub default_task_timeout: Duration,

    /// Grace period granted to a cancelled connector.
    pub cancel_grace: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            default_task_timeout: Duration::from_secs(86_400),
            cancel_grace: Duration::from_secs(30),
        }
    }
}

impl EngineConfig {
    fn interpreter_settings(&self) -> InterpreterSettings {
        InterpreterSettings {
            default_task_timeout: self.default_task_timeout,
            cancel_grace: self.cancel_grace,
        }
    }
}

struct RunningExecution {
    id: String,
    snapshot: ExecutionSnapshot,
    cancel: CancellationToken,
    done: watch::Receiver<Option<ExecutionSnapshot>>,
}

/// Owns a pipeline's running entry for the lifetime of `drive`.
///
/// If `drive` unwinds before `finish`, the entry is still released and the
/// last observed snapshot is recorded as failed, so waiters wake up and the
/// pipeline accepts new executions.
struct RunningGuard {
    inner: Arc<EngineInner>,
    pipeline: String,
    id: String,
    done: watch::Sender<Option<ExecutionSnapshot>>,
    finished: bool,
}

impl RunningGuard {
    fn finish(&mut self, snapshot: ExecutionSnapshot) {
        self.finished = true;
        self.record(snapshot);
    }

    /// Store `snapshot`, drop the running entry, then wake waiters.
    fn record(&self, snapshot: ExecutionSnapshot) {
        if let Err(e) = self.inner.store.save(&snapshot) {
            warn!(execution_id = %snapshot.id, "failed to store execution: {}", e);
        }
        self.release();
        self.done.send_replace(Some(snapshot));
    }

    fn release(&self) -> Option<RunningExecution> {
        let mut running = self.inner.running.lock();
        match running.get(&self.pipeline) {
            Some(entry) if entry.id == self.id => running.remove(&self.pipeline),
            _ => None,
        }
    }
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        error!(
            execution_id = %self.id,
            pipeline = %self.pipeline,
            "execution aborted before reaching a terminal state"
        );
        let Some(entry) = self.release() else {
            return;
        };
        let mut snapshot = entry.snapshot;
        snapshot.status = ExecutionStatus::Failed;
        snapshot.finished_at = Some(Utc::now());
        snapshot.error = Some(TerminalError::from(&Failure::connector(format!(
            "execution {} aborted unexpectedly",
            self.id
        ))));
        self.record(snapshot);
    }
}

struct EngineInner {
    pipelines: RwLock<HashMap<String, Arc<PipelineDefinition>>>,
    interpreter: Interpreter,
    store: Arc<dyn ExecutionStore>,
    /// In-flight executions keyed by pipeline name.
    running: Mutex<HashMap<String, RunningExecution>>,
    shutdown: CancellationToken,
}

/// The workflow engine. Cloning is cheap; clones share all state.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    pub fn new(
        connectors: ConnectorRegistry,
        store: Arc<dyn ExecutionStore>,
        config: &EngineConfig,
    ) -> Self {
        let interpreter = Interpreter::new(Arc::new(connectors), config.interpreter_settings());
        info!(
            connectors = ?interpreter.connectors().kinds(),
            "pipeline engine initialized"
        );
        Self {
            inner: Arc::new(EngineInner {
                pipelines: RwLock::new(HashMap::new()),
                interpreter,
                store,
                running: Mutex::new(HashMap::new()),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Register a pipeline, replacing any previous definition with its name.
    ///
    /// Executions already in flight keep the definition they started with.
    pub fn register_pipeline(&self, definition: PipelineDefinition) -> Result<()> {
        let connectors = self.inner.interpreter.connectors();
        if let Some(kind) = definition
            .connector_kinds()
            .into_iter()
            .find(|k| !connectors.contains(k))
        {
            return Err(EngineError::DefinitionInvalid(format!(
                "pipeline '{}': no connector registered for kind '{}'",
                definition.name(),
                kind
            )));
        }

        let name = definition.name().to_string();
        debug!("Registering pipeline: {}", name);
        self.inner
            .pipelines
            .write()
            .insert(name.clone(), Arc::new(definition));
        info!("Pipeline registered: {}", name);
        Ok(())
    }

    pub fn pipeline(&self, name: &str) -> Option<Arc<PipelineDefinition>> {
        self.inner.pipelines.read().get(name).cloned()
    }

    pub fn has_pipeline(&self, name: &str) -> bool {
        self.inner.pipelines.read().contains_key(name)
    }

    /// Registered pipeline names, sorted.
    pub fn pipeline_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.pipelines.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn store(&self) -> &Arc<dyn ExecutionStore> {
        &self.inner.store
    }

    /// Start a manual execution of `pipeline`; returns its id.
    ///
    /// # Errors
    ///
    /// - `PipelineNotFound` if no pipeline has this name
    /// - `InvalidInput` if `initial_context` is not a JSON object
    /// - `ConcurrentRunRejected` if the pipeline already has a running execution
    pub async fn start_execution(
        &self,
        pipeline: &str,
        initial_context: Option<Value>,
    ) -> Result<String> {
        self.start(pipeline, initial_context, ExecutionOrigin::Manual)
    }

    /// Start an execution on behalf of a schedule trigger.
    pub async fn start_scheduled(&self, pipeline: &str) -> Result<String> {
        self.start(pipeline, None, ExecutionOrigin::Schedule)
    }

    fn start(
        &self,
        name: &str,
        initial_context: Option<Value>,
        origin: ExecutionOrigin,
    ) -> Result<String> {
        if self.inner.shutdown.is_cancelled() {
            return Err(EngineError::ShuttingDown);
        }
        let pipeline = self
            .pipeline(name)
            .ok_or_else(|| EngineError::PipelineNotFound(name.to_string()))?;
        let context = match initial_context {
            Some(value) => ContextDocument::from_value(value)?,
            None => ContextDocument::new(),
        };
        let upstream = self.upstream_contexts(&pipeline)?;

        let mut running = self.inner.running.lock();
        if let Some(current) = running.get(name) {
            return Err(EngineError::ConcurrentRunRejected {
                pipeline: name.to_string(),
                running: current.id.clone(),
            });
        }

        let execution = Execution::new(name, context)
            .with_origin(origin)
            .with_upstream(upstream);
        let id = execution.id().to_string();
        let cancel = self.inner.shutdown.child_token();
        let (done_tx, done_rx) = watch::channel(None);
        running.insert(
            name.to_string(),
            RunningExecution {
                id: id.clone(),
                snapshot: execution.snapshot(),
                cancel: cancel.clone(),
                done: done_rx,
            },
        );
        drop(running);

        info!(execution_id = %id, pipeline = name, ?origin, "execution accepted");
        let engine = self.clone();
        tokio::spawn(async move {
            engine.drive(pipeline, execution, cancel, done_tx).await;
        });
        Ok(id)
    }

    /// Final contexts of each upstream pipeline's latest successful execution.
    fn upstream_contexts(&self, pipeline: &PipelineDefinition) -> Result<Map<String, Value>> {
        let mut upstream = Map::new();
        for name in pipeline.upstream() {
            match self
                .inner
                .store
                .latest_with_status(name, ExecutionStatus::Succeeded)?
            {
                Some(snapshot) => {
                    debug!(
                        pipeline = %pipeline.name(),
                        upstream = %name,
                        execution_id = %snapshot.id,
                        "using upstream execution"
                    );
                    upstream.insert(name.clone(), snapshot.context);
                }
                None => warn!(
                    pipeline = %pipeline.name(),
                    upstream = %name,
                    "no successful upstream execution found"
                ),
            }
        }
        Ok(upstream)
    }

    async fn drive(
        self,
        pipeline: Arc<PipelineDefinition>,
        mut execution: Execution,
        cancel: CancellationToken,
        done: watch::Sender<Option<ExecutionSnapshot>>,
    ) {
        let name = pipeline.name().to_string();
        let mut guard = RunningGuard {
            inner: self.inner.clone(),
            pipeline: name.clone(),
            id: execution.id().to_string(),
            done,
            finished: false,
        };
        let inner = self.inner.clone();
        let result = self
            .inner
            .interpreter
            .run(&pipeline, &mut execution, &cancel, |e| {
                if let Some(entry) = inner.running.lock().get_mut(&name)
                    && entry.id == e.id()
                {
                    entry.snapshot = e.snapshot();
                }
            })
            .await;
        if let Err(e) = result {
            warn!(execution_id = %execution.id(), "execution did not run: {}", e);
        }
        guard.finish(execution.snapshot());
    }

    /// Look up an execution, running or finished.
    pub fn get_execution(&self, id: &str) -> Result<ExecutionSnapshot> {
        let running = self
            .inner
            .running
            .lock()
            .values()
            .find(|r| r.id == id)
            .map(|r| r.snapshot.clone());
        match running {
            Some(snapshot) => Ok(snapshot),
            None => self
                .inner
                .store
                .get(id)?
                .ok_or_else(|| EngineError::ExecutionNotFound(id.to_string())),
        }
    }

    /// Executions of `pipeline`, running and finished, most recent first.
    pub fn list_executions(&self, pipeline: &str) -> Result<Vec<ExecutionSnapshot>> {
        if !self.has_pipeline(pipeline) {
            return Err(EngineError::PipelineNotFound(pipeline.to_string()));
        }
        let running = self
            .inner
            .running
            .lock()
            .get(pipeline)
            .map(|r| r.snapshot.clone());

        let mut executions = self.inner.store.list(pipeline)?;
        if let Some(snapshot) = running
            && !executions.iter().any(|s| s.id == snapshot.id)
        {
            executions.push(snapshot);
        }
        executions.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(executions)
    }

    /// Most recent terminal execution of `pipeline`, of any status.
    pub fn latest_execution(&self, pipeline: &str) -> Result<Option<ExecutionSnapshot>> {
        self.inner.store.latest(pipeline)
    }

    /// Wait for an execution to reach a terminal status.
    pub async fn wait(&self, id: &str) -> Result<ExecutionSnapshot> {
        let done = self
            .inner
            .running
            .lock()
            .values()
            .find(|r| r.id == id)
            .map(|r| r.done.clone());

        if let Some(mut done) = done
            && let Ok(value) = done.wait_for(Option::is_some).await
            && let Some(snapshot) = (*value).clone()
        {
            return Ok(snapshot);
        }
        self.inner
            .store
            .get(id)?
            .ok_or_else(|| EngineError::ExecutionNotFound(id.to_string()))
    }

    /// Request cancellation of a running execution.
    ///
    /// The execution ends `Failed` with `Cancelled` once its current connector
    /// stops or the grace period lapses.
    pub fn cancel_execution(&self, id: &str) -> Result<()> {
        let running = self.inner.running.lock();
        if let Some(entry) = running.values().find(|r| r.id == id) {
            info!(execution_id = id, "cancelling execution");
            entry.cancel.cancel();
            return Ok(());
        }
        drop(running);

        match self.inner.store.get(id)? {
            Some(snapshot) => Err(EngineError::InvalidInput(format!(
                "execution {} already finished ({})",
                id, snapshot.status
            ))),
            None => Err(EngineError::ExecutionNotFound(id.to_string())),
        }
    }

    pub fn is_running(&self, pipeline: &str) -> bool {
        self.inner.running.lock().contains_key(pipeline)
    }

    /// Id of the running execution of `pipeline`, if any.
    pub fn running_execution(&self, pipeline: &str) -> Option<String> {
        self.inner
            .running
            .lock()
            .get(pipeline)
            .map(|r| r.id.clone())
    }

    /// Cancel every running execution and wait for them to finish.
    pub async fn shutdown(&self) {
        info!("Pipeline engine shutting down...");
        self.inner.shutdown.cancel();

        let ids: Vec<String> = self
            .inner
            .running
            .lock()
            .values()
            .map(|r| r.id.clone())
            .collect();
        for id in ids {
            if let Err(e) = self.wait(&id).await {
                warn!(execution_id = %id, "execution lost during shutdown: {}", e);
            }
        }
        info!("Pipeline engine shutdown complete");
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("pipelines", &self.pipeline_names())
            .field("connectors", self.inner.interpreter.connectors())
            .finish()
    }
}
