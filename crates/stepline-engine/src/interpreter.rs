//! State machine interpreter.
//!
//! Walks a [`PipelineDefinition`] one state at a time for a single
//! [`Execution`]. Task parameters are resolved against the execution's own
//! context document, connectors are invoked through the registry, outputs are
//! merged at the state's result path and failures are routed through catch
//! clauses. The interpreter never retries.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::connector::{ConnectorRegistry, InvocationContext};
use crate::definition::{PassState, PipelineDefinition, State, TaskState};
use crate::error::{EngineError, ErrorKind, Failure, TerminalError};
use crate::execution::{Execution, ExecutionStatus};
use crate::expr::Resolver;

/// Interpreter-wide limits.
#[derive(Debug, Clone)]
pub struct InterpreterSettings {
    /// Timeout for task states that do not set `timeoutSeconds`.
    pub default_task_timeout: Duration,
    /// How long a cancelled or timed-out invocation may take to wind down.
    pub cancel_grace: Duration,
}

impl Default for InterpreterSettings {
    fn default() -> Self {
        Self {
            default_task_timeout: Duration::from_secs(86_400),
            cancel_grace: Duration::from_secs(30),
        }
    }
}

enum Step {
    Next(String),
    /// A catch clause handled a failure of `kind` and routed to `next`.
    Caught { next: String, kind: ErrorKind },
    Terminate(TerminalError),
}

/// Executes pipelines against a connector registry.
#[derive(Debug, Clone)]
pub struct Interpreter {
    connectors: Arc<ConnectorRegistry>,
    settings: InterpreterSettings,
}

impl Interpreter {
    pub fn new(connectors: Arc<ConnectorRegistry>, settings: InterpreterSettings) -> Self {
        Self {
            connectors,
            settings,
        }
    }

    pub fn connectors(&self) -> &ConnectorRegistry {
        &self.connectors
    }

    pub fn settings(&self) -> &InterpreterSettings {
        &self.settings
    }

    /// Run `execution` to a terminal status.
    ///
    /// `on_step` observes the execution after every state is entered and once
    /// more when it finishes. Only a `NotStarted` execution can be run.
    pub async fn run<F>(
        &self,
        pipeline: &PipelineDefinition,
        execution: &mut Execution,
        cancel: &CancellationToken,
        mut on_step: F,
    ) -> Result<(), EngineError>
    where
        F: FnMut(&Execution) + Send,
    {
        if execution.status != ExecutionStatus::NotStarted {
            return Err(EngineError::AlreadyStarted(execution.id().to_string()));
        }
        execution.status = ExecutionStatus::Running;
        info!(
            execution_id = %execution.id(),
            pipeline = %pipeline.name(),
            "execution started"
        );

        let mut current = pipeline.start_state().to_string();
        // Last failure a catch clause handled; cleared once a task succeeds.
        let mut caught: Option<ErrorKind> = None;
        loop {
            if cancel.is_cancelled() {
                execution.fail(TerminalError::from(&Failure::cancelled(format!(
                    "execution {} cancelled",
                    execution.id()
                ))));
                break;
            }

            let Some(state) = pipeline.state(&current) else {
                execution.fail(TerminalError::from(&Failure::new(
                    ErrorKind::DefinitionInvalid,
                    format!("state '{}' does not exist", current),
                )));
                break;
            };
            execution.enter(&current);
            on_step(execution);
            debug!(
                execution_id = %execution.id(),
                state = %current,
                kind = state.type_name(),
                "entering state"
            );

            let step = match state {
                State::Succeed => {
                    execution.succeed();
                    break;
                }
                State::Fail(fail) => {
                    execution.fail(TerminalError::new(&fail.error, &fail.cause).with_kind(caught));
                    break;
                }
                State::Pass(pass) => run_pass(&current, pass, execution),
                State::Task(task) => {
                    let step = self.run_task(&current, task, execution, cancel).await;
                    if matches!(step, Step::Next(_)) {
                        caught = None;
                    }
                    step
                }
            };

            match step {
                Step::Next(next) => current = next,
                Step::Caught { next, kind } => {
                    caught = Some(kind);
                    current = next;
                }
                Step::Terminate(error) => {
                    execution.fail(error);
                    break;
                }
            }
            tokio::task::yield_now().await;
        }

        on_step(execution);
        match execution.error() {
            None => info!(
                execution_id = %execution.id(),
                pipeline = %pipeline.name(),
                status = %execution.status(),
                "execution finished"
            ),
            Some(error) => info!(
                execution_id = %execution.id(),
                pipeline = %pipeline.name(),
                status = %execution.status(),
                error = %error,
                "execution finished"
            ),
        }
        Ok(())
    }

    async fn run_task(
        &self,
        state_name: &str,
        task: &TaskState,
        execution: &mut Execution,
        cancel: &CancellationToken,
    ) -> Step {
        let meta = execution.meta.to_value(state_name);
        let request = Resolver::new(&execution.context, &meta).resolve(&task.parameters);

        let outcome = match request {
            Ok(request) => {
                let execution_id = execution.id().to_string();
                match self
                    .invoke(state_name, task, request, &execution_id, cancel)
                    .await
                {
                    Ok(output) => execution.context.merge_at(&task.result_path, output),
                    Err(failure) => Err(failure),
                }
            }
            Err(failure) => Err(failure),
        };

        match outcome {
            Ok(()) => Step::Next(task.next.clone()),
            Err(failure) => route_failure(state_name, task, failure, execution),
        }
    }

    /// Invoke the task's connector, bounded by its timeout and the execution's
    /// cancellation token.
    async fn invoke(
        &self,
        state_name: &str,
        task: &TaskState,
        request: Value,
        execution_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Value, Failure> {
        let connector = self.connectors.get(&task.connector).ok_or_else(|| {
            Failure::connector(format!(
                "no connector registered for kind '{}'",
                task.connector
            ))
        })?;

        let token = cancel.child_token();
        let ctx =
            InvocationContext::new(execution_id, state_name).with_cancellation(token.clone());
        let limit = task.timeout.unwrap_or(self.settings.default_task_timeout);

        let mut invocation = connector.invoke(request, &ctx);
        let interrupted = tokio::select! {
            result = &mut invocation => return result,
            _ = tokio::time::sleep(limit) => Failure::timeout(format!(
                "state '{}' exceeded its timeout of {}s",
                state_name,
                limit.as_secs()
            )),
            _ = cancel.cancelled() => Failure::cancelled(format!(
                "execution {} cancelled",
                execution_id
            )),
        };

        // Give the connector a bounded window to stop its external job.
        token.cancel();
        if tokio::time::timeout(self.settings.cancel_grace, &mut invocation)
            .await
            .is_err()
        {
            warn!(
                execution_id,
                state = state_name,
                "connector did not stop within {:?}; abandoning invocation",
                self.settings.cancel_grace
            );
        }
        Err(interrupted)
    }
}

fn run_pass(state_name: &str, pass: &PassState, execution: &mut Execution) -> Step {
    let meta = execution.meta.to_value(state_name);
    let resolved = Resolver::new(&execution.context, &meta).resolve(&pass.result);
    let outcome = match resolved {
        Ok(value) => execution.context.merge_at(&pass.result_path, value),
        Err(failure) => Err(failure),
    };

    match outcome {
        Ok(()) => Step::Next(pass.next.clone()),
        Err(failure) => {
            warn!(
                execution_id = %execution.id(),
                state = state_name,
                "pass state failed: {}",
                failure
            );
            Step::Terminate(TerminalError::from(&failure))
        }
    }
}

/// Offer a failure to the task's catch clauses in declaration order.
fn route_failure(
    state_name: &str,
    task: &TaskState,
    failure: Failure,
    execution: &mut Execution,
) -> Step {
    if failure.kind == ErrorKind::Cancelled {
        return Step::Terminate(TerminalError::from(&failure));
    }

    let Some(clause) = task.find_catch(failure.kind) else {
        warn!(
            execution_id = %execution.id(),
            state = state_name,
            "unhandled failure: {}",
            failure
        );
        return Step::Terminate(TerminalError::from(&failure));
    };

    debug!(
        execution_id = %execution.id(),
        state = state_name,
        next = %clause.next,
        "caught {}",
        failure.kind
    );
    match execution
        .context
        .merge_at(&clause.result_path, failure.to_payload())
    {
        Ok(()) => Step::Caught {
            next: clause.next.clone(),
            kind: failure.kind,
        },
        Err(merge_failure) => Step::Terminate(TerminalError::from(&merge_failure)),
    }
}
