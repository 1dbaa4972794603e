//! Integration tests for the engine, interpreter and scheduler.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use stepline_engine::{
    Connector, ConnectorRegistry, ContextDocument, Engine, EngineConfig, EngineError, ErrorKind,
    Execution, ExecutionStatus, Failure, FireOutcome, InMemoryExecutionStore, Interpreter,
    InterpreterSettings, InvocationContext, PipelineDefinition, Scheduler, SimulatedBatchService,
    SimulatedMlService, Trigger, builtin_registry,
};
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
enum Reply {
    Output(Value),
    Echo,
    Fail(Failure),
    Panic,
}

/// Replies per state name.
struct ScriptedConnector {
    replies: HashMap<String, Reply>,
}

impl ScriptedConnector {
    fn new(replies: &[(&str, Reply)]) -> Self {
        Self {
            replies: replies
                .iter()
                .map(|(state, reply)| (state.to_string(), reply.clone()))
                .collect(),
        }
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    fn kind(&self) -> &str {
        "test:scripted"
    }

    async fn invoke(&self, request: Value, ctx: &InvocationContext) -> Result<Value, Failure> {
        match self.replies.get(&ctx.state_name) {
            Some(Reply::Output(value)) => Ok(value.clone()),
            Some(Reply::Echo) | None => Ok(request),
            Some(Reply::Fail(failure)) => Err(failure.clone()),
            Some(Reply::Panic) => panic!("connector for {} panicked", ctx.state_name),
        }
    }
}

fn definition(doc: Value) -> PipelineDefinition {
    PipelineDefinition::from_json(&doc.to_string()).expect("valid definition")
}

fn scripted_engine(connector: ScriptedConnector) -> Engine {
    let mut registry = ConnectorRegistry::new();
    registry.register(connector);
    Engine::new(
        registry,
        Arc::new(InMemoryExecutionStore::new()),
        &EngineConfig::default(),
    )
}

fn simulated_engine(
    latency: Duration,
) -> (Engine, Arc<SimulatedBatchService>, Arc<SimulatedMlService>) {
    let batch = Arc::new(SimulatedBatchService::new(latency));
    let ml = Arc::new(SimulatedMlService::new(latency));
    let config = EngineConfig {
        poll_interval: Duration::from_secs(1),
        ..Default::default()
    };
    let registry = builtin_registry(batch.clone(), ml.clone(), config.poll_interval);
    let engine = Engine::new(registry, Arc::new(InMemoryExecutionStore::new()), &config);
    (engine, batch, ml)
}

/// Task A → Task B → Succeed, with B catching `ConnectorFailure` to a Fail state.
fn linear_pipeline() -> PipelineDefinition {
    definition(json!({
        "name": "linear",
        "startState": "A",
        "states": {
            "A": {
                "type": "Task",
                "connector": "test:scripted",
                "parameters": {},
                "resultPath": "$.a",
                "next": "B"
            },
            "B": {
                "type": "Task",
                "connector": "test:scripted",
                "parameters": {
                    "input.$": "States.Format('use:{}', $.a.artifact)"
                },
                "resultPath": "$.b",
                "next": "Done",
                "catch": [
                    {"errorEquals": ["ConnectorFailure"], "next": "Failed", "resultPath": "$.error"}
                ]
            },
            "Done": {"type": "Succeed"},
            "Failed": {"type": "Fail", "error": "BFailed", "cause": "task B failed"}
        }
    }))
}

/// One batch job run, no catch.
fn batch_pipeline(name: &str, job: &str) -> PipelineDefinition {
    definition(json!({
        "name": name,
        "startState": "Work",
        "states": {
            "Work": {
                "type": "Task",
                "connector": "batch:startJobRun.sync",
                "parameters": {"jobName": job},
                "resultPath": "$.work",
                "next": "Done"
            },
            "Done": {"type": "Succeed"}
        }
    }))
}

/// Single task merging its output at `$.a.b`.
fn nested_pipeline() -> PipelineDefinition {
    definition(json!({
        "name": "nested",
        "startState": "Write",
        "states": {
            "Write": {
                "type": "Task",
                "connector": "test:scripted",
                "parameters": {},
                "resultPath": "$.a.b",
                "next": "Done"
            },
            "Done": {"type": "Succeed"}
        }
    }))
}

fn pass_pipeline(name: &str) -> PipelineDefinition {
    definition(json!({
        "name": name,
        "startState": "Name",
        "states": {
            "Name": {
                "type": "Pass",
                "result": {"model.$": "States.Format('model-{}', $$.executionId)"},
                "resultPath": "$.naming",
                "next": "Done"
            },
            "Done": {"type": "Succeed"}
        }
    }))
}

#[tokio::test]
async fn test_linear_pipeline_merges_each_result() {
    let engine = scripted_engine(ScriptedConnector::new(&[
        ("A", Reply::Output(json!({"artifact": "s3://x"}))),
        ("B", Reply::Echo),
    ]));
    engine.register_pipeline(linear_pipeline()).unwrap();

    let id = engine.start_execution("linear", None).await.unwrap();
    let snapshot = engine.wait(&id).await.unwrap();

    assert_eq!(snapshot.status, ExecutionStatus::Succeeded);
    assert_eq!(snapshot.context["a"]["artifact"], json!("s3://x"));
    assert_eq!(snapshot.context["b"]["input"], json!("use:s3://x"));
    assert_eq!(snapshot.visited, vec!["A", "B", "Done"]);
    assert!(snapshot.finished_at.is_some());
}

#[tokio::test]
async fn test_caught_failure_ends_in_fail_state() {
    let engine = scripted_engine(ScriptedConnector::new(&[
        ("A", Reply::Output(json!({"artifact": "s3://x"}))),
        ("B", Reply::Fail(Failure::connector("transform job crashed"))),
    ]));
    engine.register_pipeline(linear_pipeline()).unwrap();

    let id = engine.start_execution("linear", None).await.unwrap();
    let snapshot = engine.wait(&id).await.unwrap();

    assert_eq!(snapshot.status, ExecutionStatus::Failed);
    assert_eq!(snapshot.visited, vec!["A", "B", "Failed"]);
    let error = snapshot.error.as_ref().unwrap();
    assert_eq!(error.error, "BFailed");
    assert_eq!(error.cause, "task B failed");
    assert_eq!(snapshot.error_kind(), Some(ErrorKind::ConnectorFailure));
    assert_eq!(
        snapshot.context["error"],
        json!({"error": "ConnectorFailure", "cause": "transform job crashed"})
    );
}

#[tokio::test]
async fn test_unmatched_failure_surfaces_kind() {
    let engine = scripted_engine(ScriptedConnector::new(&[
        ("A", Reply::Output(json!({"artifact": "s3://x"}))),
        ("B", Reply::Fail(Failure::timeout("took too long"))),
    ]));
    engine.register_pipeline(linear_pipeline()).unwrap();

    let id = engine.start_execution("linear", None).await.unwrap();
    let snapshot = engine.wait(&id).await.unwrap();

    assert_eq!(snapshot.status, ExecutionStatus::Failed);
    assert_eq!(snapshot.error_kind(), Some(ErrorKind::Timeout));
    assert!(snapshot.context.get("error").is_none());
}

#[tokio::test]
async fn test_format_with_execution_id() {
    let interpreter = Interpreter::new(
        Arc::new(ConnectorRegistry::new()),
        InterpreterSettings::default(),
    );
    let def = pass_pipeline("naming");
    let mut exec = Execution::with_id("exec-42", "naming", ContextDocument::new());

    interpreter
        .run(&def, &mut exec, &CancellationToken::new(), |_| {})
        .await
        .unwrap();
    assert_eq!(exec.context().as_value()["naming"]["model"], json!("model-exec-42"));
}

#[tokio::test]
async fn test_initial_context_is_preserved() {
    let engine = scripted_engine(ScriptedConnector::new(&[]));
    engine.register_pipeline(pass_pipeline("naming")).unwrap();

    let id = engine
        .start_execution("naming", Some(json!({"run": {"date": "2024-06-01"}})))
        .await
        .unwrap();
    let snapshot = engine.wait(&id).await.unwrap();
    assert_eq!(snapshot.context["run"], json!({"date": "2024-06-01"}));
    assert_eq!(snapshot.context["naming"]["model"], json!(format!("model-{}", id)));
}

#[tokio::test]
async fn test_nested_result_path_keeps_siblings() {
    let engine = scripted_engine(ScriptedConnector::new(&[(
        "Write",
        Reply::Output(json!({"rows": 10})),
    )]));
    engine.register_pipeline(nested_pipeline()).unwrap();

    let id = engine
        .start_execution("nested", Some(json!({"a": {"c": 1}, "run": "2024-06-01"})))
        .await
        .unwrap();
    let snapshot = engine.wait(&id).await.unwrap();

    assert_eq!(snapshot.status, ExecutionStatus::Succeeded);
    assert_eq!(
        snapshot.context,
        json!({"a": {"c": 1, "b": {"rows": 10}}, "run": "2024-06-01"})
    );
}

#[tokio::test]
async fn test_nested_result_path_through_scalar_fails() {
    let engine = scripted_engine(ScriptedConnector::new(&[(
        "Write",
        Reply::Output(json!({"rows": 10})),
    )]));
    engine.register_pipeline(nested_pipeline()).unwrap();

    let id = engine
        .start_execution("nested", Some(json!({"a": 5})))
        .await
        .unwrap();
    let snapshot = engine.wait(&id).await.unwrap();

    assert_eq!(snapshot.status, ExecutionStatus::Failed);
    assert_eq!(snapshot.error_kind(), Some(ErrorKind::PathNotFound));
    assert_eq!(snapshot.visited, vec!["Write"]);
    assert_eq!(snapshot.context, json!({"a": 5}));
}

#[tokio::test]
async fn test_panicking_connector_releases_pipeline() {
    let engine = scripted_engine(ScriptedConnector::new(&[("Write", Reply::Panic)]));
    engine.register_pipeline(nested_pipeline()).unwrap();

    let id = engine.start_execution("nested", None).await.unwrap();
    let snapshot = engine.wait(&id).await.unwrap();

    assert_eq!(snapshot.status, ExecutionStatus::Failed);
    assert_eq!(snapshot.error_kind(), Some(ErrorKind::ConnectorFailure));
    assert!(!engine.is_running("nested"));
    assert_eq!(engine.get_execution(&id).unwrap(), snapshot);
    assert!(engine.start_execution("nested", None).await.is_ok());
}

#[tokio::test]
async fn test_start_rejects_bad_input() {
    let engine = scripted_engine(ScriptedConnector::new(&[]));
    engine.register_pipeline(pass_pipeline("naming")).unwrap();

    let err = engine.start_execution("ghost", None).await.unwrap_err();
    assert!(matches!(err, EngineError::PipelineNotFound(name) if name == "ghost"));

    let err = engine
        .start_execution("naming", Some(json!([1, 2, 3])))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidInput(_)));
    assert!(!engine.is_running("naming"));
}

#[tokio::test]
async fn test_register_rejects_unknown_connector() {
    let engine = scripted_engine(ScriptedConnector::new(&[]));
    let err = engine
        .register_pipeline(batch_pipeline("needs-batch", "extract"))
        .unwrap_err();
    assert!(matches!(err, EngineError::DefinitionInvalid(msg) if msg.contains("batch:startJobRun.sync")));
    assert!(engine.pipeline_names().is_empty());
}

#[tokio::test]
async fn test_list_executions_most_recent_first() {
    let engine = scripted_engine(ScriptedConnector::new(&[]));
    engine.register_pipeline(pass_pipeline("naming")).unwrap();

    let mut ids = Vec::new();
    for _ in 0..3 {
        let id = engine.start_execution("naming", None).await.unwrap();
        engine.wait(&id).await.unwrap();
        ids.push(id);
    }

    let listed: Vec<String> = engine
        .list_executions("naming")
        .unwrap()
        .into_iter()
        .map(|s| s.id)
        .collect();
    ids.reverse();
    assert_eq!(listed, ids);
    assert_eq!(engine.latest_execution("naming").unwrap().unwrap().id, ids[0]);
}

#[tokio::test]
async fn test_unknown_execution() {
    let engine = scripted_engine(ScriptedConnector::new(&[]));
    assert!(matches!(
        engine.get_execution("nope"),
        Err(EngineError::ExecutionNotFound(_))
    ));
    assert!(matches!(
        engine.wait("nope").await,
        Err(EngineError::ExecutionNotFound(_))
    ));
    assert!(matches!(
        engine.cancel_execution("nope"),
        Err(EngineError::ExecutionNotFound(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_second_start_rejected_while_running() {
    let (engine, _, _) = simulated_engine(Duration::from_secs(120));
    engine
        .register_pipeline(batch_pipeline("extract", "extract-job"))
        .unwrap();

    let first = engine.start_execution("extract", None).await.unwrap();
    let err = engine.start_execution("extract", None).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::ConcurrentRunRejected { ref running, .. } if *running == first
    ));
    assert_eq!(engine.running_execution("extract"), Some(first.clone()));

    let snapshot = engine.wait(&first).await.unwrap();
    assert_eq!(snapshot.status, ExecutionStatus::Succeeded);
    assert!(!engine.is_running("extract"));
    assert!(engine.start_execution("extract", None).await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_trigger_dropped_while_pipeline_running() {
    let (engine, batch, _) = simulated_engine(Duration::from_secs(600));
    engine
        .register_pipeline(batch_pipeline("nightly", "nightly-job"))
        .unwrap();

    let mut scheduler = Scheduler::new(engine.clone());
    scheduler
        .add_trigger(Trigger::new("nightly", "0 2 * * *", true).unwrap())
        .unwrap();
    let trigger = scheduler.triggers()[0].clone();

    let FireOutcome::Started(id) = scheduler.fire(&trigger).await.unwrap() else {
        panic!("first fire should start an execution");
    };
    assert_eq!(scheduler.fire(&trigger).await.unwrap(), FireOutcome::Dropped);

    let executions = engine.list_executions("nightly").unwrap();
    assert_eq!(executions.len(), 1);
    assert_eq!(executions[0].id, id);
    assert!(!executions[0].is_terminal());

    let snapshot = engine.wait(&id).await.unwrap();
    assert_eq!(snapshot.status, ExecutionStatus::Succeeded);
    assert_eq!(batch.submitted().len(), 1);
}

#[tokio::test]
async fn test_disabled_trigger_never_starts() {
    let engine = scripted_engine(ScriptedConnector::new(&[]));
    engine.register_pipeline(pass_pipeline("naming")).unwrap();

    let mut scheduler = Scheduler::new(engine.clone());
    scheduler
        .add_trigger(Trigger::new("naming", "hourly", false).unwrap())
        .unwrap();
    let trigger = scheduler.triggers()[0].clone();

    assert_eq!(scheduler.fire(&trigger).await.unwrap(), FireOutcome::Disabled);
    assert!(engine.list_executions("naming").unwrap().is_empty());

    let upcoming = scheduler.upcoming(chrono::Utc::now());
    assert_eq!(upcoming.len(), 1);
    assert!(!upcoming[0].enabled);
    assert!(upcoming[0].next.is_some());
}

#[tokio::test]
async fn test_trigger_for_unknown_pipeline_rejected() {
    let engine = scripted_engine(ScriptedConnector::new(&[]));
    let mut scheduler = Scheduler::new(engine);
    assert!(
        scheduler
            .add_trigger(Trigger::new("ghost", "daily", true).unwrap())
            .is_err()
    );
}

#[tokio::test]
async fn test_spawned_scheduler_fires_and_stops() {
    let engine = scripted_engine(ScriptedConnector::new(&[]));
    engine.register_pipeline(pass_pipeline("naming")).unwrap();

    let mut scheduler = Scheduler::new(engine.clone());
    scheduler
        .add_trigger(Trigger::new("naming", "* * * * * *", true).unwrap())
        .unwrap();
    let handle = scheduler.spawn();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while engine.latest_execution("naming").unwrap().is_none() {
        assert!(tokio::time::Instant::now() < deadline, "trigger never fired");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    handle.stop().await;

    let latest = engine.latest_execution("naming").unwrap().unwrap();
    assert_eq!(latest.status, ExecutionStatus::Succeeded);
    assert_eq!(latest.origin, stepline_engine::ExecutionOrigin::Schedule);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_running_execution() {
    let (engine, batch, _) = simulated_engine(Duration::from_secs(3600));
    engine
        .register_pipeline(batch_pipeline("long", "long-job"))
        .unwrap();

    let id = engine.start_execution("long", None).await.unwrap();
    while batch.submitted().is_empty() {
        tokio::task::yield_now().await;
    }
    assert_eq!(
        engine.get_execution(&id).unwrap().current_state.as_deref(),
        Some("Work")
    );

    engine.cancel_execution(&id).unwrap();
    let snapshot = engine.wait(&id).await.unwrap();
    assert_eq!(snapshot.status, ExecutionStatus::Failed);
    assert_eq!(snapshot.error_kind(), Some(ErrorKind::Cancelled));
    assert_eq!(batch.stopped(), vec!["long-job".to_string()]);

    assert!(matches!(
        engine.cancel_execution(&id),
        Err(EngineError::InvalidInput(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_job_lock_spans_pipelines() {
    let (engine, batch, _) = simulated_engine(Duration::from_secs(60));
    engine
        .register_pipeline(batch_pipeline("first", "shared-extract"))
        .unwrap();
    engine
        .register_pipeline(batch_pipeline("second", "shared-extract"))
        .unwrap();

    let first = engine.start_execution("first", None).await.unwrap();
    while batch.submitted().is_empty() {
        tokio::task::yield_now().await;
    }
    let second = engine.start_execution("second", None).await.unwrap();

    let second = engine.wait(&second).await.unwrap();
    assert_eq!(second.status, ExecutionStatus::Failed);
    assert_eq!(second.error_kind(), Some(ErrorKind::ConcurrentRunRejected));

    let first = engine.wait(&first).await.unwrap();
    assert_eq!(first.status, ExecutionStatus::Succeeded);
    assert_eq!(batch.submitted().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_cancels_and_refuses_new_work() {
    let (engine, batch, _) = simulated_engine(Duration::from_secs(3600));
    engine
        .register_pipeline(batch_pipeline("long", "long-job"))
        .unwrap();

    let id = engine.start_execution("long", None).await.unwrap();
    while batch.submitted().is_empty() {
        tokio::task::yield_now().await;
    }

    engine.shutdown().await;
    let snapshot = engine.get_execution(&id).unwrap();
    assert_eq!(snapshot.error_kind(), Some(ErrorKind::Cancelled));
    assert!(matches!(
        engine.start_execution("long", None).await,
        Err(EngineError::ShuttingDown)
    ));
}
