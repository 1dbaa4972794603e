//! State-machine workflow engine for batch ML pipelines.
//!
//! Pipelines are declarative state graphs (Task, Pass, Succeed, Fail) whose
//! task states submit long-running external jobs through pluggable
//! connectors and wait for them to finish. Each execution threads its own
//! JSON context document from state to state.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │  Scheduler (cron triggers, drop-if-running)              │
//! └────────────────────────────┬─────────────────────────────┘
//!                              ▼
//! ┌──────────────────────────────────────────────────────────┐
//! │  Engine                                                  │
//! │  - registered definitions, one running execution/pipeline│
//! │  - execution store (GetLatest, upstream discovery)       │
//! └────────────────────────────┬─────────────────────────────┘
//!                              ▼
//! ┌──────────────────────────────────────────────────────────┐
//! │  Interpreter                                             │
//! │  - resolver ($.path, $$.meta, States.Format)             │
//! │  - result-path merges, catch routing, timeout, cancel    │
//! └────────────────────────────┬─────────────────────────────┘
//!                              ▼
//! ┌──────────────────────────────────────────────────────────┐
//! │  Connectors (batch job, ML training/model/transform)     │
//! │  - shared per-job locks, submit-and-wait polling         │
//! └──────────────────────────────────────────────────────────┘
//! ```

pub mod connector;
pub mod context;
pub mod definition;
pub mod engine;
pub mod error;
pub mod execution;
pub mod expr;
pub mod interpreter;
pub mod loader;
pub mod scheduler;
pub mod store;

pub use connector::{
    BatchJobConnector, BatchJobService, Connector, ConnectorRegistry, InvocationContext, JobLease,
    JobLocks, MlJobConnector, MlJobService, MlOperation, SimulatedBatchService,
    SimulatedMlService, builtin_registry,
};
pub use context::{ContextDocument, ExecutionMeta, ResultPath};
pub use definition::{MATCH_ALL, PipelineDefinition, PipelineFile, State};
pub use engine::{Engine, EngineConfig};
pub use error::{EngineError, ErrorKind, Failure, Result, TerminalError};
pub use execution::{Execution, ExecutionOrigin, ExecutionSnapshot, ExecutionStatus};
pub use expr::{Expr, MAX_RESOLUTION_DEPTH, Resolver, Template};
pub use interpreter::{Interpreter, InterpreterSettings};
pub use loader::{LoadEvent, load_dir};
pub use scheduler::{FireOutcome, Scheduler, SchedulerError, SchedulerHandle, Trigger, UpcomingFire};
pub use store::{ExecutionStore, InMemoryExecutionStore};
