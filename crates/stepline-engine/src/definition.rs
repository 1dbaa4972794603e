//! Declarative pipeline definition parser and validator.
//!
//! A pipeline document is parsed into a [`PipelineFile`] (plain serde types),
//! then compiled into an immutable [`PipelineDefinition`]: references are
//! checked, parameter templates are compiled into expression trees and catch
//! matchers are resolved into typed error kinds.
//!
//! # Example
//!
//! ```json
//! {
//!   "name": "fraud-training",
//!   "startState": "Extract",
//!   "states": {
//!     "Extract": {
//!       "type": "Task",
//!       "connector": "batch:startJobRun.sync",
//!       "parameters": { "jobName": "extract-training-data" },
//!       "resultPath": "$.extract",
//!       "next": "Done",
//!       "catch": [{ "errorEquals": ["States.ALL"], "next": "Failed", "resultPath": "$.error" }]
//!     },
//!     "Done": { "type": "Succeed" },
//!     "Failed": { "type": "Fail", "error": "ExtractFailed", "cause": "extract job failed" }
//!   }
//! }
//! ```

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use tracing::debug;

use crate::context::ResultPath;
use crate::error::{EngineError, ErrorKind};
use crate::expr::Template;

/// Catch matcher that accepts every catchable error kind.
pub const MATCH_ALL: &str = "States.ALL";

// ---------------------------------------------------------------------------
// Document types
// ---------------------------------------------------------------------------

/// A pipeline document as written on disk.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PipelineFile {
    /// Unique pipeline name.
    pub name: String,

    /// Human-readable description.
    #[serde(default)]
    pub description: String,

    /// Name of the first state to run.
    pub start_state: String,

    /// Pipelines whose latest successful context is exposed as `$$.upstream.<name>`.
    #[serde(default)]
    pub upstream: Vec<String>,

    /// States in document order.
    pub states: StateMap,
}

/// Ordered `name -> state` map that keeps document order and rejects duplicates.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateMap(pub Vec<(String, StateSpec)>);

impl Serialize for StateMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, spec) in &self.0 {
            map.serialize_entry(name, spec)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for StateMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct StateMapVisitor;

        impl<'de> Visitor<'de> for StateMapVisitor {
            type Value = StateMap;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of state names to state definitions")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<StateMap, A::Error> {
                let mut states: Vec<(String, StateSpec)> = Vec::new();
                while let Some((name, spec)) = access.next_entry::<String, StateSpec>()? {
                    if states.iter().any(|(n, _)| *n == name) {
                        return Err(serde::de::Error::custom(format!(
                            "duplicate state name '{}'",
                            name
                        )));
                    }
                    states.push((name, spec));
                }
                Ok(StateMap(states))
            }
        }

        deserializer.deserialize_map(StateMapVisitor)
    }
}

/// One state as written in the document.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", deny_unknown_fields)]
pub enum StateSpec {
    /// Invoke a connector and wait for it to finish.
    #[serde(rename_all = "camelCase")]
    Task {
        connector: String,
        #[serde(default = "empty_object")]
        parameters: Value,
        #[serde(default)]
        result_path: Option<String>,
        #[serde(default)]
        timeout_seconds: Option<u64>,
        next: String,
        #[serde(default)]
        catch: Vec<CatchSpec>,
        #[serde(default)]
        comment: Option<String>,
    },

    /// Merge a literal or templated value into the context.
    #[serde(rename_all = "camelCase")]
    Pass {
        #[serde(default = "empty_object")]
        result: Value,
        #[serde(default)]
        result_path: Option<String>,
        next: String,
        #[serde(default)]
        comment: Option<String>,
    },

    /// Terminal success.
    Succeed {
        #[serde(default)]
        comment: Option<String>,
    },

    /// Terminal failure with a fixed error code and cause.
    Fail {
        error: String,
        #[serde(default)]
        cause: String,
        #[serde(default)]
        comment: Option<String>,
    },
}

/// A catch clause as written in the document.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CatchSpec {
    pub error_equals: Vec<String>,
    pub next: String,
    #[serde(default)]
    pub result_path: Option<String>,
}

fn empty_object() -> Value {
    Value::Object(Default::default())
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

impl PipelineFile {
    /// Parse a pipeline document from JSON.
    pub fn from_json(json: &str) -> Result<Self, EngineError> {
        serde_json::from_str(json)
            .map_err(|e| EngineError::DefinitionInvalid(format!("JSON parse error: {}", e)))
    }

    /// Parse a pipeline document from TOML (same shape as the JSON form).
    pub fn from_toml(toml_str: &str) -> Result<Self, EngineError> {
        toml::from_str(toml_str)
            .map_err(|e| EngineError::DefinitionInvalid(format!("TOML parse error: {}", e)))
    }

    /// Load a document from a file; `.toml` files are TOML, everything else JSON.
    pub fn from_file(path: &Path) -> Result<Self, EngineError> {
        let content = std::fs::read_to_string(path).map_err(|e| EngineError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Self::from_toml(&content),
            _ => Self::from_json(&content),
        }
    }
}

// ---------------------------------------------------------------------------
// Compiled definition
// ---------------------------------------------------------------------------

/// Matches a failure kind in a catch clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorMatcher {
    Kind(ErrorKind),
    All,
}

impl ErrorMatcher {
    fn parse(raw: &str) -> Result<Self, String> {
        if raw == MATCH_ALL {
            return Ok(ErrorMatcher::All);
        }
        let kind: ErrorKind = raw.parse()?;
        match kind {
            ErrorKind::Cancelled | ErrorKind::DefinitionInvalid => {
                Err(format!("'{}' cannot be caught", kind))
            }
            kind => Ok(ErrorMatcher::Kind(kind)),
        }
    }

    pub fn matches(&self, kind: ErrorKind) -> bool {
        match self {
            ErrorMatcher::All => true,
            ErrorMatcher::Kind(k) => *k == kind,
        }
    }
}

/// A compiled catch clause.
#[derive(Debug, Clone, PartialEq)]
pub struct CatchClause {
    pub matchers: Vec<ErrorMatcher>,
    pub next: String,
    pub result_path: ResultPath,
}

impl CatchClause {
    pub fn matches(&self, kind: ErrorKind) -> bool {
        self.matchers.iter().any(|m| m.matches(kind))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TaskState {
    pub connector: String,
    pub parameters: Template,
    pub result_path: ResultPath,
    pub timeout: Option<Duration>,
    pub next: String,
    pub catch: Vec<CatchClause>,
}

impl TaskState {
    /// First catch clause, in declaration order, that handles `kind`.
    pub fn find_catch(&self, kind: ErrorKind) -> Option<&CatchClause> {
        self.catch.iter().find(|c| c.matches(kind))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PassState {
    pub result: Template,
    pub result_path: ResultPath,
    pub next: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FailState {
    pub error: String,
    pub cause: String,
}

/// A compiled state.
#[derive(Debug, Clone, PartialEq)]
pub enum State {
    Task(TaskState),
    Pass(PassState),
    Succeed,
    Fail(FailState),
}

impl State {
    pub fn type_name(&self) -> &'static str {
        match self {
            State::Task(_) => "Task",
            State::Pass(_) => "Pass",
            State::Succeed => "Succeed",
            State::Fail(_) => "Fail",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, State::Succeed | State::Fail(_))
    }

    /// Every state name this state can transition to.
    fn successors(&self) -> Vec<&str> {
        match self {
            State::Task(task) => std::iter::once(task.next.as_str())
                .chain(task.catch.iter().map(|c| c.next.as_str()))
                .collect(),
            State::Pass(pass) => vec![pass.next.as_str()],
            State::Succeed | State::Fail(_) => Vec::new(),
        }
    }
}

/// An immutable, validated pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineDefinition {
    name: String,
    description: String,
    start_state: String,
    upstream: Vec<String>,
    states: Vec<(String, State)>,
    index: HashMap<String, usize>,
}

impl PipelineDefinition {
    /// Parse and compile a JSON pipeline document.
    pub fn from_json(json: &str) -> Result<Self, EngineError> {
        Self::compile(PipelineFile::from_json(json)?)
    }

    /// Parse and compile a TOML pipeline document.
    pub fn from_toml(toml_str: &str) -> Result<Self, EngineError> {
        Self::compile(PipelineFile::from_toml(toml_str)?)
    }

    /// Load, parse and compile a pipeline document from disk.
    pub fn from_file(path: &Path) -> Result<Self, EngineError> {
        Self::compile(PipelineFile::from_file(path)?)
    }

    /// Validate a parsed document and compile it.
    ///
    /// Checks:
    /// - Non-empty name and at least one state
    /// - The start state exists
    /// - Every `next` and catch target references an existing state
    /// - At least one `Succeed`/`Fail` terminal state
    /// - Every state is reachable from the start state
    /// - Templates, result paths and catch matchers are well-formed
    pub fn compile(file: PipelineFile) -> Result<Self, EngineError> {
        let name = file.name.trim().to_string();
        if name.is_empty() {
            return Err(invalid("<unnamed>", "pipeline name cannot be empty"));
        }
        if file.states.0.is_empty() {
            return Err(invalid(&name, "pipeline must have at least one state"));
        }
        if file.upstream.iter().any(|u| *u == name) {
            return Err(invalid(&name, "pipeline cannot list itself as upstream"));
        }

        let mut states = Vec::with_capacity(file.states.0.len());
        let mut index = HashMap::with_capacity(file.states.0.len());
        for (i, (state_name, spec)) in file.states.0.into_iter().enumerate() {
            if state_name.is_empty() {
                return Err(invalid(&name, "state name cannot be empty"));
            }
            let state = compile_state(spec)
                .map_err(|e| invalid(&name, &format!("state '{}': {}", state_name, e)))?;
            index.insert(state_name.clone(), i);
            states.push((state_name, state));
        }

        let definition = Self {
            name,
            description: file.description,
            start_state: file.start_state,
            upstream: file.upstream,
            states,
            index,
        };
        definition.check_graph()?;

        debug!(
            "Compiled pipeline '{}' with {} states",
            definition.name,
            definition.states.len()
        );
        Ok(definition)
    }

    fn check_graph(&self) -> Result<(), EngineError> {
        if !self.index.contains_key(&self.start_state) {
            return Err(invalid(
                &self.name,
                &format!("start state '{}' does not exist", self.start_state),
            ));
        }

        for (state_name, state) in &self.states {
            for target in state.successors() {
                if !self.index.contains_key(target) {
                    return Err(invalid(
                        &self.name,
                        &format!(
                            "state '{}' transitions to unknown state '{}'",
                            state_name, target
                        ),
                    ));
                }
            }
        }

        if !self.states.iter().any(|(_, s)| s.is_terminal()) {
            return Err(invalid(
                &self.name,
                "pipeline must have at least one Succeed or Fail state",
            ));
        }

        // Breadth-first walk from the start state.
        let mut seen: HashSet<&str> = HashSet::new();
        let mut queue = VecDeque::from([self.start_state.as_str()]);
        while let Some(current) = queue.pop_front() {
            if !seen.insert(current) {
                continue;
            }
            if let Some(state) = self.state(current) {
                queue.extend(state.successors());
            }
        }
        if let Some((unreachable, _)) = self
            .states
            .iter()
            .find(|(n, _)| !seen.contains(n.as_str()))
        {
            return Err(invalid(
                &self.name,
                &format!("state '{}' is unreachable from '{}'", unreachable, self.start_state),
            ));
        }

        if let Some(cycle) = self.pass_only_cycle() {
            return Err(invalid(
                &self.name,
                &format!("states {} form a cycle with no task state", cycle.join(" -> ")),
            ));
        }

        Ok(())
    }

    /// A loop made only of `Pass` states, as the path from its first member
    /// back to itself.
    fn pass_only_cycle(&self) -> Option<Vec<&str>> {
        for (start, state) in &self.states {
            if !matches!(state, State::Pass(_)) {
                continue;
            }
            let mut path = vec![start.as_str()];
            let mut current = start.as_str();
            while let Some(State::Pass(pass)) = self.state(current) {
                let next = pass.next.as_str();
                if next == start.as_str() {
                    path.push(next);
                    return Some(path);
                }
                if path.contains(&next) {
                    break;
                }
                path.push(next);
                current = next;
            }
        }
        None
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn start_state(&self) -> &str {
        &self.start_state
    }

    pub fn upstream(&self) -> &[String] {
        &self.upstream
    }

    /// Look up a state by name.
    pub fn state(&self, name: &str) -> Option<&State> {
        self.index.get(name).map(|&i| &self.states[i].1)
    }

    /// States in document order.
    pub fn states(&self) -> impl Iterator<Item = (&str, &State)> {
        self.states.iter().map(|(n, s)| (n.as_str(), s))
    }

    /// Distinct connector kinds used by task states.
    pub fn connector_kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = Vec::new();
        for (_, state) in &self.states {
            if let State::Task(task) = state
                && !kinds.contains(&task.connector.as_str())
            {
                kinds.push(task.connector.as_str());
            }
        }
        kinds
    }
}

fn invalid(pipeline: &str, message: &str) -> EngineError {
    EngineError::DefinitionInvalid(format!("pipeline '{}': {}", pipeline, message))
}

fn compile_result_path(raw: Option<&str>) -> Result<ResultPath, String> {
    ResultPath::parse(raw)
}

fn compile_state(spec: StateSpec) -> Result<State, String> {
    match spec {
        StateSpec::Task {
            connector,
            parameters,
            result_path,
            timeout_seconds,
            next,
            catch,
            ..
        } => {
            if connector.trim().is_empty() {
                return Err("task connector cannot be empty".into());
            }
            let timeout = match timeout_seconds {
                Some(0) => return Err("timeoutSeconds must be greater than zero".into()),
                Some(secs) => Some(Duration::from_secs(secs)),
                None => None,
            };
            let catch = catch
                .into_iter()
                .map(compile_catch)
                .collect::<Result<Vec<_>, _>>()?;
            Ok(State::Task(TaskState {
                connector,
                parameters: Template::compile(&parameters)?,
                result_path: compile_result_path(result_path.as_deref())?,
                timeout,
                next,
                catch,
            }))
        }
        StateSpec::Pass {
            result,
            result_path,
            next,
            ..
        } => Ok(State::Pass(PassState {
            result: Template::compile(&result)?,
            result_path: compile_result_path(result_path.as_deref())?,
            next,
        })),
        StateSpec::Succeed { .. } => Ok(State::Succeed),
        StateSpec::Fail { error, cause, .. } => {
            if error.trim().is_empty() {
                return Err("fail state must declare an error code".into());
            }
            Ok(State::Fail(FailState { error, cause }))
        }
    }
}

fn compile_catch(spec: CatchSpec) -> Result<CatchClause, String> {
    if spec.error_equals.is_empty() {
        return Err("catch clause must list at least one error".into());
    }
    let matchers = spec
        .error_equals
        .iter()
        .map(|e| ErrorMatcher::parse(e))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(CatchClause {
        matchers,
        next: spec.next,
        result_path: compile_result_path(spec.result_path.as_deref())?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn linear() -> Value {
        json!({
            "name": "linear",
            "startState": "A",
            "states": {
                "A": {
                    "type": "Task",
                    "connector": "batch:startJobRun.sync",
                    "parameters": {"jobName": "a"},
                    "resultPath": "$.a",
                    "next": "B"
                },
                "B": {
                    "type": "Task",
                    "connector": "batch:startJobRun.sync",
                    "parameters": {"input.$": "States.Format('use:{}', $.a.artifact)"},
                    "resultPath": "$.b",
                    "next": "Done",
                    "catch": [{"errorEquals": ["ConnectorFailure"], "next": "Failed", "resultPath": "$.error"}]
                },
                "Done": {"type": "Succeed"},
                "Failed": {"type": "Fail", "error": "ConnectorFailure", "cause": "B failed"}
            }
        })
    }

    fn compile(v: Value) -> Result<PipelineDefinition, EngineError> {
        PipelineDefinition::from_json(&v.to_string())
    }

    fn expect_invalid(v: Value, needle: &str) {
        match compile(v) {
            Err(EngineError::DefinitionInvalid(msg)) => {
                assert!(msg.contains(needle), "message '{msg}' lacks '{needle}'")
            }
            other => panic!("expected DefinitionInvalid, got {other:?}"),
        }
    }

    #[test]
    fn test_compile_linear() {
        let mut v = linear();
        v["description"] = json!("two tasks in a row");
        let def = compile(v).unwrap();
        assert_eq!(def.name(), "linear");
        assert_eq!(def.description(), "two tasks in a row");
        assert_eq!(def.start_state(), "A");
        let names: Vec<&str> = def.states().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["A", "B", "Done", "Failed"]);
        assert_eq!(def.connector_kinds(), vec!["batch:startJobRun.sync"]);
        match def.state("B").unwrap() {
            State::Task(t) => {
                assert_eq!(t.catch.len(), 1);
                assert!(t.find_catch(ErrorKind::ConnectorFailure).is_some());
                assert!(t.find_catch(ErrorKind::Timeout).is_none());
            }
            other => panic!("expected task, got {other:?}"),
        }
    }

    #[test]
    fn test_load_twice_is_equal() {
        assert_eq!(compile(linear()).unwrap(), compile(linear()).unwrap());
    }

    #[test]
    fn test_toml_matches_json() {
        let toml_src = r#"
name = "linear"
startState = "A"

[states.A]
type = "Task"
connector = "batch:startJobRun.sync"
resultPath = "$.a"
next = "Done"
parameters = { jobName = "a" }

[states.Done]
type = "Succeed"
"#;
        let def = PipelineDefinition::from_toml(toml_src).unwrap();
        assert_eq!(def.start_state(), "A");
        assert!(matches!(def.state("Done"), Some(State::Succeed)));
    }

    #[test]
    fn test_duplicate_state_names_rejected() {
        let src = r#"{"name":"d","startState":"A","states":{"A":{"type":"Succeed"},"A":{"type":"Succeed"}}}"#;
        let err = PipelineDefinition::from_json(src).unwrap_err();
        assert!(err.to_string().contains("duplicate state name 'A'"));
    }

    #[test]
    fn test_missing_start_state() {
        let mut v = linear();
        v["startState"] = json!("Nope");
        expect_invalid(v, "start state 'Nope' does not exist");
    }

    #[test]
    fn test_unknown_next() {
        let mut v = linear();
        v["states"]["A"]["next"] = json!("Ghost");
        expect_invalid(v, "unknown state 'Ghost'");
    }

    #[test]
    fn test_unknown_catch_target() {
        let mut v = linear();
        v["states"]["B"]["catch"][0]["next"] = json!("Ghost");
        expect_invalid(v, "unknown state 'Ghost'");
    }

    #[test]
    fn test_unreachable_state() {
        let mut v = linear();
        v["states"]["Orphan"] = json!({"type": "Succeed"});
        expect_invalid(v, "state 'Orphan' is unreachable");
    }

    #[test]
    fn test_requires_terminal_state() {
        expect_invalid(
            json!({
                "name": "loop",
                "startState": "A",
                "states": {"A": {"type": "Pass", "next": "A"}}
            }),
            "at least one Succeed or Fail",
        );
    }

    #[test]
    fn test_pass_only_cycle_rejected() {
        let mut v = linear();
        v["states"]["A"]["catch"] = json!([{"errorEquals": ["States.ALL"], "next": "Wait"}]);
        v["states"]["Wait"] = json!({"type": "Pass", "next": "Check"});
        v["states"]["Check"] = json!({"type": "Pass", "next": "Wait"});
        expect_invalid(v, "states Check -> Wait -> Check form a cycle with no task state");
    }

    #[test]
    fn test_cycle_through_task_accepted() {
        let mut v = linear();
        v["states"]["A"]["catch"] = json!([{"errorEquals": ["Timeout"], "next": "Backoff"}]);
        v["states"]["Backoff"] = json!({"type": "Pass", "result": {"retried": true}, "next": "A"});
        let def = compile(v).unwrap();
        assert!(matches!(def.state("Backoff"), Some(State::Pass(_))));
    }

    #[test]
    fn test_unknown_state_field_rejected() {
        let mut v = linear();
        let a = v["states"]["A"].as_object_mut().unwrap();
        let path = a.remove("resultPath").unwrap();
        a.insert("resultpath".into(), path);
        expect_invalid(v, "unknown field `resultpath`");
    }

    #[test]
    fn test_unknown_catch_and_document_fields_rejected() {
        let mut v = linear();
        v["states"]["B"]["catch"][0]["resultpath"] = json!("$.err");
        expect_invalid(v, "unknown field `resultpath`");

        let mut v = linear();
        v["startAt"] = json!("A");
        expect_invalid(v, "unknown field `startAt`");
    }

    #[test]
    fn test_unknown_error_matcher() {
        let mut v = linear();
        v["states"]["B"]["catch"][0]["errorEquals"] = json!(["Bogus"]);
        expect_invalid(v, "unknown error kind 'Bogus'");
    }

    #[test]
    fn test_cancelled_not_catchable() {
        let mut v = linear();
        v["states"]["B"]["catch"][0]["errorEquals"] = json!(["Cancelled"]);
        expect_invalid(v, "'Cancelled' cannot be caught");
    }

    #[test]
    fn test_bad_expression_rejected_at_load() {
        let mut v = linear();
        v["states"]["B"]["parameters"] = json!({"input.$": "States.Format('{}')"});
        expect_invalid(v, "placeholder");
    }

    #[test]
    fn test_bad_result_path_rejected() {
        let mut v = linear();
        v["states"]["A"]["resultPath"] = json!("$");
        expect_invalid(v, "must start with '$.'");
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let mut v = linear();
        v["states"]["A"]["timeoutSeconds"] = json!(0);
        expect_invalid(v, "timeoutSeconds");
    }

    #[test]
    fn test_self_upstream_rejected() {
        let mut v = linear();
        v["upstream"] = json!(["linear"]);
        expect_invalid(v, "itself as upstream");
    }

    #[test]
    fn test_match_all() {
        assert!(ErrorMatcher::All.matches(ErrorKind::Timeout));
        assert!(ErrorMatcher::Kind(ErrorKind::Timeout).matches(ErrorKind::Timeout));
        assert!(!ErrorMatcher::Kind(ErrorKind::Timeout).matches(ErrorKind::PathNotFound));
    }

    #[test]
    fn test_from_file_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("linear.json");
        std::fs::write(&path, linear().to_string()).unwrap();
        let def = PipelineDefinition::from_file(&path).unwrap();
        assert_eq!(def.name(), "linear");

        let missing = dir.path().join("missing.json");
        assert!(matches!(
            PipelineDefinition::from_file(&missing),
            Err(EngineError::Io { .. })
        ));
    }
}
