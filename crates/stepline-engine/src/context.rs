//! The context document threaded through an execution.
//!
//! A [`ContextDocument`] is always a JSON object. States read from it through
//! path expressions and write to it only through [`ResultPath`] merges, which
//! replace exactly one subtree and leave sibling keys untouched.

use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{EngineError, Failure};

/// Where a state's output lands in the context document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResultPath {
    /// Output is dropped; the context is unchanged.
    Discard,
    /// Output replaces the subtree at these object keys (`$.a.b` → `["a", "b"]`).
    At(Vec<String>),
}

impl ResultPath {
    /// Parse a result path. `None` means discard.
    ///
    /// Only object-key paths with at least one segment are accepted; writing
    /// the document root or an array element is rejected.
    pub fn parse(raw: Option<&str>) -> Result<Self, String> {
        let Some(raw) = raw else {
            return Ok(ResultPath::Discard);
        };
        let rest = raw
            .strip_prefix("$.")
            .ok_or_else(|| format!("result path '{}' must start with '$.'", raw))?;
        let mut segments = Vec::new();
        for part in rest.split('.') {
            if part.is_empty() {
                return Err(format!("result path '{}' has an empty segment", raw));
            }
            if part.contains('[') || part.contains(']') || part.starts_with('$') {
                return Err(format!(
                    "result path '{}' may only name object keys (found '{}')",
                    raw, part
                ));
            }
            segments.push(part.to_string());
        }
        Ok(ResultPath::At(segments))
    }
}

impl fmt::Display for ResultPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResultPath::Discard => write!(f, "null"),
            ResultPath::At(segments) => write!(f, "$.{}", segments.join(".")),
        }
    }
}

/// Mutable working document of one execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextDocument(Value);

impl Default for ContextDocument {
    fn default() -> Self {
        Self::new()
    }
}

impl ContextDocument {
    /// An empty object document.
    pub fn new() -> Self {
        Self(Value::Object(Map::new()))
    }

    /// Wrap a caller-supplied value; it must be a JSON object.
    pub fn from_value(value: Value) -> Result<Self, EngineError> {
        match value {
            Value::Object(_) => Ok(Self(value)),
            other => Err(EngineError::InvalidInput(format!(
                "initial context must be a JSON object, got {}",
                type_name(&other)
            ))),
        }
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }

    /// Merge `value` at `path`, creating intermediate objects as needed.
    ///
    /// An existing intermediate that is not an object is never overwritten;
    /// the merge fails with `PathNotFound` instead.
    pub fn merge_at(&mut self, path: &ResultPath, value: Value) -> Result<(), Failure> {
        let segments = match path {
            ResultPath::Discard => return Ok(()),
            ResultPath::At(segments) => segments,
        };
        let Some((last, parents)) = segments.split_last() else {
            return Ok(());
        };

        let mut current = &mut self.0;
        let mut walked = String::from("$");
        for segment in parents {
            let map = current.as_object_mut().ok_or_else(|| {
                Failure::path_not_found(format!(
                    "cannot merge at '{}': '{}' is not an object",
                    path, walked
                ))
            })?;
            walked.push('.');
            walked.push_str(segment);
            current = map
                .entry(segment.clone())
                .or_insert_with(|| Value::Object(Map::new()));
        }

        let map = current.as_object_mut().ok_or_else(|| {
            Failure::path_not_found(format!(
                "cannot merge at '{}': '{}' is not an object",
                path, walked
            ))
        })?;
        map.insert(last.clone(), value);
        Ok(())
    }
}

/// Read-only execution metadata, addressed with the `$$` root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionMeta {
    pub execution_id: String,
    pub pipeline_name: String,
    pub start_time: DateTime<Utc>,
    /// Final contexts of upstream pipelines' latest successful runs.
    #[serde(default)]
    pub upstream: Map<String, Value>,
}

impl ExecutionMeta {
    pub fn new(execution_id: impl Into<String>, pipeline_name: impl Into<String>) -> Self {
        Self {
            execution_id: execution_id.into(),
            pipeline_name: pipeline_name.into(),
            start_time: Utc::now(),
            upstream: Map::new(),
        }
    }

    /// Render the metadata namespace as seen from `state_name`.
    pub fn to_value(&self, state_name: &str) -> Value {
        let mut map = Map::new();
        map.insert("executionId".into(), Value::String(self.execution_id.clone()));
        map.insert(
            "pipelineName".into(),
            Value::String(self.pipeline_name.clone()),
        );
        map.insert(
            "startTime".into(),
            Value::String(self.start_time.to_rfc3339_opts(SecondsFormat::Secs, true)),
        );
        map.insert("stateName".into(), Value::String(state_name.to_string()));
        map.insert("upstream".into(), Value::Object(self.upstream.clone()));
        Value::Object(map)
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
