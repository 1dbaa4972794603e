//! Pipeline definition directory loader.
//!
//! Loads every `*.json` and `*.toml` file in a directory. Each file yields a
//! [`LoadEvent`]; an invalid file is reported without stopping the others.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::definition::PipelineDefinition;
use crate::error::EngineError;

/// Outcome of loading one definition file.
#[derive(Debug, Clone)]
pub enum LoadEvent {
    /// A pipeline was parsed and validated.
    Loaded {
        name: String,
        path: PathBuf,
        definition: Box<PipelineDefinition>,
    },
    /// A file failed to parse or validate.
    Error { path: PathBuf, error: String },
}

impl LoadEvent {
    pub fn path(&self) -> &Path {
        match self {
            LoadEvent::Loaded { path, .. } | LoadEvent::Error { path, .. } => path,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, LoadEvent::Error { .. })
    }
}

/// Load all pipeline files in `dir`, in file-name order.
///
/// A second file declaring an already-loaded pipeline name is reported as an
/// error event.
pub fn load_dir(dir: &Path) -> Result<Vec<LoadEvent>, EngineError> {
    let entries = std::fs::read_dir(dir).map_err(|source| EngineError::Io {
        path: dir.display().to_string(),
        source,
    })?;

    let mut paths: Vec<PathBuf> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && is_pipeline_file(path))
        .collect();
    paths.sort();

    let mut seen: HashMap<String, PathBuf> = HashMap::new();
    let mut events = Vec::with_capacity(paths.len());
    for path in paths {
        let event = match load_file(&path) {
            LoadEvent::Loaded { name, .. } if seen.contains_key(&name) => {
                let first = &seen[&name];
                warn!(
                    "Duplicate pipeline '{}' in {} (already loaded from {})",
                    name,
                    path.display(),
                    first.display()
                );
                LoadEvent::Error {
                    error: format!(
                        "pipeline '{}' is already defined in {}",
                        name,
                        first.display()
                    ),
                    path,
                }
            }
            event => {
                if let LoadEvent::Loaded { name, path, .. } = &event {
                    seen.insert(name.clone(), path.clone());
                }
                event
            }
        };
        events.push(event);
    }

    info!("Loaded {} pipelines from {}", seen.len(), dir.display());
    Ok(events)
}

fn load_file(path: &Path) -> LoadEvent {
    debug!("Loading pipeline file: {}", path.display());
    match PipelineDefinition::from_file(path) {
        Ok(definition) => {
            let name = definition.name().to_string();
            info!("Pipeline loaded: {} (from {})", name, path.display());
            LoadEvent::Loaded {
                name,
                path: path.to_path_buf(),
                definition: Box::new(definition),
            }
        }
        Err(e) => {
            warn!("Failed to load {}: {}", path.display(), e);
            LoadEvent::Error {
                path: path.to_path_buf(),
                error: e.to_string(),
            }
        }
    }
}

fn is_pipeline_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|ext| ext.to_str()),
        Some("json") | Some("toml")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_pipeline(dir: &Path, filename: &str, name: &str) {
        let content = format!(
            r#"{{
  "name": "{name}",
  "startState": "Done",
  "states": {{ "Done": {{ "type": "Succeed" }} }}
}}"#
        );
        std::fs::write(dir.join(filename), content).unwrap();
    }

    fn write_toml_pipeline(dir: &Path, filename: &str, name: &str) {
        let content = format!(
            r#"
name = "{name}"
startState = "Done"

[states.Done]
type = "Succeed"
"#
        );
        std::fs::write(dir.join(filename), content).unwrap();
    }

    fn loaded_names(events: &[LoadEvent]) -> Vec<&str> {
        events
            .iter()
            .filter_map(|e| match e {
                LoadEvent::Loaded { name, .. } => Some(name.as_str()),
                LoadEvent::Error { .. } => None,
            })
            .collect()
    }

    #[test]
    fn test_load_empty_directory() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_dir(dir.path()).unwrap().is_empty());
    }

    #[test]
    fn test_load_json_and_toml() {
        let dir = tempfile::tempdir().unwrap();
        write_pipeline(dir.path(), "a.json", "alpha");
        write_toml_pipeline(dir.path(), "b.toml", "beta");

        let events = load_dir(dir.path()).unwrap();
        assert_eq!(loaded_names(&events), vec!["alpha", "beta"]);
    }

    #[test]
    fn test_invalid_file_doesnt_stop_others() {
        let dir = tempfile::tempdir().unwrap();
        write_pipeline(dir.path(), "good.json", "good");
        std::fs::write(dir.path().join("bad.json"), "{ not json").unwrap();

        let events = load_dir(dir.path()).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(loaded_names(&events), vec!["good"]);
        let errors: Vec<_> = events.iter().filter(|e| e.is_error()).collect();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].path().ends_with("bad.json"));
    }

    #[test]
    fn test_skips_other_files() {
        let dir = tempfile::tempdir().unwrap();
        write_pipeline(dir.path(), "real.json", "real");
        std::fs::write(dir.path().join("readme.md"), "# not a pipeline").unwrap();

        let events = load_dir(dir.path()).unwrap();
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn test_duplicate_name_reported() {
        let dir = tempfile::tempdir().unwrap();
        write_pipeline(dir.path(), "a.json", "same");
        write_toml_pipeline(dir.path(), "b.toml", "same");

        let events = load_dir(dir.path()).unwrap();
        assert_eq!(loaded_names(&events), vec!["same"]);
        assert!(matches!(&events[1], LoadEvent::Error { error, .. } if error.contains("already defined")));
    }

    #[test]
    fn test_missing_directory_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_dir(&dir.path().join("missing")).unwrap_err();
        assert!(matches!(err, EngineError::Io { .. }));
    }
}
