//! Locating and layering config files.
//!
//! Two optional layers, later wins:
//! 1. `config.toml` in the user config directory (`--config-dir`, or
//!    `stepline` under the platform config dir)
//! 2. `stepline.toml` in the working directory

use std::path::{Path, PathBuf};

use crate::{ConfigError, Result, StepLineConfig};

pub const USER_CONFIG_FILE: &str = "config.toml";
pub const PROJECT_CONFIG_FILE: &str = "stepline.toml";

/// Merged config plus what went into it.
#[derive(Debug, Clone, Default)]
pub struct LoadedConfig {
    pub config: StepLineConfig,
    /// Files that were merged, lowest precedence first.
    pub loaded: Vec<PathBuf>,
    /// Files that exist but were skipped.
    pub warnings: Vec<String>,
}

/// Load and merge every config layer that exists.
///
/// A layer that fails to read, parse or validate is skipped with a warning;
/// the remaining layers still apply.
pub fn load(config_dir: Option<&Path>) -> LoadedConfig {
    let user_dir = config_dir
        .map(Path::to_path_buf)
        .or_else(|| dirs::config_dir().map(|d| d.join("stepline")));
    let user_file = user_dir.map(|d| d.join(USER_CONFIG_FILE));
    load_layers(user_file.iter().map(PathBuf::as_path).chain([Path::new(PROJECT_CONFIG_FILE)]))
}

fn load_layers<'a>(paths: impl IntoIterator<Item = &'a Path>) -> LoadedConfig {
    let mut loaded = LoadedConfig::default();
    for path in paths {
        if !path.is_file() {
            continue;
        }
        match read_layer(path) {
            Ok(layer) => {
                loaded.config.merge(layer);
                loaded.loaded.push(path.to_path_buf());
            }
            Err(e) => loaded
                .warnings
                .push(format!("ignoring {}: {}", path.display(), e)),
        }
    }
    loaded
}

fn read_layer(path: &Path) -> Result<StepLineConfig> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.display().to_string(),
        source: e,
    })?;
    StepLineConfig::from_toml(&contents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, contents: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_missing_layers_give_defaults() {
        let dir = TempDir::new().unwrap();
        let loaded = load_layers([
            dir.path().join(USER_CONFIG_FILE).as_path(),
            dir.path().join(PROJECT_CONFIG_FILE).as_path(),
        ]);
        assert_eq!(loaded.config, StepLineConfig::new());
        assert!(loaded.loaded.is_empty());
        assert!(loaded.warnings.is_empty());
    }

    #[test]
    fn test_project_layer_overrides_user_layer() {
        let dir = TempDir::new().unwrap();
        let user = write(
            &dir,
            USER_CONFIG_FILE,
            r#"
[engine]
poll_interval_ms = 1000

[[triggers]]
pipeline = "fraud-training"
cron = "0 2 * * *"

[[triggers]]
pipeline = "fraud-inference"
cron = "0 6 * * *"
"#,
        );
        let project = write(
            &dir,
            PROJECT_CONFIG_FILE,
            r#"
[pipelines]
dir = "defs"

[[triggers]]
pipeline = "fraud-training"
cron = "hourly"
"#,
        );

        let loaded = load_layers([user.as_path(), project.as_path()]);
        let config = &loaded.config;
        assert_eq!(config.engine().poll_interval_ms, 1000);
        assert_eq!(config.pipelines().dir, PathBuf::from("defs"));
        assert_eq!(config.triggers.len(), 2);
        let training = config
            .triggers
            .iter()
            .find(|t| t.pipeline == "fraud-training")
            .unwrap();
        assert_eq!(training.cron, "hourly");
        assert_eq!(loaded.loaded, vec![user, project]);
    }

    #[test]
    fn test_invalid_layer_is_skipped_with_warning() {
        let dir = TempDir::new().unwrap();
        let user = write(&dir, USER_CONFIG_FILE, "[engine]\npoll_interval_ms = 0\n");
        let project = write(&dir, PROJECT_CONFIG_FILE, "[connectors]\nlatency_ms = 10\n");

        let loaded = load_layers([user.as_path(), project.as_path()]);
        assert_eq!(loaded.warnings.len(), 1);
        assert!(loaded.warnings[0].contains("poll_interval_ms"));
        assert_eq!(loaded.config.engine().poll_interval_ms, 5_000);
        assert_eq!(loaded.config.connectors().latency_ms, 10);
        assert_eq!(loaded.loaded, vec![project]);
    }

    #[test]
    fn test_unparseable_layer_names_the_file() {
        let dir = TempDir::new().unwrap();
        let user = write(&dir, USER_CONFIG_FILE, "this is not valid toml {{{{");

        let loaded = load_layers([user.as_path()]);
        assert!(loaded.loaded.is_empty());
        assert!(loaded.warnings[0].contains(&user.display().to_string()));
    }

    #[test]
    fn test_config_dir_selects_user_file() {
        let dir = TempDir::new().unwrap();
        write(&dir, USER_CONFIG_FILE, "[connectors]\nlatency_ms = 25\n");

        let loaded = load(Some(dir.path()));
        assert_eq!(loaded.config.connectors().latency_ms, 25);
        assert_eq!(loaded.loaded[0], dir.path().join(USER_CONFIG_FILE));
    }
}
