//! Configuration system for the stepline pipeline runner.
//!
//! Provides TOML-based configuration with:
//! - Engine tuning (`[engine]`): poll interval, default task timeout, cancel grace
//! - Pipeline definition directory (`[pipelines]`)
//! - Cron triggers (`[[triggers]]`)
//! - Simulated connector behaviour (`[connectors]`)
//! - Log output (`[logging]`)
//!
//! Config files are layered: the user config directory first, then a
//! project-local `stepline.toml`.

pub mod discovery;
pub mod error;
pub mod types;

pub use discovery::{LoadedConfig, PROJECT_CONFIG_FILE, USER_CONFIG_FILE, load};
pub use error::{ConfigError, Result};
pub use types::*;
