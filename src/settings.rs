//! Layered settings for the `recordkeeper` binary.
//!
//! Sources, later ones overriding earlier ones:
//! 1. built-in defaults
//! 2. `recordkeeper.toml` in the working directory, or the file named by
//!    `RECORDKEEPER_CONFIG` (optional either way)
//! 3. `RECORDKEEPER_*` environment variables, with `RECORDKEEPER_INCLUDE_DIRS`
//!    taking a comma separated list

use std::path::PathBuf;

use config::{Config, Environment, File};
use serde::Deserialize;

use crate::error::Result;

pub const DEFAULT_CONFIG_FILE: &str = "recordkeeper.toml";
pub const CONFIG_PATH_VARIABLE: &str = "RECORDKEEPER_CONFIG";

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Settings {
    /// Searched in order when resolving `include` directives.
    #[serde(default)]
    pub include_dirs: Vec<PathBuf>,
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
    /// Record description to load when none is given on the command line.
    #[serde(default)]
    pub input: Option<PathBuf>,
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            include_dirs: Vec::new(),
            log_filter: default_log_filter(),
            input: None,
        }
    }
}

impl Settings {
    /// Loads from the default file location (or `RECORDKEEPER_CONFIG`) and
    /// the process environment.
    pub fn load() -> Result<Self> {
        let file = std::env::var(CONFIG_PATH_VARIABLE)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILE));
        Self::load_from(&file)
    }

    pub fn load_from(file: &std::path::Path) -> Result<Self> {
        let settings = Config::builder()
            .set_default("log_filter", default_log_filter())?
            .add_source(File::from(file).required(false))
            .add_source(
                Environment::with_prefix("RECORDKEEPER")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("include_dirs"),
            )
            .build()?;
        Ok(settings.try_deserialize()?)
    }
}
