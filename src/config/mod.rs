//! Configuration Management
//!
//! Loads the application configuration: file-defined data sources, the
//! completion backend, where persisted connections live, and query limits.
//!
//! # Configuration Locations
//! - Explicit: `--config <path>` or `MAETRIK_CONFIG`
//! - Local: `.maetrik/config.json` (team-shareable, per-project)
//! - Global: `~/.config/maetrik/config.json` (per-user)
//!
//! The first location that applies wins; files are not merged. With no file at
//! all the defaults are used.
//!
//! # Environment Interpolation
//! Every string value may reference `${VAR}`. References are replaced before
//! the file is validated; an unset variable becomes the empty string.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::{Captures, Regex};
use tracing::debug;

use crate::driver::DataSourceConfig;
use crate::error::{MaetrikError, Result};
use crate::query::DEFAULT_MAX_ROWS;

/// Environment variable naming an explicit config file
pub const CONFIG_ENV: &str = "MAETRIK_CONFIG";

static ENV_REFERENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([^}]+)\}").expect("Invalid env reference pattern"));

/// Top-level configuration file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaetrikConfig {
    /// Connections defined in the file itself (the `file` source)
    #[serde(default)]
    pub data_sources: Vec<DataSourceConfig>,

    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub state_storage: StateStorageConfig,

    #[serde(default)]
    pub query: QueryConfig,
}

/// Completion backend selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmConfig {
    /// `ollama` or `openai`
    #[serde(default = "default_llm_driver")]
    pub driver: String,

    /// Backend default when unset (`llama3` for Ollama, `gpt-4o` for OpenAI)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self { driver: default_llm_driver(), model: None, base_url: None, api_key: None }
    }
}

fn default_llm_driver() -> String {
    crate::llm::ollama::NAME.to_string()
}

/// Where persisted connections are kept
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateStorageConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl StateStorageConfig {
    /// Configured path, or `~/.config/maetrik/connections.json`
    pub fn resolved_path(&self) -> Result<PathBuf> {
        match &self.path {
            Some(path) => Ok(path.clone()),
            None => default_state_path(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryConfig {
    /// Row cap suggested to the model in every translation prompt
    #[serde(default = "default_max_rows")]
    pub max_rows: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self { max_rows: default_max_rows() }
    }
}

fn default_max_rows() -> usize {
    DEFAULT_MAX_ROWS
}

/// Configuration file location
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigLocation {
    /// Given on the command line or through `MAETRIK_CONFIG`
    Explicit(PathBuf),
    /// `.maetrik/config.json` under the current directory
    Local(PathBuf),
    /// `~/.config/maetrik/config.json`
    Global(PathBuf),
}

impl ConfigLocation {
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            Self::Explicit(path) | Self::Local(path) | Self::Global(path) => path,
        }
    }
}

/// Get path to local config file (`.maetrik/config.json`)
pub fn local_config_path() -> Result<PathBuf> {
    let current_dir = std::env::current_dir().map_err(|e| {
        MaetrikError::config_error(format!("Could not determine current directory: {e}"))
    })?;

    Ok(current_dir.join(".maetrik").join("config.json"))
}

fn maetrik_config_dir() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or_else(|| MaetrikError::config_error("Could not determine user config directory"))?;

    Ok(config_dir.join("maetrik"))
}

/// Get path to global config file (`~/.config/maetrik/config.json`)
pub fn global_config_path() -> Result<PathBuf> {
    Ok(maetrik_config_dir()?.join("config.json"))
}

/// Get path to the persisted connection file (`~/.config/maetrik/connections.json`)
pub fn default_state_path() -> Result<PathBuf> {
    Ok(maetrik_config_dir()?.join("connections.json"))
}

/// Pick the config file to load
///
/// An explicit path must exist. Otherwise local beats global, and `None`
/// means neither file is present.
pub fn locate(explicit: Option<&Path>) -> Result<Option<ConfigLocation>> {
    let explicit = explicit
        .map(Path::to_path_buf)
        .or_else(|| std::env::var_os(CONFIG_ENV).filter(|v| !v.is_empty()).map(PathBuf::from));

    if let Some(path) = explicit {
        if !path.exists() {
            return Err(MaetrikError::config_error(format!(
                "Config file not found: {}",
                path.display()
            )));
        }
        return Ok(Some(ConfigLocation::Explicit(path)));
    }

    let local = local_config_path()?;
    if local.exists() {
        return Ok(Some(ConfigLocation::Local(local)));
    }

    let global = global_config_path()?;
    if global.exists() {
        return Ok(Some(ConfigLocation::Global(global)));
    }

    Ok(None)
}

impl MaetrikConfig {
    /// Locate and load the configuration, falling back to defaults
    pub fn load(explicit: Option<&Path>) -> Result<(Self, Option<ConfigLocation>)> {
        match locate(explicit)? {
            Some(location) => {
                let config = load_config(location.path())?;
                debug!(path = %location.path().display(), "Loaded configuration");
                Ok((config, Some(location)))
            }
            None => {
                debug!("No configuration file found, using defaults");
                Ok((Self::default(), None))
            }
        }
    }

    /// Reject values that parse but cannot work
    pub fn validate(&self) -> Result<()> {
        if self.llm.driver.trim().is_empty() {
            return Err(MaetrikError::config_error("llm.driver must not be empty"));
        }
        if self.query.max_rows == 0 {
            return Err(MaetrikError::config_error("query.maxRows must be greater than zero"));
        }
        if let Some(config) = self.data_sources.iter().find(|c| c.source_type.trim().is_empty()) {
            return Err(MaetrikError::config_error(format!(
                "Data source '{}' has no type",
                config.id
            )));
        }
        Ok(())
    }
}

/// Load and validate one config file, interpolating `${VAR}` from the process environment
pub fn load_config(path: &Path) -> Result<MaetrikConfig> {
    let contents = fs::read_to_string(path)
        .map_err(|e| MaetrikError::config_error(format!("Could not read config file: {e}")))?;

    parse_config(&contents, &|name| std::env::var(name).ok())
}

/// Parse config text with a caller-supplied variable lookup
pub fn parse_config(contents: &str, lookup: &dyn Fn(&str) -> Option<String>) -> Result<MaetrikConfig> {
    let mut raw: Value = serde_json::from_str(contents)
        .map_err(|e| MaetrikError::config_error(format!("Invalid config file format: {e}")))?;

    interpolate(&mut raw, lookup);

    let config: MaetrikConfig = serde_json::from_value(raw)
        .map_err(|e| MaetrikError::config_error(format!("Invalid config file format: {e}")))?;
    config.validate()?;
    Ok(config)
}

/// Replace `${VAR}` in every string of `value`, recursively
pub fn interpolate(value: &mut Value, lookup: &dyn Fn(&str) -> Option<String>) {
    match value {
        Value::String(text) => {
            if ENV_REFERENCE.is_match(text) {
                let replaced = ENV_REFERENCE
                    .replace_all(text, |caps: &Captures| lookup(&caps[1]).unwrap_or_default())
                    .into_owned();
                *text = replaced;
            }
        }
        Value::Array(items) => items.iter_mut().for_each(|item| interpolate(item, lookup)),
        Value::Object(map) => map.values_mut().for_each(|item| interpolate(item, lookup)),
        _ => {}
    }
}
