//! `~/.strlab/config.toml`.
//!
//! Every section and key is optional; a missing file means defaults.

use std::time::Duration;
use std::{env, path::PathBuf};

use serde::Deserialize;
use strlab_types::PLATE_CAPACITY;
use thiserror::Error;

use crate::assigner::BatchPolicy;

/// Overrides the config file location.
pub const CONFIG_ENV_VAR: &str = "STRLAB_CONFIG";

// Default value function for serde (bool::default() is false, so only true needs a fn)
pub(crate) const fn default_true() -> bool {
    true
}

#[derive(Debug, Default, Deserialize)]
pub struct LabConfig {
    pub store: Option<StoreConfig>,
    pub results: Option<ResultsConfig>,
    pub workflow: Option<WorkflowConfig>,
}

#[derive(Debug, Default, Deserialize)]
pub struct StoreConfig {
    /// SQLite database file. `~` and `${VAR}` are expanded.
    pub path: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ResultsConfig {
    /// Directory the analysis software writes result files into.
    pub output_dir: Option<String>,
    pub extension: Option<String>,
    pub poll_interval_ms: Option<u64>,
    pub ingest_timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct WorkflowConfig {
    pub sweep_interval_secs: Option<u64>,
    pub min_batch_size: Option<usize>,
    pub max_batch_size: Option<usize>,
    /// Promote completed stages to the next stage's ready state on each sweep.
    #[serde(default = "default_true")]
    pub auto_advance: bool,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Fully resolved settings with defaults applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub db_path: PathBuf,
    pub output_dir: PathBuf,
    pub extension: String,
    pub poll_interval: Duration,
    pub ingest_timeout: Duration,
    pub sweep_interval: Duration,
    pub batch_policy: BatchPolicy,
    pub auto_advance: bool,
}

impl Default for Settings {
    fn default() -> Self {
        let base = data_dir();
        Self {
            db_path: base.join("lab.db"),
            output_dir: base.join("results"),
            extension: "json".to_string(),
            poll_interval: Duration::from_millis(2000),
            ingest_timeout: Duration::from_secs(120),
            sweep_interval: Duration::from_secs(60),
            batch_policy: BatchPolicy::default(),
            auto_advance: true,
        }
    }
}

impl LabConfig {
    /// Load from `$STRLAB_CONFIG` or `~/.strlab/config.toml`. `Ok(None)` when absent.
    pub fn load() -> Result<Option<Self>, ConfigError> {
        let Some(path) = config_path() else {
            return Ok(None);
        };
        if !path.exists() {
            return Ok(None);
        }
        Self::load_from(path).map(Some)
    }

    pub fn load_from(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(err) => {
                tracing::warn!("Failed to read config at {:?}: {}", path, err);
                return Err(ConfigError::Read { path, source: err });
            }
        };
        match toml::from_str(&content) {
            Ok(config) => Ok(config),
            Err(err) => {
                tracing::warn!("Failed to parse config at {:?}: {}", path, err);
                Err(ConfigError::Parse { path, source: err })
            }
        }
    }

    /// Apply defaults and validate.
    pub fn resolve(&self) -> Result<Settings, ConfigError> {
        let defaults = Settings::default();
        let store = self.store.as_ref();
        let results = self.results.as_ref();
        let workflow = self.workflow.as_ref();

        let min_batch_size = workflow
            .and_then(|w| w.min_batch_size)
            .unwrap_or(defaults.batch_policy.min_batch_size);
        let max_batch_size = workflow
            .and_then(|w| w.max_batch_size)
            .unwrap_or(defaults.batch_policy.max_batch_size);
        if max_batch_size == 0 || max_batch_size > PLATE_CAPACITY {
            return Err(ConfigError::Invalid(format!(
                "workflow.max_batch_size must be between 1 and {PLATE_CAPACITY}, got {max_batch_size}"
            )));
        }
        if min_batch_size == 0 || min_batch_size > max_batch_size {
            return Err(ConfigError::Invalid(format!(
                "workflow.min_batch_size must be between 1 and max_batch_size ({max_batch_size}), got {min_batch_size}"
            )));
        }

        let extension = results
            .and_then(|r| r.extension.as_deref())
            .map(|ext| ext.trim().trim_start_matches('.').to_string())
            .unwrap_or(defaults.extension);
        if extension.is_empty() {
            return Err(ConfigError::Invalid(
                "results.extension must not be empty".to_string(),
            ));
        }

        let poll_interval = results
            .and_then(|r| r.poll_interval_ms)
            .map(Duration::from_millis)
            .unwrap_or(defaults.poll_interval);
        let ingest_timeout = results
            .and_then(|r| r.ingest_timeout_secs)
            .map(Duration::from_secs)
            .unwrap_or(defaults.ingest_timeout);
        let sweep_interval = workflow
            .and_then(|w| w.sweep_interval_secs)
            .map(Duration::from_secs)
            .unwrap_or(defaults.sweep_interval);
        for (key, value) in [
            ("results.poll_interval_ms", poll_interval),
            ("results.ingest_timeout_secs", ingest_timeout),
            ("workflow.sweep_interval_secs", sweep_interval),
        ] {
            if value.is_zero() {
                return Err(ConfigError::Invalid(format!("{key} must be greater than 0")));
            }
        }

        Ok(Settings {
            db_path: store
                .and_then(|s| s.path.as_deref())
                .map(expand_path)
                .unwrap_or(defaults.db_path),
            output_dir: results
                .and_then(|r| r.output_dir.as_deref())
                .map(expand_path)
                .unwrap_or(defaults.output_dir),
            extension,
            poll_interval,
            ingest_timeout,
            sweep_interval,
            batch_policy: BatchPolicy {
                min_batch_size,
                max_batch_size,
            },
            auto_advance: workflow.is_none_or(|w| w.auto_advance),
        })
    }
}

pub fn config_path() -> Option<PathBuf> {
    if let Ok(path) = env::var(CONFIG_ENV_VAR)
        && !path.trim().is_empty()
    {
        return Some(expand_path(&path));
    }
    dirs::home_dir().map(|home| home.join(".strlab").join("config.toml"))
}

/// `~/.strlab`, or `./.strlab` when there is no home directory.
#[must_use]
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".strlab"))
        .unwrap_or_else(|| PathBuf::from(".strlab"))
}

pub fn expand_env_vars(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let var = &after[..end];
                if !var.is_empty() {
                    out.push_str(&env::var(var).unwrap_or_default());
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }

    out.push_str(rest);
    out
}

/// Expand `${VAR}` and a leading `~/`.
#[must_use]
pub fn expand_path(value: &str) -> PathBuf {
    let expanded = expand_env_vars(value.trim());
    if let Some(rest) = expanded.strip_prefix("~/")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(rest);
    }
    PathBuf::from(expanded)
}
