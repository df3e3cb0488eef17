//! Session configuration persisted as TOML.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::active::{LearnerOptions, SelectionPolicy};
use crate::app_dirs;
use crate::ml::TrainOptions;

/// Default filename used to store the session configuration.
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Everything needed to start a labeling session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Label names; a name's position is its label index.
    #[serde(default = "default_labels")]
    pub labels: Vec<String>,
    /// Feature table to load; a leading `~` is expanded.
    #[serde(default = "default_feature_file")]
    pub feature_file: PathBuf,
    /// Directory the table's flight paths are re-rooted onto.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Flights offered to the human per round.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Optional held-out label file; a missing file just disables validation.
    #[serde(default = "default_validation_file")]
    pub validation_file: Option<PathBuf>,
    #[serde(default)]
    pub classifier: TrainOptions,
    #[serde(default)]
    pub selection: SelectionPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            labels: default_labels(),
            feature_file: default_feature_file(),
            data_dir: default_data_dir(),
            batch_size: default_batch_size(),
            validation_file: default_validation_file(),
            classifier: TrainOptions::default(),
            selection: SelectionPolicy::default(),
        }
    }
}

impl SessionConfig {
    /// Reject settings the learner cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.labels.is_empty() {
            return Err(ConfigError::Invalid("at least one label is required".to_string()));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid("batch_size must be > 0".to_string()));
        }
        self.classifier
            .validate()
            .map_err(|err| ConfigError::Invalid(err.to_string()))
    }

    pub fn feature_path(&self) -> PathBuf {
        app_dirs::expand_home(&self.feature_file)
    }

    pub fn data_path(&self) -> PathBuf {
        app_dirs::expand_home(&self.data_dir)
    }

    pub fn validation_path(&self) -> Option<PathBuf> {
        self.validation_file
            .as_deref()
            .map(app_dirs::expand_home)
    }

    pub fn learner_options(&self) -> LearnerOptions {
        LearnerOptions {
            batch_size: self.batch_size,
            classifier: self.classifier.clone(),
            selection: self.selection,
        }
    }
}

/// Errors that may occur while loading or saving the session configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Unable to create config directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid config at {path}: {source}")]
    ParseToml {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Failed to serialize config to TOML at {path}: {source}")]
    SerializeToml {
        path: PathBuf,
        source: toml::ser::Error,
    },
    #[error("Invalid config: {0}")]
    Invalid(String),
    #[error("No suitable config directory found")]
    NoConfigDir,
}

/// Resolve the configuration file path, ensuring the parent directory exists.
pub fn config_path() -> Result<PathBuf, ConfigError> {
    let dir = app_dirs::app_root_dir().map_err(map_app_dir_error)?;
    Ok(dir.join(CONFIG_FILE_NAME))
}

/// Load the configuration from the app directory, returning defaults if missing.
pub fn load_or_default() -> Result<SessionConfig, ConfigError> {
    let path = config_path()?;
    if !path.exists() {
        info!(path = %path.display(), "No config file, using defaults");
        return Ok(SessionConfig::default());
    }
    load_from_path(&path)
}

/// Load configuration from an explicit TOML file.
pub fn load_from_path(path: &Path) -> Result<SessionConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let config: SessionConfig = toml::from_str(&text).map_err(|source| ConfigError::ParseToml {
        path: path.to_path_buf(),
        source,
    })?;
    info!(path = %path.display(), "Loaded session config");
    Ok(config)
}

/// Save configuration to a specific path, creating parent directories as needed.
pub fn save_to_path(config: &SessionConfig, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|source| ConfigError::CreateDir {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    let data = toml::to_string_pretty(config).map_err(|source| ConfigError::SerializeToml {
        path: path.to_path_buf(),
        source,
    })?;
    std::fs::write(path, data).map_err(|source| ConfigError::Write {
        path: path.to_path_buf(),
        source,
    })
}

fn default_labels() -> Vec<String> {
    ["Pattern Work", "Local Maneuvers", "Cross-Country"]
        .into_iter()
        .map(str::to_string)
        .collect()
}

fn default_feature_file() -> PathBuf {
    PathBuf::from("features.csv")
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_batch_size() -> usize {
    10
}

fn default_validation_file() -> Option<PathBuf> {
    Some(PathBuf::from("validation.csv"))
}

fn map_app_dir_error(error: app_dirs::AppDirError) -> ConfigError {
    match error {
        app_dirs::AppDirError::NoBaseDir => ConfigError::NoConfigDir,
        app_dirs::AppDirError::CreateDir { path, source } => {
            ConfigError::CreateDir { path, source }
        }
    }
}
