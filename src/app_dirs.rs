//! Application directory helpers anchored to a single `.flightlabel` folder.
//!
//! The helpers centralize where the session config and log files live across
//! platforms, defaulting to the OS config directory and allowing a
//! `FLIGHTLABEL_CONFIG_HOME` override for tests or portable setups.

use std::path::{Path, PathBuf};

use directories::BaseDirs;
use thiserror::Error;

const APP_DIR_NAME: &str = ".flightlabel";
const LOGS_DIR_NAME: &str = "logs";
/// Environment variable overriding the config base directory.
pub const CONFIG_HOME_ENV: &str = "FLIGHTLABEL_CONFIG_HOME";

#[derive(Debug, Error)]
pub enum AppDirError {
    #[error("No suitable base config directory available for application files")]
    NoBaseDir,
    #[error("Failed to create application directory at {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Return the root `.flightlabel` directory, creating it if needed.
pub fn app_root_dir() -> Result<PathBuf, AppDirError> {
    let base = config_base_dir().ok_or(AppDirError::NoBaseDir)?;
    ensure_dir(base.join(APP_DIR_NAME))
}

/// Return the logs directory inside the app root, creating it if needed.
pub fn logs_dir() -> Result<PathBuf, AppDirError> {
    ensure_dir(app_root_dir()?.join(LOGS_DIR_NAME))
}

/// Expand a leading `~` to the user's home directory.
///
/// Paths without the prefix, or hosts without a resolvable home, are returned unchanged.
pub fn expand_home(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match BaseDirs::new() {
        Some(dirs) => dirs.home_dir().join(rest),
        None => path.to_path_buf(),
    }
}

fn ensure_dir(path: PathBuf) -> Result<PathBuf, AppDirError> {
    std::fs::create_dir_all(&path).map_err(|source| AppDirError::CreateDir {
        path: path.clone(),
        source,
    })?;
    Ok(path)
}

fn config_base_dir() -> Option<PathBuf> {
    #[cfg(test)]
    if let Some(path) = test_override::current() {
        return Some(path);
    }
    if let Some(path) = std::env::var_os(CONFIG_HOME_ENV) {
        return Some(PathBuf::from(path));
    }
    BaseDirs::new().map(|dirs| dirs.config_dir().to_path_buf())
}


#[cfg(test)]
pub(crate) use test_override::ConfigBaseGuard;
