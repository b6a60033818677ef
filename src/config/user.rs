//! User configuration loading for blequeue.
//!
//! User config location: $XDG_CONFIG_HOME/blequeue/blequeue.toml
//! Fallback: the platform config directory (e.g. ~/.config/blequeue/blequeue.toml)

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

const CONFIG_DIR: &str = "blequeue";
const CONFIG_FILE: &str = "blequeue.toml";

/// Error while reading a configuration file.
#[derive(Debug, Error)]
pub enum UserConfigError {
    #[error("Failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to parse {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

pub type UserConfigResult<T> = Result<T, UserConfigError>;

/// Returns the path to the user configuration file.
///
/// The path is determined by:
/// 1. If $XDG_CONFIG_HOME is set: $XDG_CONFIG_HOME/blequeue/blequeue.toml
/// 2. Otherwise: `dirs::config_dir()`/blequeue/blequeue.toml
///
/// Returns None if no config directory can be determined.
pub fn user_config_path() -> Option<PathBuf> {
    if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME")
        && !xdg_config.is_empty()
    {
        return Some(PathBuf::from(xdg_config).join(CONFIG_DIR).join(CONFIG_FILE));
    }

    dirs::config_dir().map(|dir| dir.join(CONFIG_DIR).join(CONFIG_FILE))
}

/// Load the user configuration file as a raw TOML table.
///
/// Returns `Ok(None)` when the file does not exist.
pub fn load_user_config() -> UserConfigResult<Option<toml::Table>> {
    match user_config_path() {
        Some(path) if path.exists() => read_config_table(&path).map(Some),
        _ => Ok(None),
    }
}

/// Read `path` as a TOML table, validating it against the settings schema.
pub fn read_config_table(path: &Path) -> UserConfigResult<toml::Table> {
    let contents = fs::read_to_string(path).map_err(|source| UserConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let parse_error = |source| UserConfigError::Parse {
        path: path.to_path_buf(),
        source,
    };

    toml::from_str::<super::LinkSettings>(&contents).map_err(parse_error)?;
    toml::from_str::<toml::Table>(&contents).map_err(parse_error)
}
