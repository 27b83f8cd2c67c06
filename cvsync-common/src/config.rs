//! Configuration file discovery and root folder resolution

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, warn};

/// Environment variable naming the dataset root folder
pub const ROOT_FOLDER_ENV: &str = "CVSYNC_ROOT";

/// Environment variable naming an explicit TOML config file
pub const CONFIG_FILE_ENV: &str = "CVSYNC_CONFIG";

/// Root folder resolution, highest priority first:
/// 1. Command-line argument
/// 2. `CVSYNC_ROOT` environment variable
/// 3. `root_folder` from the TOML config file
/// 4. Current working directory
#[derive(Debug, Clone, Default)]
pub struct RootFolderResolver {
    cli_arg: Option<PathBuf>,
    config_value: Option<PathBuf>,
}

impl RootFolderResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the value passed on the command line (if any)
    pub fn with_cli_arg(mut self, path: Option<PathBuf>) -> Self {
        self.cli_arg = path;
        self
    }

    /// Set the value read from the TOML config file (if any)
    pub fn with_config_value(mut self, path: Option<PathBuf>) -> Self {
        self.config_value = path;
        self
    }

    /// Resolve the root folder
    pub fn resolve(&self) -> PathBuf {
        if let Some(path) = &self.cli_arg {
            debug!(path = %path.display(), "Root folder from command line");
            return path.clone();
        }

        if let Ok(path) = std::env::var(ROOT_FOLDER_ENV) {
            if !path.trim().is_empty() {
                debug!(path = %path, "Root folder from environment");
                return PathBuf::from(path);
            }
        }

        if let Some(path) = &self.config_value {
            debug!(path = %path.display(), "Root folder from config file");
            return path.clone();
        }

        std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
    }
}

/// Default per-user config file location (`<config dir>/cvsync/config.toml`)
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("cvsync").join("config.toml"))
}

/// Locate the TOML config file to load.
///
/// An explicit path (CLI or `CVSYNC_CONFIG`) is returned even if it does not
/// exist so the caller can report it; the default location is only returned
/// when present.
pub fn locate_config_file(cli_arg: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    if let Ok(path) = std::env::var(CONFIG_FILE_ENV) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    default_config_path().filter(|p| p.exists())
}

/// Parse a TOML file into `T`
pub fn load_toml_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)?;
    let value = toml::from_str(&content)?;
    Ok(value)
}

/// Load a TOML config, falling back to `T::default()` when the file is absent.
///
/// A missing file is not an error (warning only). A file that exists but does
/// not parse is a configuration error.
pub fn load_toml_or_default<T>(path: Option<&Path>) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    let Some(path) = path else {
        debug!("No config file found, using compiled defaults");
        return Ok(T::default());
    };

    if !path.exists() {
        warn!(
            path = %path.display(),
            "Config file not found, using compiled defaults"
        );
        return Ok(T::default());
    }

    load_toml_file(path)
        .map_err(|e| Error::Config(format!("Failed to load {}: {}", path.display(), e)))
}

/// Read and parse an environment variable override.
///
/// Unset or blank variables yield `Ok(None)`; unparseable values are
/// configuration errors rather than silently ignored.
pub fn env_override<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| Error::Config(format!("{}={:?}: {}", name, raw, e))),
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Default, Deserialize, PartialEq)]
    struct Sample {
        #[serde(default)]
        concurrency: Option<usize>,
    }

    #[test]
    fn test_load_toml_or_default_missing_file_uses_default() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.toml");
        let loaded: Sample = load_toml_or_default(Some(&missing)).unwrap();
        assert_eq!(loaded, Sample::default());
    }

    #[test]
    fn test_load_toml_or_default_none_uses_default() {
        let loaded: Sample = load_toml_or_default(None).unwrap();
        assert_eq!(loaded.concurrency, None);
    }

    #[test]
    fn test_load_toml_or_default_invalid_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "concurrency = [not toml").unwrap();
        let result: Result<Sample> = load_toml_or_default(Some(&path));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_locate_config_file_prefers_cli() {
        let path = PathBuf::from("/tmp/explicit.toml");
        assert_eq!(locate_config_file(Some(&path)), Some(path));
    }
}
