//! Config file loading.
//!
//! An explicitly requested file must exist and parse — that failure is fatal
//! at startup. Without an explicit path, the loader searches
//! `./config.yaml` then `~/.aisbot/config.yaml` and falls back to defaults
//! when neither exists.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::schema::Config;
use crate::utils;

/// Startup configuration failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },
    #[error("config file not found: {0}")]
    NotFound(PathBuf),
}

/// Load configuration from `path`, or from the default search locations.
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    if let Some(path) = path {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        return read_config(path);
    }

    for candidate in default_search_paths() {
        if candidate.exists() {
            return read_config(&candidate);
        }
        debug!(path = %candidate.display(), "config candidate absent");
    }

    info!("no config file found; using defaults");
    Ok(Config::default())
}

/// Default search order for an unspecified config path.
pub fn default_search_paths() -> Vec<PathBuf> {
    vec![
        PathBuf::from("config.yaml"),
        utils::get_data_path().join("config.yaml"),
    ]
}

fn read_config(path: &Path) -> Result<Config, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let config = serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    info!(path = %path.display(), "loaded config");
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "bus:\n  provider: zenoh\n").unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.bus.provider, "zenoh");
    }

    #[test]
    fn explicit_missing_file_is_fatal() {
        let err = load_config(Some(Path::new("/definitely/not/here.yaml"))).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn malformed_yaml_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "bus: [not: a: mapping\n").unwrap();

        let err = load_config(Some(&path)).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }
}
