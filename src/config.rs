//! The config module provides the configuration schema and parsing logic.
//!
//! We take special care to surface useful diagnostics: every missing or
//! malformed key produces an error naming the key and the file it came from.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::common::DEFAULT_UNKNOWN_LABEL;
use crate::errors::{Result, ViolaExpectedError};

/// A mounted device (or resolved service) that should be exposed as a
/// collection. The record snapshot itself is supplied at runtime; the config
/// only names the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSource {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Path of the local library SQLite database.
    pub library_database_path: PathBuf,
    /// Size of the worker pool that executes queries.
    pub max_workers: usize,
    /// Localized label for the "no value" bucket. Filtering or matching on
    /// this label also matches rows whose display column is empty.
    pub unknown_label: String,
    pub device_sources: Vec<DeviceSource>,
}

#[derive(Deserialize)]
struct RawConfig {
    library_database_path: Option<String>,
    max_workers: Option<i64>,
    unknown_label: Option<String>,
    #[serde(default)]
    device_sources: Vec<RawDeviceSource>,
}

#[derive(Deserialize)]
struct RawDeviceSource {
    id: Option<String>,
    name: Option<String>,
}

fn default_config_path() -> PathBuf {
    dirs::config_dir().unwrap_or_else(|| PathBuf::from(".")).join("viola").join("config.toml")
}

fn expand_path(raw: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(raw).to_string())
}

impl Config {
    pub fn parse(path: Option<&Path>) -> Result<Config> {
        let cfgpath = path.map(|p| p.to_path_buf()).unwrap_or_else(default_config_path);

        let contents = std::fs::read_to_string(&cfgpath)
            .map_err(|_| ViolaExpectedError::ConfigNotFound { path: cfgpath.clone() })?;
        let raw: RawConfig = toml::from_str(&contents).map_err(|e| ViolaExpectedError::ConfigDecode {
            path: cfgpath.clone(),
            message: e.to_string(),
        })?;

        let library_database_path = raw
            .library_database_path
            .as_deref()
            .map(expand_path)
            .ok_or_else(|| ViolaExpectedError::MissingConfigKey {
                key: "library_database_path".to_string(),
                path: cfgpath.clone(),
            })?;

        let max_workers = match raw.max_workers {
            None => num_cpus::get(),
            Some(n) if n >= 1 => n as usize,
            Some(n) => {
                return Err(ViolaExpectedError::InvalidConfigValue {
                    key: "max_workers".to_string(),
                    path: cfgpath,
                    message: format!("must be a positive integer: got {n}"),
                }
                .into())
            }
        };

        let unknown_label = match raw.unknown_label {
            None => DEFAULT_UNKNOWN_LABEL.to_string(),
            Some(s) if !s.trim().is_empty() => s,
            Some(_) => {
                return Err(ViolaExpectedError::InvalidConfigValue {
                    key: "unknown_label".to_string(),
                    path: cfgpath,
                    message: "must be a non-empty string".to_string(),
                }
                .into())
            }
        };

        let mut device_sources = Vec::with_capacity(raw.device_sources.len());
        for (i, source) in raw.device_sources.into_iter().enumerate() {
            let id = source.id.filter(|s| !s.is_empty()).ok_or_else(|| ViolaExpectedError::InvalidConfigValue {
                key: format!("device_sources[{i}].id"),
                path: cfgpath.clone(),
                message: "must be a non-empty string".to_string(),
            })?;
            let name = source.name.filter(|s| !s.is_empty()).ok_or_else(|| ViolaExpectedError::InvalidConfigValue {
                key: format!("device_sources[{i}].name"),
                path: cfgpath.clone(),
                message: "must be a non-empty string".to_string(),
            })?;
            device_sources.push(DeviceSource { id, name });
        }

        Ok(Config {
            library_database_path,
            max_workers,
            unknown_label,
            device_sources,
        })
    }
}
