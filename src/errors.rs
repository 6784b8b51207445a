use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ViolaError {
    #[error("Viola error: {0}")]
    Generic(String),
    #[error(transparent)]
    Expected(#[from] ViolaExpectedError),
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Worker pool error: {0}")]
    Pool(String),
    #[error("Backend error: {0}")]
    Backend(String),
}

#[derive(Error, Debug)]
pub enum ViolaExpectedError {
    #[error("{0}")]
    Generic(String),
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },
    #[error("Failed to decode configuration file ({path}): {message}")]
    ConfigDecode { path: PathBuf, message: String },
    #[error("Missing key {key} in configuration file ({path})")]
    MissingConfigKey { key: String, path: PathBuf },
    #[error("Invalid value for {key} in configuration file ({path}): {message}")]
    InvalidConfigValue { key: String, path: PathBuf, message: String },
    #[error("A query is already in flight for this query maker")]
    QueryInFlight,
    #[error("Query maker has no query kind selected")]
    QueryNotConfigured,
}

pub type Result<T> = std::result::Result<T, ViolaError>;
