use std::path::Path;

use tempfile::TempDir;

use crate::config::*;
use crate::errors::{ViolaError, ViolaExpectedError};

fn write_config(contents: &str) -> (TempDir, std::path::PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.toml");
    std::fs::write(&config_path, contents).unwrap();
    (temp_dir, config_path)
}

#[test]
fn test_config_minimal() {
    let (_tmp, config_path) = write_config(
        r#"
        library_database_path = "~/.viola/library.sqlite3"
        "#,
    );

    let config = Config::parse(Some(&config_path)).unwrap();

    let home = dirs::home_dir().unwrap();
    assert_eq!(config.library_database_path, home.join(".viola/library.sqlite3"));
    assert_eq!(config.max_workers, num_cpus::get());
    assert_eq!(config.unknown_label, "Unknown");
    assert!(config.device_sources.is_empty());
}

#[test]
fn test_config_full() {
    let (_tmp, config_path) = write_config(
        r#"
        library_database_path = "/var/lib/viola/library.sqlite3"
        max_workers = 3
        unknown_label = "Unbekannt"

        [[device_sources]]
        id = "ipod-1"
        name = "Living Room iPod"

        [[device_sources]]
        id = "radio-service"
        name = "Radio Catalog"
        "#,
    );

    let config = Config::parse(Some(&config_path)).unwrap();

    assert_eq!(config.library_database_path, Path::new("/var/lib/viola/library.sqlite3"));
    assert_eq!(config.max_workers, 3);
    assert_eq!(config.unknown_label, "Unbekannt");
    assert_eq!(
        config.device_sources,
        vec![
            DeviceSource { id: "ipod-1".to_string(), name: "Living Room iPod".to_string() },
            DeviceSource { id: "radio-service".to_string(), name: "Radio Catalog".to_string() },
        ]
    );
}

#[test]
fn test_config_not_found() {
    match Config::parse(Some(Path::new("/nonexistent/viola/config.toml"))) {
        Err(ViolaError::Expected(ViolaExpectedError::ConfigNotFound { path })) => {
            assert_eq!(path, Path::new("/nonexistent/viola/config.toml"));
        }
        other => panic!("expected ConfigNotFound, got {other:?}"),
    }
}

#[test]
fn test_config_decode_error() {
    let (_tmp, config_path) = write_config("library_database_path = [not valid toml");
    match Config::parse(Some(&config_path)) {
        Err(ViolaError::Expected(ViolaExpectedError::ConfigDecode { .. })) => {}
        other => panic!("expected ConfigDecode, got {other:?}"),
    }
}

#[test]
fn test_config_missing_database_path() {
    let (_tmp, config_path) = write_config("max_workers = 2");
    match Config::parse(Some(&config_path)) {
        Err(ViolaError::Expected(ViolaExpectedError::MissingConfigKey { key, .. })) => {
            assert_eq!(key, "library_database_path");
        }
        other => panic!("expected MissingConfigKey, got {other:?}"),
    }
}

#[test]
fn test_config_invalid_max_workers() {
    let (_tmp, config_path) = write_config(
        r#"
        library_database_path = "/tmp/library.sqlite3"
        max_workers = 0
        "#,
    );
    match Config::parse(Some(&config_path)) {
        Err(ViolaError::Expected(ViolaExpectedError::InvalidConfigValue { key, .. })) => {
            assert_eq!(key, "max_workers");
        }
        other => panic!("expected InvalidConfigValue, got {other:?}"),
    }
}

#[test]
fn test_config_device_source_requires_id_and_name() {
    let (_tmp, config_path) = write_config(
        r#"
        library_database_path = "/tmp/library.sqlite3"

        [[device_sources]]
        name = "No Id"
        "#,
    );
    match Config::parse(Some(&config_path)) {
        Err(ViolaError::Expected(ViolaExpectedError::InvalidConfigValue { key, .. })) => {
            assert_eq!(key, "device_sources[0].id");
        }
        other => panic!("expected InvalidConfigValue, got {other:?}"),
    }
}
