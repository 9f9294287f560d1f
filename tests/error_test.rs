//! Tests for error types

use evoscope::Error;

#[test]
fn test_storage_busy_error() {
    let error = Error::StorageBusy {
        attempts: 5,
        message: "database is locked".to_string(),
    };
    let error_str = format!("{error}");
    assert!(error_str.contains("Storage busy after 5 attempts"));
    assert!(error_str.contains("database is locked"));
    assert!(error_str.contains("retry later"));
}

#[test]
fn test_unknown_format_error() {
    let error = Error::UnknownFormat("parquet".to_string());
    let error_str = format!("{error}");
    assert!(error_str.contains("No registered format"));
    assert!(error_str.contains("parquet"));
}

#[test]
fn test_invalid_format_name_error() {
    let error = Error::InvalidFormatName("Bad Name".to_string());
    let error_str = format!("{error}");
    assert!(error_str.contains("Invalid format name"));
    assert!(error_str.contains("\"Bad Name\""));
}

#[test]
fn test_invalid_pattern_error() {
    let error = Error::InvalidPattern("empty pattern".to_string());
    assert!(format!("{error}").contains("Invalid discovery pattern"));
}

#[test]
fn test_config_error() {
    let error = Error::Config("poll_interval must be non-zero".to_string());
    let error_str = format!("{error}");
    assert!(error_str.contains("Configuration error"));
    assert!(error_str.contains("poll_interval"));
}

#[test]
fn test_unsupported_error() {
    let error = Error::Unsupported("analytics_summary");
    assert!(format!("{error}").contains("analytics_summary"));
}

#[test]
fn test_io_error_conversion() {
    let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
    let error: Error = io_error.into();
    assert!(matches!(error, Error::Io(_)));
    assert!(format!("{error}").contains("IO error"));
}

#[test]
fn test_json_error_conversion() {
    let json_error = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
    let error: Error = json_error.into();
    assert!(matches!(error, Error::Json(_)));
}

#[test]
fn test_yaml_error_conversion() {
    let yaml_error = serde_yaml::from_str::<serde_yaml::Value>("a: [1, 2").unwrap_err();
    let error: Error = yaml_error.into();
    assert!(matches!(error, Error::Yaml(_)));
}

#[test]
fn test_sqlite_error_conversion() {
    let error: Error = rusqlite::Error::InvalidQuery.into();
    assert!(matches!(error, Error::Sqlite(_)));
    assert!(format!("{error}").contains("SQLite error"));
}

#[test]
fn test_other_error() {
    let error = Error::Other("custom error message".to_string());
    assert_eq!(format!("{error}"), "custom error message");
}

#[test]
fn test_error_debug_format() {
    let error = Error::UnknownFormat("x".to_string());
    let debug_str = format!("{error:?}");
    assert!(debug_str.contains("UnknownFormat"));
}
