//! Configuration loading, overrides and validation

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use evoscope::config::{ENV_DEBOUNCE_MS, ENV_PAUSED_THRESHOLD_S, ENV_POLL_INTERVAL_MS, ENV_SCAN_ROOT};
use evoscope::{Config, Error};

fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect();
    move |key| map.get(key).cloned()
}

#[test]
fn test_yaml_partial_document_keeps_defaults() {
    let config = Config::from_yaml_str(
        "scan_root: /data/runs\npoll_interval_ms: 500\nrunning_threshold_s: 30\n",
    )
    .unwrap();
    assert_eq!(config.scan_root, PathBuf::from("/data/runs"));
    assert_eq!(config.poll_interval, Duration::from_millis(500));
    assert_eq!(config.running_threshold, Duration::from_secs(30));
    assert_eq!(config.debounce_interval, Duration::from_secs(1));
    assert_eq!(config.paused_threshold, Duration::from_secs(600));
    assert_eq!(config.max_page_size, 500);
}

#[test]
fn test_empty_yaml_is_default() {
    assert_eq!(Config::from_yaml_str("  \n").unwrap(), Config::default());
}

#[test]
fn test_yaml_file_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("evoscope.yaml");
    let original = Config::builder()
        .scan_root("/srv/evo")
        .debounce_interval(Duration::from_millis(250))
        .page_sizes(20, 100)
        .build()
        .unwrap();
    std::fs::write(&path, serde_yaml::to_string(&original).unwrap()).unwrap();

    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.contains("debounce_ms: 250"));
    assert_eq!(Config::from_yaml_file(&path).unwrap(), original);
}

#[test]
fn test_missing_yaml_file_is_io_error() {
    let result = Config::from_yaml_file("/nonexistent/evoscope.yaml");
    assert!(matches!(result, Err(Error::Io(_))));
}

#[test]
fn test_malformed_yaml_is_yaml_error() {
    let result = Config::from_yaml_str("poll_interval_ms: [not, a, number]");
    assert!(matches!(result, Err(Error::Yaml(_))));
}

#[test]
fn test_overrides_replace_file_values() {
    let config = Config::from_yaml_str("poll_interval_ms: 500")
        .unwrap()
        .with_overrides(lookup(&[
            (ENV_SCAN_ROOT, "/mnt/runs"),
            (ENV_POLL_INTERVAL_MS, " 750 "),
            (ENV_DEBOUNCE_MS, "100"),
        ]))
        .unwrap();
    assert_eq!(config.scan_root, PathBuf::from("/mnt/runs"));
    assert_eq!(config.poll_interval, Duration::from_millis(750));
    assert_eq!(config.debounce_interval, Duration::from_millis(100));
}

#[test]
fn test_unparseable_override_names_variable() {
    let err = Config::default()
        .with_overrides(lookup(&[(ENV_POLL_INTERVAL_MS, "soon")]))
        .unwrap_err();
    match err {
        Error::Config(message) => assert!(message.contains(ENV_POLL_INTERVAL_MS)),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_override_validation_runs_after_merge() {
    let result = Config::default().with_overrides(lookup(&[(ENV_PAUSED_THRESHOLD_S, "10")]));
    assert!(matches!(result, Err(Error::Config(_))));
}

#[test]
fn test_validation_rejects_zero_intervals_and_page_sizes() {
    for yaml in [
        "poll_interval_ms: 0",
        "debounce_ms: 0",
        "rescan_interval_ms: 0",
        "default_page_size: 0",
        "default_page_size: 100\nmax_page_size: 10",
    ] {
        assert!(
            matches!(Config::from_yaml_str(yaml), Err(Error::Config(_))),
            "{yaml} should be rejected"
        );
    }
}

#[test]
fn test_pagination_uses_configured_sizes() {
    let config = Config::builder().page_sizes(20, 100).build().unwrap();
    let p = config.pagination(3, None);
    assert_eq!((p.page, p.page_size), (3, 20));
    assert_eq!(config.pagination(1, Some(1_000)).page_size, 100);
}
