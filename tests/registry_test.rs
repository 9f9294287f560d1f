//! Format registry: detection and discovery over real directory trees

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use evoscope::model::{FormatName, StatusThresholds};
use evoscope::reader::{RelationalReader, StoreReader};
use evoscope::registry::{ChangeStrategy, DisplayInfo, FormatDescriptor, FormatRegistry};
use tempfile::TempDir;

fn checkpoint(root: &Path) {
    fs::create_dir_all(root.join("programs")).unwrap();
    fs::write(root.join("metadata.json"), "{}").unwrap();
}

/// runs/
///   oe_direct/checkpoint_1, checkpoint_2
///   oe_nested/checkpoints/checkpoint_5
///   shinka/evolution_db.sqlite
///   notes/readme.txt
fn scan_tree() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path();
    checkpoint(&base.join("oe_direct/checkpoint_1"));
    checkpoint(&base.join("oe_direct/checkpoint_2"));
    checkpoint(&base.join("oe_nested/checkpoints/checkpoint_5"));
    fs::create_dir_all(base.join("shinka")).unwrap();
    fs::write(base.join("shinka/evolution_db.sqlite"), b"").unwrap();
    fs::create_dir_all(base.join("notes")).unwrap();
    fs::write(base.join("notes/readme.txt"), "hi").unwrap();
    dir
}

fn roots(found: &[evoscope::registry::DiscoveredExperiment]) -> Vec<(String, PathBuf)> {
    found
        .iter()
        .map(|d| (d.format.to_string(), d.root.clone()))
        .collect()
}

#[test]
fn test_discover_all_finds_each_root_once() {
    let dir = scan_tree();
    let base = fs::canonicalize(dir.path()).unwrap();
    let registry = FormatRegistry::with_builtin_formats();

    let found = registry.discover_all(dir.path());
    assert_eq!(
        roots(&found),
        vec![
            ("openevolve".to_string(), base.join("oe_direct")),
            ("openevolve".to_string(), base.join("oe_nested")),
            ("shinkaevolve".to_string(), base.join("shinka/evolution_db.sqlite")),
        ]
    );
}

#[test]
fn test_discovery_is_idempotent() {
    let dir = scan_tree();
    let registry = FormatRegistry::with_builtin_formats();
    let first = registry.discover_all(dir.path());
    let second = registry.discover_all(dir.path());
    assert_eq!(first, second);
}

#[test]
fn test_pattern_match_must_be_confirmed() {
    let dir = tempfile::tempdir().unwrap();
    // metadata.json matches the pattern, but it is a directory, so the
    // resolved root never passes detection.
    fs::create_dir_all(dir.path().join("run/checkpoint_1/metadata.json")).unwrap();
    let registry = FormatRegistry::with_builtin_formats();
    assert!(registry.discover_all(dir.path()).is_empty());
}

#[test]
fn test_detect_picks_registered_format() {
    let dir = scan_tree();
    let registry = FormatRegistry::with_builtin_formats();
    let detected = |p: &str| registry.detect(&dir.path().join(p)).map(|f| f.to_string());
    assert_eq!(detected("oe_direct").as_deref(), Some("openevolve"));
    assert_eq!(detected("shinka/evolution_db.sqlite").as_deref(), Some("shinkaevolve"));
    assert_eq!(detected("notes"), None);
}

#[test]
fn test_late_registered_format_is_discovered() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir_all(dir.path().join("lab")).unwrap();
    fs::write(dir.path().join("lab/run.evodb"), b"").unwrap();

    let registry = FormatRegistry::with_builtin_formats();
    let custom = FormatDescriptor::builder(
        FormatName::new("evodb").unwrap(),
        |p: &Path| p.extension().is_some_and(|e| e == "evodb"),
        |p: &Path, t: StatusThresholds| Arc::new(RelationalReader::new(p, t)) as Arc<dyn StoreReader>,
    )
    .pattern("**/*.evodb")
    .unwrap()
    .display(DisplayInfo {
        display_name: "EvoDB".to_string(),
        description: "Custom store".to_string(),
        badge_color: "#000000".to_string(),
        badge_bg: "#ffffff".to_string(),
    })
    .strategy(ChangeStrategy::Poll)
    .build();
    registry.register(custom);

    let found = registry.discover_all(dir.path());
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].format.as_str(), "evodb");
    assert_eq!(registry.framework_metadata().len(), 3);
}

#[test]
fn test_panicking_resolver_skips_only_that_format() {
    let dir = scan_tree();
    let registry = FormatRegistry::new();
    let broken = FormatDescriptor::builder(
        FormatName::new("broken").unwrap(),
        |_: &Path| true,
        |p: &Path, t: StatusThresholds| Arc::new(RelationalReader::new(p, t)) as Arc<dyn StoreReader>,
    )
    .pattern("**/*.sqlite")
    .unwrap()
    .resolver(|_: &Path| -> Option<PathBuf> { panic!("resolver bug") })
    .build();
    registry.register(broken);
    evoscope::registry::builtin::register_all(&registry);

    let found = registry.discover_all(dir.path());
    assert_eq!(found.len(), 3);
    assert!(found.iter().all(|d| d.format.as_str() != "broken"));
}

#[test]
fn test_create_reader_by_name() {
    let dir = scan_tree();
    let registry = FormatRegistry::with_builtin_formats();
    let reader = registry
        .create_reader(&dir.path().join("oe_direct"), "openevolve", StatusThresholds::default())
        .unwrap();
    assert_eq!(reader.format().as_str(), "openevolve");
    assert!(registry
        .create_reader(dir.path(), "nope", StatusThresholds::default())
        .is_err());
}

#[test]
fn test_framework_metadata_serializes_flat() {
    let registry = FormatRegistry::with_builtin_formats();
    let meta = serde_json::to_value(registry.framework_metadata()).unwrap();
    assert_eq!(meta[0]["name"], "openevolve");
    assert_eq!(meta[0]["display_name"], "OpenEvolve");
    assert_eq!(meta[0]["change_detection"], "watch");
    assert_eq!(meta[1]["change_detection"], "poll");
}
