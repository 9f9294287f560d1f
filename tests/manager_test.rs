//! Experiment manager: discovery, cached readers, discovery events, rescans

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use evoscope::model::{ChangeEvent, EventType};
use evoscope::{ChangeEngine, Config, ExperimentManager, FormatName, FormatRegistry, WatchState};
use parking_lot::Mutex;
use rusqlite::Connection;
use serde_json::json;
use tempfile::TempDir;

fn write_checkpoint(run: &Path) {
    let checkpoint = run.join("checkpoint_3");
    fs::create_dir_all(checkpoint.join("programs")).unwrap();
    fs::write(
        checkpoint.join("metadata.json"),
        json!({"best_program_id": "b", "last_iteration": 3}).to_string(),
    )
    .unwrap();
    for (id, parent, score) in [("a", None, 1.0), ("b", Some("a"), 3.0)] {
        fs::write(
            checkpoint.join("programs").join(format!("{id}.json")),
            json!({"id": id, "code": "pass", "parent_id": parent, "metrics": {"score": score}}).to_string(),
        )
        .unwrap();
    }
}

fn write_store(path: &Path) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    let conn = Connection::open(path).unwrap();
    conn.execute_batch(
        "CREATE TABLE programs (id TEXT PRIMARY KEY, code TEXT, parent_id TEXT, generation INTEGER, \
         island_idx INTEGER, timestamp REAL, combined_score REAL, correct INTEGER);
         INSERT INTO programs VALUES ('r', 'pass', NULL, 0, 0, 10.0, 0.25, 1);
         INSERT INTO programs VALUES ('s', 'pass', 'r', 1, 0, 20.0, 0.75, 1);",
    )
    .unwrap();
}

fn scan_tree() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    write_checkpoint(&dir.path().join("oe_run"));
    write_store(&dir.path().join("shinka").join("evolution_db.sqlite"));
    fs::write(dir.path().join("README.txt"), "not an experiment").unwrap();
    dir
}

fn manager(root: &Path) -> ExperimentManager {
    let config = Config::builder().scan_root(root).build().unwrap();
    ExperimentManager::new(Arc::new(FormatRegistry::with_builtin_formats()), config)
}

#[test]
fn test_scan_registers_both_formats() {
    let dir = scan_tree();
    let manager = manager(dir.path());
    let added = manager.scan();
    assert_eq!(added.len(), 2);
    assert_eq!(manager.len(), 2);

    let listed = manager.list_experiments();
    assert!(listed.windows(2).all(|w| w[0].id < w[1].id));

    let oe = listed
        .iter()
        .find(|e| e.framework == FormatName::new("openevolve").unwrap())
        .unwrap();
    assert_eq!(oe.name, "oe_run");
    assert_eq!(oe.total_programs, 2);
    assert_eq!(oe.last_iteration, 3);

    let shinka = listed
        .iter()
        .find(|e| e.framework == FormatName::new("shinkaevolve").unwrap())
        .unwrap();
    assert_eq!(shinka.name, "evolution_db");
    assert_eq!(shinka.total_programs, 2);
    assert!((shinka.best_score - 0.75).abs() < 1e-12);
}

#[test]
fn test_rescan_adds_only_new_experiments() {
    let dir = scan_tree();
    let manager = manager(dir.path());
    assert_eq!(manager.scan().len(), 2);
    assert!(manager.scan().is_empty());

    write_checkpoint(&dir.path().join("later_run"));
    let added = manager.scan();
    assert_eq!(added.len(), 1);
    assert!(added[0].contains("later_run"));
    assert_eq!(manager.len(), 3);
}

#[test]
fn test_reader_serves_program_data() {
    let dir = scan_tree();
    let manager = manager(dir.path());
    manager.scan();

    let oe = manager
        .list_experiments()
        .into_iter()
        .find(|e| e.name == "oe_run")
        .unwrap();
    let reader = manager.reader(&oe.id).unwrap();
    let summary = reader.metrics_summary().unwrap();
    assert_eq!(summary.total_programs, 2);
    assert!((summary.best_score - 3.0).abs() < 1e-12);
    assert_eq!(manager.readers().len(), 2);
    assert!(manager.reader("missing").is_none());
    assert!(manager.experiment("missing").is_none());
}

#[test]
fn test_vanished_experiment_keeps_last_info() {
    let dir = scan_tree();
    let manager = manager(dir.path());
    manager.scan();
    let oe = manager
        .list_experiments()
        .into_iter()
        .find(|e| e.name == "oe_run")
        .unwrap();

    fs::remove_dir_all(dir.path().join("oe_run")).unwrap();
    let after = manager.experiment(&oe.id).unwrap();
    assert_eq!(after.id, oe.id);
    assert_eq!(manager.len(), 2);
}

#[test]
fn test_scan_emits_discovery_events_and_registers_with_engine() {
    let dir = scan_tree();
    let engine = ChangeEngine::new(Duration::from_secs(2), Duration::from_millis(1));
    let seen = Arc::new(Mutex::new(Vec::<ChangeEvent>::new()));
    let sink = Arc::clone(&seen);
    engine.on_change(move |event| {
        sink.lock().push(event.clone());
        Ok(())
    });

    let manager = manager(dir.path()).with_change_engine(engine.clone());
    let added = manager.scan();

    let events = seen.lock();
    assert_eq!(events.len(), 2);
    assert!(events.iter().all(|e| e.event_type == EventType::ExperimentDiscovered));
    let frameworks: Vec<&str> = events.iter().filter_map(|e| e.data["framework"].as_str()).collect();
    assert!(frameworks.contains(&"openevolve"));
    assert!(frameworks.contains(&"shinkaevolve"));

    assert_eq!(engine.len(), 2);
    for id in &added {
        assert_eq!(engine.state(id), Some(WatchState::Registered));
    }
}

#[tokio::test]
async fn test_rescan_loop_picks_up_new_runs() {
    let dir = scan_tree();
    let config = Config::builder()
        .scan_root(dir.path())
        .rescan_interval(Duration::from_millis(30))
        .build()
        .unwrap();
    let manager = Arc::new(ExperimentManager::new(
        Arc::new(FormatRegistry::with_builtin_formats()),
        config,
    ));
    manager.scan();
    let handle = manager.spawn_rescan().unwrap();

    write_checkpoint(&dir.path().join("late"));
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while manager.len() < 3 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    handle.stop().await;
    assert_eq!(manager.len(), 3);
}

#[test]
fn test_spawn_rescan_outside_runtime_is_unsupported() {
    let dir = scan_tree();
    let manager = Arc::new(manager(dir.path()));
    assert!(matches!(
        manager.spawn_rescan(),
        Err(evoscope::Error::Unsupported(_))
    ));
}
