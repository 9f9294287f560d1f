//! Experiment - one evolutionary job and its lifecycle status

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::FormatName;

/// Lifecycle status, inferred from how recently the store changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExperimentStatus {
    /// Store modified within the running threshold.
    Running,
    /// Store modified within the paused threshold.
    Paused,
    /// Store idle for longer than the paused threshold.
    Completed,
    /// Store missing or never modified.
    #[default]
    Unknown,
}

/// Age thresholds for status inference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusThresholds {
    /// Younger than this is `Running`.
    pub running: Duration,
    /// Younger than this (and not running) is `Paused`.
    pub paused: Duration,
}

impl Default for StatusThresholds {
    fn default() -> Self {
        Self {
            running: Duration::from_secs(60),
            paused: Duration::from_secs(600),
        }
    }
}

impl ExperimentStatus {
    /// Infer status from a last-modified epoch time.
    ///
    /// # Arguments
    ///
    /// * `last_modified` - seconds since the epoch, 0 when unknown
    /// * `now` - current seconds since the epoch
    /// * `thresholds` - running/paused age limits
    #[must_use]
    pub fn infer(last_modified: f64, now: f64, thresholds: StatusThresholds) -> Self {
        if last_modified <= 0.0 {
            return Self::Unknown;
        }
        let age = now - last_modified;
        if age < thresholds.running.as_secs_f64() {
            Self::Running
        } else if age < thresholds.paused.as_secs_f64() {
            Self::Paused
        } else {
            Self::Completed
        }
    }
}

/// One experiment, recomputed from the freshest on-disk state on request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Experiment {
    /// Stable id derived from the storage path
    pub id: String,
    /// Display name
    pub name: String,
    /// Storage format
    pub framework: FormatName,
    /// Storage path (directory or file)
    pub path: PathBuf,
    /// Inferred lifecycle status
    pub status: ExperimentStatus,
    /// Seconds since the epoch, 0 when the store is missing
    pub last_modified: f64,

    /// Number of programs
    pub total_programs: usize,
    /// Best composite score
    pub best_score: f64,
    /// Highest generation seen
    pub current_generation: u64,
    /// Number of islands
    pub num_islands: usize,
    /// Last iteration recorded by the job
    pub last_iteration: u64,

    /// Raw configuration blob
    pub config: Option<serde_json::Value>,
}

impl Experiment {
    /// Zeroed experiment for a store that is missing or unreadable.
    #[must_use]
    pub fn empty(framework: FormatName, path: &Path) -> Self {
        Self {
            id: experiment_id(&framework, path),
            name: display_name(path),
            framework,
            path: path.to_path_buf(),
            status: ExperimentStatus::Unknown,
            last_modified: 0.0,
            total_programs: 0,
            best_score: 0.0,
            current_generation: 0,
            num_islands: 0,
            last_iteration: 0,
            config: None,
        }
    }
}

/// Display name: the file stem for files, the directory name otherwise.
#[must_use]
pub fn display_name(path: &Path) -> String {
    let stem = if path.extension().is_some() && !path.is_dir() {
        path.file_stem()
    } else {
        path.file_name()
    };
    stem.map_or_else(
        || path.display().to_string(),
        |s| s.to_string_lossy().into_owned(),
    )
}

/// Deterministic experiment id: `<format>_<name>_<8 hex of blake3(path)>`.
///
/// The path is canonicalised when possible so `./runs/a` and `runs/a` map
/// to the same id. The hash suffix keeps two runs that share a directory
/// name apart.
#[must_use]
pub fn experiment_id(format: &FormatName, path: &Path) -> String {
    let canonical = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    let name: String = display_name(path)
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    let digest = blake3::hash(canonical.to_string_lossy().as_bytes());
    format!("{format}_{name}_{}", &digest.to_hex()[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_inference() {
        let t = StatusThresholds::default();
        assert_eq!(ExperimentStatus::infer(0.0, 1000.0, t), ExperimentStatus::Unknown);
        assert_eq!(ExperimentStatus::infer(990.0, 1000.0, t), ExperimentStatus::Running);
        assert_eq!(ExperimentStatus::infer(700.0, 1000.0, t), ExperimentStatus::Paused);
        assert_eq!(ExperimentStatus::infer(1.0, 1000.0, t), ExperimentStatus::Completed);
    }

    #[test]
    fn test_experiment_id_is_stable() {
        let format = FormatName::new("openevolve").unwrap();
        let path = Path::new("/nonexistent/runs/my run");
        let a = experiment_id(&format, path);
        let b = experiment_id(&format, path);
        assert_eq!(a, b);
        assert!(a.starts_with("openevolve_my_run_"));
    }

    #[test]
    fn test_experiment_id_distinguishes_same_name() {
        let format = FormatName::new("openevolve").unwrap();
        let a = experiment_id(&format, Path::new("/nonexistent/x/run"));
        let b = experiment_id(&format, Path::new("/nonexistent/y/run"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_display_name_uses_stem_for_files() {
        assert_eq!(display_name(Path::new("/nonexistent/evolution.sqlite")), "evolution");
        assert_eq!(display_name(Path::new("/nonexistent/run_1")), "run_1");
    }
}
