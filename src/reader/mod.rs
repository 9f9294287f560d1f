//! Store Readers
//!
//! One capability trait, [`StoreReader`], implemented once per on-disk
//! format:
//!
//! - [`CheckpointReader`]: versioned checkpoint directories with one JSON
//!   document per program and an optional JSONL trace log
//! - [`RelationalReader`]: a single SQLite store appended to by a live
//!   writer
//!
//! ## Failure policy
//!
//! Readers never fail for a missing or corrupt store: they log and return
//! empty or zeroed values. The only error that crosses this boundary in
//! practice is [`Error::StorageBusy`](crate::Error::StorageBusy), raised once
//! the relational reader's bounded retry is exhausted.
//!
//! ## Example
//!
//! ```rust,no_run
//! use evoscope::reader::{CheckpointReader, ProgramQuery, SortKey, StoreReader};
//! use evoscope::model::StatusThresholds;
//!
//! let reader = CheckpointReader::new("runs/circle_packing", StatusThresholds::default());
//! let page = reader
//!     .list_programs(&ProgramQuery::new().sort_by(SortKey::Score).page(1, 20))
//!     .unwrap();
//! println!("{} of {} programs", page.items.len(), page.total);
//! ```

mod checkpoint;
mod json;
mod query;
mod relational;
mod retry;

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::Value;
use tracing::{debug, warn};

use crate::model::{
    AnalyticsSummary, ConversationEntry, EmbeddingSimilarity, Experiment, FormatName, Island,
    LineageTree, MetricsSummary, MigrationEvent, Program, ProgramBrief,
};
use crate::{Error, Result};

pub use checkpoint::CheckpointReader;
pub use json::parse_relaxed;
pub use query::{
    paginate, sort_programs, ConversationQuery, Page, Pagination, ProgramFilter, ProgramQuery,
    SortDirection, SortKey, DEFAULT_PAGE_SIZE,
};
pub use relational::{MetaFile, RelationalReader};
pub use retry::RetryPolicy;

/// Optional operations a reader offers beyond the core contract.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// [`StoreReader::analytics_summary`] is implemented
    pub analytics: bool,
    /// [`StoreReader::embedding_similarity`] is implemented
    pub embedding_similarity: bool,
}

/// Read-only view of one experiment's store, in unified-model terms.
///
/// Implementations are shared across threads; every method takes `&self`
/// and guards its own cache.
pub trait StoreReader: Send + Sync {
    /// Format this reader understands.
    fn format(&self) -> &FormatName;

    /// Experiment root (directory or store file).
    fn root(&self) -> &Path;

    /// Experiment info, recomputed from the freshest on-disk state.
    ///
    /// A missing store yields a zeroed experiment with `Unknown` status.
    ///
    /// # Errors
    ///
    /// Only [`Error::StorageBusy`] when retries are exhausted.
    fn experiment_info(&self) -> Result<Experiment>;

    /// Filter, stable-sort and paginate programs. `total` counts the
    /// filtered set before pagination.
    ///
    /// # Errors
    ///
    /// Only [`Error::StorageBusy`] when retries are exhausted.
    fn list_programs(&self, query: &ProgramQuery) -> Result<Page<Program>>;

    /// One program by id, `None` when absent.
    ///
    /// # Errors
    ///
    /// Only [`Error::StorageBusy`] when retries are exhausted.
    fn get_program(&self, id: &str) -> Result<Option<Program>>;

    /// Every program without code bodies.
    ///
    /// # Errors
    ///
    /// Only [`Error::StorageBusy`] when retries are exhausted.
    fn list_programs_brief(&self) -> Result<Vec<ProgramBrief>>;

    /// Child-versus-parent records, newest first.
    ///
    /// # Errors
    ///
    /// Only [`Error::StorageBusy`] when retries are exhausted.
    fn list_conversations(&self, query: &ConversationQuery) -> Result<Page<ConversationEntry>>;

    /// Score statistics and histories.
    ///
    /// # Errors
    ///
    /// Only [`Error::StorageBusy`] when retries are exhausted.
    fn metrics_summary(&self) -> Result<MetricsSummary>;

    /// Islands and the migration events between them (ascending by time).
    ///
    /// # Errors
    ///
    /// Only [`Error::StorageBusy`] when retries are exhausted.
    fn islands_and_migrations(&self) -> Result<(Vec<Island>, Vec<MigrationEvent>)>;

    /// Lineage forest, restricted to the subtree under `root` when that id
    /// is present.
    ///
    /// # Errors
    ///
    /// Only [`Error::StorageBusy`] when retries are exhausted.
    fn lineage(&self, root: Option<&str>) -> Result<LineageTree>;

    /// Programs whose code contains `query` (case-insensitive), in
    /// encounter order, at most `max_results`.
    ///
    /// # Errors
    ///
    /// Only [`Error::StorageBusy`] when retries are exhausted.
    fn search_code(&self, query: &str, max_results: usize) -> Result<Vec<Program>>;

    /// Seconds since the epoch of the last store write, 0 when missing.
    fn last_modified(&self) -> f64;

    /// Optional operations this reader implements.
    fn capabilities(&self) -> Capabilities {
        Capabilities::default()
    }

    /// LLM cost and model-usage breakdown.
    ///
    /// # Errors
    ///
    /// [`Error::Unsupported`] unless `capabilities().analytics`.
    fn analytics_summary(&self) -> Result<AnalyticsSummary> {
        Err(Error::Unsupported("analytics_summary"))
    }

    /// Cosine similarity over the top `max_programs` embeddings.
    ///
    /// # Errors
    ///
    /// [`Error::Unsupported`] unless `capabilities().embedding_similarity`.
    fn embedding_similarity(&self, max_programs: usize) -> Result<EmbeddingSimilarity> {
        let _ = max_programs;
        Err(Error::Unsupported("embedding_similarity"))
    }
}

/// Modification time of `path` in seconds since the epoch.
pub(crate) fn modified_secs(path: &Path) -> Option<f64> {
    let modified = std::fs::metadata(path).and_then(|m| m.modified()).ok()?;
    Some(system_time_secs(modified))
}

pub(crate) fn system_time_secs(time: SystemTime) -> f64 {
    time.duration_since(UNIX_EPOCH)
        .map_or(0.0, |d| d.as_secs_f64())
}

/// Load the first existing YAML config among `candidates`.
///
/// Unparseable YAML is passed through as `{"raw": <text>}`.
pub(crate) fn load_yaml_config(candidates: &[PathBuf]) -> Option<Value> {
    let path = candidates.iter().find(|p| p.is_file())?;
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to read config");
            return None;
        }
    };
    match serde_yaml::from_str::<Value>(&text) {
        Ok(value) => Some(value),
        Err(e) => {
            debug!(path = %path.display(), error = %e, "Config is not valid YAML, passing through raw");
            Some(serde_json::json!({ "raw": text }))
        }
    }
}

/// Degrade a storage error to `fallback`, letting only `StorageBusy` through.
pub(crate) fn degrade<T>(op: &str, result: Result<T>, fallback: impl FnOnce() -> T) -> Result<T> {
    match result {
        Ok(value) => Ok(value),
        Err(e @ Error::StorageBusy { .. }) => Err(e),
        Err(e) => {
            warn!(op, error = %e, "Store read failed, returning empty result");
            Ok(fallback())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_yaml_config_parses_first_candidate() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.yaml"), "max_iterations: 10\n").unwrap();
        let candidates = vec![dir.path().join("a.yaml"), dir.path().join("b.yaml")];
        let config = load_yaml_config(&candidates).unwrap();
        assert_eq!(config["max_iterations"], 10);
    }

    #[test]
    fn test_load_yaml_config_raw_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "key: [unclosed\n").unwrap();
        let config = load_yaml_config(&[path]).unwrap();
        assert_eq!(config["raw"], "key: [unclosed\n");
    }

    #[test]
    fn test_degrade_passes_busy_through() {
        let busy: Result<u32> = Err(Error::StorageBusy {
            attempts: 5,
            message: "locked".into(),
        });
        assert!(degrade("op", busy, || 0).is_err());
        let other: Result<u32> = Err(Error::Other("boom".into()));
        assert_eq!(degrade("op", other, || 7).unwrap(), 7);
    }
}
