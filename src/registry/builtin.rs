//! Built-in formats: checkpoint directories and SQLite stores

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::error;

use super::{ChangeStrategy, DisplayInfo, FormatDescriptor, FormatRegistry};
use crate::model::FormatName;
use crate::reader::{CheckpointReader, RelationalReader, StoreReader};
use crate::Result;

/// Name of the checkpoint-directory format.
pub const CHECKPOINT_FORMAT: &str = "openevolve";

/// Name of the SQLite format.
pub const RELATIONAL_FORMAT: &str = "shinkaevolve";

/// Register both built-in formats (checkpoint first).
pub fn register_all(registry: &FormatRegistry) {
    for descriptor in [checkpoint_descriptor(), relational_descriptor()] {
        match descriptor {
            Ok(d) => registry.register(d),
            Err(e) => error!(error = %e, "Failed to build built-in format"),
        }
    }
}

/// Checkpoint-directory format, watched through filesystem events.
///
/// # Errors
///
/// Only if a discovery pattern fails to compile.
pub fn checkpoint_descriptor() -> Result<FormatDescriptor> {
    let name = FormatName::from_static(CHECKPOINT_FORMAT);
    let reader_format = name.clone();
    Ok(FormatDescriptor::builder(name, is_checkpoint_experiment, move |root, thresholds| {
        Arc::new(CheckpointReader::new(root, thresholds).with_format(reader_format.clone()))
            as Arc<dyn StoreReader>
    })
    .pattern("**/checkpoint_*/metadata.json")?
    .resolver(checkpoint_root)
    .display(DisplayInfo {
        display_name: "OpenEvolve".to_string(),
        description: "OpenEvolve JSON-checkpoint evolution framework".to_string(),
        badge_color: "#818cf8".to_string(),
        badge_bg: "rgba(99, 102, 241, 0.15)".to_string(),
    })
    .strategy(ChangeStrategy::Watch)
    .build())
}

/// SQLite format, polled by mtime.
///
/// # Errors
///
/// Only if a discovery pattern fails to compile.
pub fn relational_descriptor() -> Result<FormatDescriptor> {
    let name = FormatName::from_static(RELATIONAL_FORMAT);
    let reader_format = name.clone();
    Ok(FormatDescriptor::builder(name, is_sqlite_store, move |path, thresholds| {
        Arc::new(RelationalReader::new(path, thresholds).with_format(reader_format.clone()))
            as Arc<dyn StoreReader>
    })
    .pattern("**/*.sqlite")?
    .pattern("**/*.db")?
    .display(DisplayInfo {
        display_name: "ShinkaEvolve".to_string(),
        description: "ShinkaEvolve SQLite evolution framework".to_string(),
        badge_color: "#4ade80".to_string(),
        badge_bg: "rgba(34, 197, 94, 0.15)".to_string(),
    })
    .strategy(ChangeStrategy::Poll)
    .build())
}

/// A directory that is, directly contains, or holds under `checkpoints/`
/// a `checkpoint_*` directory with a `metadata.json`.
#[must_use]
pub fn is_checkpoint_experiment(path: &Path) -> bool {
    if !path.is_dir() {
        return false;
    }
    if is_complete_checkpoint(path) {
        return true;
    }
    has_checkpoint_child(path) || has_checkpoint_child(&path.join("checkpoints"))
}

/// A regular file with a `.sqlite` or `.db` extension (any case).
#[must_use]
pub fn is_sqlite_store(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("sqlite") || e.eq_ignore_ascii_case("db"))
}

/// `<root>/[checkpoints/]checkpoint_N/metadata.json` -> `<root>`.
#[must_use]
pub fn checkpoint_root(metadata: &Path) -> Option<PathBuf> {
    let parent = metadata.parent()?.parent()?;
    if parent.file_name().is_some_and(|n| n == "checkpoints") {
        parent.parent().map(Path::to_path_buf)
    } else {
        Some(parent.to_path_buf())
    }
}

fn is_complete_checkpoint(dir: &Path) -> bool {
    dir.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with("checkpoint_"))
        && dir.join("metadata.json").is_file()
}

fn has_checkpoint_child(dir: &Path) -> bool {
    std::fs::read_dir(dir).is_ok_and(|entries| {
        entries
            .filter_map(std::result::Result::ok)
            .any(|e| e.path().is_dir() && is_complete_checkpoint(&e.path()))
    })
}
