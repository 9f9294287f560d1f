//! Event-driven backend: recursive notify watcher per experiment directory

use std::path::{Path, PathBuf};

use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, warn};

use crate::Result;

/// File extensions that carry program data.
pub const DATA_EXTENSIONS: &[&str] = &["json", "jsonl"];

/// Whether a changed file is worth an event.
#[must_use]
pub fn is_data_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| DATA_EXTENSIONS.contains(&e))
}

/// Watch `dir` recursively, calling `on_file` for every created or
/// modified data file. Dropping the returned watcher stops delivery.
///
/// # Errors
///
/// Returns [`crate::Error::Watch`] if the backend cannot be created or the
/// directory cannot be watched.
pub fn watch_dir<F>(dir: &Path, on_file: F) -> Result<RecommendedWatcher>
where
    F: Fn(PathBuf) + Send + 'static,
{
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
        match res {
            Ok(event) => {
                if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
                    return;
                }
                for path in event.paths {
                    if !path.is_dir() && is_data_file(&path) {
                        on_file(path);
                    }
                }
            }
            Err(e) => warn!(error = %e, "Watch error"),
        }
    })?;
    watcher.watch(dir, RecursiveMode::Recursive)?;
    debug!(path = %dir.display(), "Watching directory");
    Ok(watcher)
}
