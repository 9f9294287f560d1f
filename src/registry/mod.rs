//! Format Registry
//!
//! Maps filesystem paths to store readers through late-registered format
//! descriptors. Nothing here knows about concrete formats; the built-in
//! ones live in [`builtin`] and register like any third-party format would.
//!
//! ## Example
//!
//! ```rust,no_run
//! use evoscope::registry::FormatRegistry;
//!
//! let registry = FormatRegistry::with_builtin_formats();
//! for found in registry.discover_all("runs") {
//!     println!("{} -> {}", found.format, found.root.display());
//! }
//! ```

pub mod builtin;
mod pattern;

use std::collections::HashSet;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::model::{FormatName, StatusThresholds};
use crate::reader::StoreReader;
use crate::{Error, Result};

pub use pattern::{to_slash, PathPattern};

/// Path predicate: does this path hold an experiment of the format?
pub type DetectFn = Arc<dyn Fn(&Path) -> bool + Send + Sync>;

/// Maps a pattern match to the experiment root; `None` rejects the match.
pub type ResolveFn = Arc<dyn Fn(&Path) -> Option<PathBuf> + Send + Sync>;

/// Builds a reader for an experiment root.
pub type ReaderFactory = Arc<dyn Fn(&Path, StatusThresholds) -> Arc<dyn StoreReader> + Send + Sync>;

/// How the change-detection engine should watch a format's experiments.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeStrategy {
    /// Compare the store file's mtime on a fixed interval
    #[default]
    Poll,
    /// Recursive filesystem notifications on the experiment directory
    Watch,
}

/// Presentation metadata for a format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayInfo {
    /// Human-readable name
    pub display_name: String,
    /// One-line description
    pub description: String,
    /// Badge foreground colour
    pub badge_color: String,
    /// Badge background colour
    pub badge_bg: String,
}

impl DisplayInfo {
    fn for_name(name: &FormatName) -> Self {
        Self {
            display_name: name.to_string(),
            description: String::new(),
            badge_color: "#6366f1".to_string(),
            badge_bg: "rgba(99, 102, 241, 0.15)".to_string(),
        }
    }
}

/// Everything the registry needs to know about one storage format.
#[derive(Clone)]
pub struct FormatDescriptor {
    name: FormatName,
    detect: DetectFn,
    patterns: Vec<PathPattern>,
    resolve: Option<ResolveFn>,
    factory: ReaderFactory,
    display: DisplayInfo,
    strategy: ChangeStrategy,
}

impl FormatDescriptor {
    /// Start a descriptor from its required parts.
    #[must_use]
    pub fn builder<D, F>(name: FormatName, detect: D, factory: F) -> FormatDescriptorBuilder
    where
        D: Fn(&Path) -> bool + Send + Sync + 'static,
        F: Fn(&Path, StatusThresholds) -> Arc<dyn StoreReader> + Send + Sync + 'static,
    {
        FormatDescriptorBuilder::new(name, detect, factory)
    }

    /// Format name.
    #[must_use]
    pub fn name(&self) -> &FormatName {
        &self.name
    }

    /// Discovery patterns.
    #[must_use]
    pub fn patterns(&self) -> &[PathPattern] {
        &self.patterns
    }

    /// Presentation metadata.
    #[must_use]
    pub fn display(&self) -> &DisplayInfo {
        &self.display
    }

    /// Change-detection strategy.
    #[must_use]
    pub const fn strategy(&self) -> ChangeStrategy {
        self.strategy
    }

    /// Run the detection predicate. A panicking predicate counts as "no".
    #[must_use]
    pub fn detects(&self, path: &Path) -> bool {
        match catch_unwind(AssertUnwindSafe(|| (self.detect)(path))) {
            Ok(hit) => hit,
            Err(_) => {
                warn!(format = %self.name, path = %path.display(), "Detection predicate panicked, skipping");
                false
            }
        }
    }

    /// Map a pattern match to its experiment root. A panicking resolver
    /// rejects the match.
    #[must_use]
    pub fn resolve(&self, matched: &Path) -> Option<PathBuf> {
        let Some(resolve) = &self.resolve else {
            return Some(matched.to_path_buf());
        };
        match catch_unwind(AssertUnwindSafe(|| resolve(matched))) {
            Ok(root) => root,
            Err(_) => {
                warn!(format = %self.name, path = %matched.display(), "Root resolver panicked, skipping");
                None
            }
        }
    }

    /// Build a reader for `root`.
    #[must_use]
    pub fn create_reader(&self, root: &Path, thresholds: StatusThresholds) -> Arc<dyn StoreReader> {
        (self.factory)(root, thresholds)
    }
}

impl fmt::Debug for FormatDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FormatDescriptor")
            .field("name", &self.name)
            .field("patterns", &self.patterns)
            .field("has_resolver", &self.resolve.is_some())
            .field("strategy", &self.strategy)
            .finish_non_exhaustive()
    }
}

/// Builder for [`FormatDescriptor`].
pub struct FormatDescriptorBuilder {
    name: FormatName,
    detect: DetectFn,
    patterns: Vec<PathPattern>,
    resolve: Option<ResolveFn>,
    factory: ReaderFactory,
    display: DisplayInfo,
    strategy: ChangeStrategy,
}

impl FormatDescriptorBuilder {
    /// Create a builder with the required parts.
    #[must_use]
    pub fn new<D, F>(name: FormatName, detect: D, factory: F) -> Self
    where
        D: Fn(&Path) -> bool + Send + Sync + 'static,
        F: Fn(&Path, StatusThresholds) -> Arc<dyn StoreReader> + Send + Sync + 'static,
    {
        Self {
            display: DisplayInfo::for_name(&name),
            name,
            detect: Arc::new(detect),
            patterns: Vec::new(),
            resolve: None,
            factory: Arc::new(factory),
            strategy: ChangeStrategy::default(),
        }
    }

    /// Add a discovery pattern.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPattern`] if the pattern does not compile.
    pub fn pattern(mut self, pattern: &str) -> Result<Self> {
        self.patterns.push(PathPattern::new(pattern)?);
        Ok(self)
    }

    /// Set the root resolver applied to pattern matches.
    #[must_use]
    pub fn resolver<R>(mut self, resolve: R) -> Self
    where
        R: Fn(&Path) -> Option<PathBuf> + Send + Sync + 'static,
    {
        self.resolve = Some(Arc::new(resolve));
        self
    }

    /// Set presentation metadata.
    #[must_use]
    pub fn display(mut self, display: DisplayInfo) -> Self {
        self.display = display;
        self
    }

    /// Set the change-detection strategy.
    #[must_use]
    pub fn strategy(mut self, strategy: ChangeStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Build the descriptor.
    #[must_use]
    pub fn build(self) -> FormatDescriptor {
        FormatDescriptor {
            name: self.name,
            detect: self.detect,
            patterns: self.patterns,
            resolve: self.resolve,
            factory: self.factory,
            display: self.display,
            strategy: self.strategy,
        }
    }
}

/// An experiment root found by [`FormatRegistry::discover_all`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DiscoveredExperiment {
    /// Canonical experiment root
    pub root: PathBuf,
    /// Format that claimed it
    pub format: FormatName,
}

/// Format listing for presentation layers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameworkInfo {
    /// Format name
    pub name: FormatName,
    /// Presentation metadata
    #[serde(flatten)]
    pub display: DisplayInfo,
    /// Change-detection strategy
    pub change_detection: ChangeStrategy,
}

/// Registry of storage formats, in registration order.
#[derive(Default)]
pub struct FormatRegistry {
    descriptors: RwLock<Vec<FormatDescriptor>>,
}

impl FormatRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding the built-in formats.
    #[must_use]
    pub fn with_builtin_formats() -> Self {
        let registry = Self::new();
        builtin::register_all(&registry);
        registry
    }

    /// Register a format. A descriptor with the same name is replaced in
    /// place, keeping its detection priority.
    pub fn register(&self, descriptor: FormatDescriptor) {
        let mut descriptors = self.descriptors.write();
        info!(format = %descriptor.name, patterns = descriptor.patterns.len(), "Registered format");
        match descriptors.iter_mut().find(|d| d.name == descriptor.name) {
            Some(existing) => *existing = descriptor,
            None => descriptors.push(descriptor),
        }
    }

    /// Descriptor by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<FormatDescriptor> {
        self.descriptors
            .read()
            .iter()
            .find(|d| d.name.as_str() == name)
            .cloned()
    }

    /// Registered names, in registration order.
    #[must_use]
    pub fn names(&self) -> Vec<FormatName> {
        self.descriptors.read().iter().map(|d| d.name.clone()).collect()
    }

    /// All descriptors, in registration order.
    #[must_use]
    pub fn descriptors(&self) -> Vec<FormatDescriptor> {
        self.descriptors.read().clone()
    }

    /// Number of registered formats.
    #[must_use]
    pub fn len(&self) -> usize {
        self.descriptors.read().len()
    }

    /// Whether no formats are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.descriptors.read().is_empty()
    }

    /// First format whose predicate accepts `path`.
    #[must_use]
    pub fn detect(&self, path: &Path) -> Option<FormatName> {
        self.descriptors()
            .into_iter()
            .find(|d| d.detects(path))
            .map(|d| d.name)
    }

    /// Change strategy for a format, `Poll` for unknown names.
    #[must_use]
    pub fn strategy(&self, name: &FormatName) -> ChangeStrategy {
        self.get(name.as_str())
            .map_or(ChangeStrategy::Poll, |d| d.strategy)
    }

    /// Build a reader for `path` using the named format.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownFormat`] when no format has that name.
    pub fn create_reader(
        &self,
        path: &Path,
        name: &str,
        thresholds: StatusThresholds,
    ) -> Result<Arc<dyn StoreReader>> {
        let descriptor = self
            .get(name)
            .ok_or_else(|| Error::UnknownFormat(name.to_string()))?;
        Ok(descriptor.create_reader(path, thresholds))
    }

    /// Presentation metadata for every format.
    #[must_use]
    pub fn framework_metadata(&self) -> Vec<FrameworkInfo> {
        self.descriptors
            .read()
            .iter()
            .map(|d| FrameworkInfo {
                name: d.name.clone(),
                display: d.display.clone(),
                change_detection: d.strategy,
            })
            .collect()
    }

    /// Find every experiment root under `base`.
    ///
    /// Walks `base` once, matching each path (relative to `base`) against
    /// every descriptor's patterns. Matches are resolved to roots,
    /// canonicalised, deduplicated (earlier-registered formats win) and
    /// re-confirmed with the descriptor's predicate. The result is ordered
    /// by format registration order, then path.
    #[must_use]
    pub fn discover_all(&self, base: impl AsRef<Path>) -> Vec<DiscoveredExperiment> {
        let base = base.as_ref();
        let descriptors = self.descriptors();
        let mut matches: Vec<Vec<PathBuf>> = vec![Vec::new(); descriptors.len()];

        for entry in WalkDir::new(base)
            .min_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_map(std::result::Result::ok)
        {
            let Ok(relative) = entry.path().strip_prefix(base) else {
                continue;
            };
            let relative = to_slash(relative);
            for (i, d) in descriptors.iter().enumerate() {
                if d.patterns.iter().any(|p| p.matches(&relative)) {
                    matches[i].push(entry.path().to_path_buf());
                }
            }
        }

        let mut seen: HashSet<PathBuf> = HashSet::new();
        let mut found = Vec::new();
        for (d, paths) in descriptors.iter().zip(matches) {
            for matched in paths {
                let Some(root) = d.resolve(&matched) else {
                    continue;
                };
                let Ok(canonical) = std::fs::canonicalize(&root) else {
                    debug!(path = %root.display(), "Resolved root does not exist");
                    continue;
                };
                if seen.contains(&canonical) || !d.detects(&canonical) {
                    continue;
                }
                debug!(format = %d.name, root = %canonical.display(), "Discovered experiment");
                seen.insert(canonical.clone());
                found.push(DiscoveredExperiment {
                    root: canonical,
                    format: d.name.clone(),
                });
            }
        }
        found
    }
}

impl fmt::Debug for FormatRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FormatRegistry")
            .field("formats", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::RelationalReader;

    fn dummy(name: &str, detect: impl Fn(&Path) -> bool + Send + Sync + 'static) -> FormatDescriptor {
        FormatDescriptor::builder(FormatName::new(name).unwrap(), detect, |p, t| {
            Arc::new(RelationalReader::new(p, t)) as Arc<dyn StoreReader>
        })
        .build()
    }

    #[test]
    fn test_detect_returns_first_match() {
        let registry = FormatRegistry::new();
        registry.register(dummy("first", |_| true));
        registry.register(dummy("second", |_| true));
        assert_eq!(registry.detect(Path::new("/x")).unwrap().as_str(), "first");
    }

    #[test]
    fn test_panicking_predicate_is_skipped() {
        let registry = FormatRegistry::new();
        registry.register(dummy("broken", |_| panic!("boom")));
        registry.register(dummy("ok", |_| true));
        assert_eq!(registry.detect(Path::new("/x")).unwrap().as_str(), "ok");
    }

    #[test]
    fn test_reregister_replaces_in_place() {
        let registry = FormatRegistry::new();
        registry.register(dummy("a", |_| false));
        registry.register(dummy("b", |_| true));
        registry.register(dummy("a", |_| true));
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.names()[0].as_str(), "a");
        assert_eq!(registry.detect(Path::new("/x")).unwrap().as_str(), "a");
    }

    #[test]
    fn test_create_reader_unknown_format() {
        let registry = FormatRegistry::new();
        let err = registry
            .create_reader(Path::new("/x"), "nope", StatusThresholds::default())
            .err()
            .unwrap();
        assert!(matches!(err, Error::UnknownFormat(name) if name == "nope"));
    }

    #[test]
    fn test_strategy_defaults_to_poll() {
        let registry = FormatRegistry::new();
        assert_eq!(registry.strategy(&FormatName::new("ghost").unwrap()), ChangeStrategy::Poll);
    }
}
