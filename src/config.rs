//! Runtime configuration
//!
//! Every value has a default, can be loaded from YAML and can be overridden
//! from the environment:
//!
//! | field               | default | env                            |
//! |---------------------|---------|--------------------------------|
//! | `scan_root`         | `.`     | `EVOSCOPE_SCAN_ROOT`           |
//! | `poll_interval`     | 2 s     | `EVOSCOPE_POLL_INTERVAL_MS`    |
//! | `debounce_interval` | 1 s     | `EVOSCOPE_DEBOUNCE_MS`         |
//! | `rescan_interval`   | 30 s    | `EVOSCOPE_RESCAN_INTERVAL_MS`  |
//! | `running_threshold` | 60 s    | `EVOSCOPE_RUNNING_THRESHOLD_S` |
//! | `paused_threshold`  | 600 s   | `EVOSCOPE_PAUSED_THRESHOLD_S`  |
//! | `default_page_size` | 50      |                                |
//! | `max_page_size`     | 500     |                                |

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::model::StatusThresholds;
use crate::reader::{Pagination, DEFAULT_PAGE_SIZE};
use crate::{Error, Result};

/// Environment variable for [`Config::scan_root`].
pub const ENV_SCAN_ROOT: &str = "EVOSCOPE_SCAN_ROOT";
/// Environment variable for [`Config::poll_interval`], in milliseconds.
pub const ENV_POLL_INTERVAL_MS: &str = "EVOSCOPE_POLL_INTERVAL_MS";
/// Environment variable for [`Config::debounce_interval`], in milliseconds.
pub const ENV_DEBOUNCE_MS: &str = "EVOSCOPE_DEBOUNCE_MS";
/// Environment variable for [`Config::rescan_interval`], in milliseconds.
pub const ENV_RESCAN_INTERVAL_MS: &str = "EVOSCOPE_RESCAN_INTERVAL_MS";
/// Environment variable for [`Config::running_threshold`], in seconds.
pub const ENV_RUNNING_THRESHOLD_S: &str = "EVOSCOPE_RUNNING_THRESHOLD_S";
/// Environment variable for [`Config::paused_threshold`], in seconds.
pub const ENV_PAUSED_THRESHOLD_S: &str = "EVOSCOPE_PAUSED_THRESHOLD_S";

/// Runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory scanned for experiments
    pub scan_root: PathBuf,
    /// Poll loop period
    #[serde(rename = "poll_interval_ms", with = "millis")]
    pub poll_interval: Duration,
    /// Minimum spacing between events per (experiment, type)
    #[serde(rename = "debounce_ms", with = "millis")]
    pub debounce_interval: Duration,
    /// Period of background re-discovery
    #[serde(rename = "rescan_interval_ms", with = "millis")]
    pub rescan_interval: Duration,
    /// Younger stores are `Running`
    #[serde(rename = "running_threshold_s", with = "secs")]
    pub running_threshold: Duration,
    /// Younger stores (not running) are `Paused`
    #[serde(rename = "paused_threshold_s", with = "secs")]
    pub paused_threshold: Duration,
    /// Page size when the caller gives none
    pub default_page_size: usize,
    /// Upper bound on any requested page size
    pub max_page_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            scan_root: PathBuf::from("."),
            poll_interval: Duration::from_secs(2),
            debounce_interval: Duration::from_secs(1),
            rescan_interval: Duration::from_secs(30),
            running_threshold: Duration::from_secs(60),
            paused_threshold: Duration::from_secs(600),
            default_page_size: DEFAULT_PAGE_SIZE,
            max_page_size: 500,
        }
    }
}

impl Config {
    /// Create a builder starting from the defaults.
    #[must_use]
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Load from a YAML file. Missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the file cannot be read, [`Error::Yaml`] if
    /// it does not parse, or [`Error::Config`] if the result is invalid.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&text)
    }

    /// Parse from YAML text. An empty document yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Yaml`] or [`Error::Config`].
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let config: Self = if text.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(text)?
        };
        config.validate()?;
        Ok(config)
    }

    /// Apply the `EVOSCOPE_*` environment overrides.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a variable does not parse or the result
    /// is invalid.
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup (the environment, in
    /// production).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a value does not parse or the result is
    /// invalid.
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(root) = lookup(ENV_SCAN_ROOT) {
            self.scan_root = PathBuf::from(root);
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, ENV_POLL_INTERVAL_MS)? {
            self.poll_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, ENV_DEBOUNCE_MS)? {
            self.debounce_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, ENV_RESCAN_INTERVAL_MS)? {
            self.rescan_interval = Duration::from_millis(ms);
        }
        if let Some(s) = parse_var::<u64, _>(&lookup, ENV_RUNNING_THRESHOLD_S)? {
            self.running_threshold = Duration::from_secs(s);
        }
        if let Some(s) = parse_var::<u64, _>(&lookup, ENV_PAUSED_THRESHOLD_S)? {
            self.paused_threshold = Duration::from_secs(s);
        }
        self.validate()?;
        Ok(self)
    }

    /// Check cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming the first violated constraint.
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval.is_zero() {
            return Err(Error::Config("poll_interval must be non-zero".into()));
        }
        if self.debounce_interval.is_zero() {
            return Err(Error::Config("debounce_interval must be non-zero".into()));
        }
        if self.rescan_interval.is_zero() {
            return Err(Error::Config("rescan_interval must be non-zero".into()));
        }
        if self.paused_threshold < self.running_threshold {
            return Err(Error::Config(
                "paused_threshold must not be shorter than running_threshold".into(),
            ));
        }
        if self.default_page_size == 0 {
            return Err(Error::Config("default_page_size must be non-zero".into()));
        }
        if self.max_page_size < self.default_page_size {
            return Err(Error::Config(
                "max_page_size must be at least default_page_size".into(),
            ));
        }
        Ok(())
    }

    /// Status thresholds for readers.
    #[must_use]
    pub const fn thresholds(&self) -> StatusThresholds {
        StatusThresholds {
            running: self.running_threshold,
            paused: self.paused_threshold,
        }
    }

    /// Build a pagination request, substituting the default page size when
    /// none is given and clamping to `max_page_size`.
    #[must_use]
    pub fn pagination(&self, page: usize, page_size: Option<usize>) -> Pagination {
        let size = page_size
            .filter(|&s| s > 0)
            .unwrap_or(self.default_page_size)
            .min(self.max_page_size);
        Pagination::new(page, size)
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|_| Error::Config(format!("{key}: cannot parse {raw:?}")))
        })
        .transpose()
}

/// Builder for [`Config`].
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the scan root.
    #[must_use]
    pub fn scan_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.config.scan_root = root.into();
        self
    }

    /// Set the poll loop period.
    #[must_use]
    pub const fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    /// Set the debounce window.
    #[must_use]
    pub const fn debounce_interval(mut self, interval: Duration) -> Self {
        self.config.debounce_interval = interval;
        self
    }

    /// Set the re-discovery period.
    #[must_use]
    pub const fn rescan_interval(mut self, interval: Duration) -> Self {
        self.config.rescan_interval = interval;
        self
    }

    /// Set both status thresholds.
    #[must_use]
    pub const fn thresholds(mut self, running: Duration, paused: Duration) -> Self {
        self.config.running_threshold = running;
        self.config.paused_threshold = paused;
        self
    }

    /// Set default and maximum page sizes.
    #[must_use]
    pub const fn page_sizes(mut self, default: usize, max: usize) -> Self {
        self.config.default_page_size = default;
        self.config.max_page_size = max;
        self
    }

    /// Validate and build.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the values are inconsistent.
    pub fn build(self) -> Result<Config> {
        self.config.validate()?;
        Ok(self.config)
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.poll_interval, Duration::from_secs(2));
        assert_eq!(config.thresholds(), StatusThresholds::default());
    }

    #[test]
    fn test_pagination_clamps() {
        let config = Config::default();
        assert_eq!(config.pagination(1, None).page_size, 50);
        assert_eq!(config.pagination(1, Some(10_000)).page_size, 500);
        assert_eq!(config.pagination(0, Some(0)).page, 1);
    }

    #[test]
    fn test_builder_rejects_inverted_thresholds() {
        let result = Config::builder()
            .thresholds(Duration::from_secs(600), Duration::from_secs(60))
            .build();
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
