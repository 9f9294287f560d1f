//! Format Name - opaque join key between registry, readers and watcher

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Name of a storage format (e.g. `openevolve`, `shinkaevolve`).
///
/// Formats are registered at runtime, so this is deliberately not an enum.
/// The only validation happens here, at construction: lowercase ASCII
/// letters, digits, `-` and `_`, non-empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FormatName(String);

impl FormatName {
    /// Validate and wrap a format name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidFormatName`] for empty names or names with
    /// characters outside `[a-z0-9_-]`.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let valid = !name.is_empty()
            && name
                .bytes()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-' || b == b'_');
        if valid {
            Ok(Self(name))
        } else {
            Err(Error::InvalidFormatName(name))
        }
    }

    /// Wrap a compile-time name known to be valid.
    pub(crate) fn from_static(name: &'static str) -> Self {
        debug_assert!(Self::new(name).is_ok(), "invalid built-in format name {name}");
        Self(name.to_string())
    }

    /// Borrow the name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FormatName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for FormatName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for FormatName {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<FormatName> for String {
    fn from(value: FormatName) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_name_accepts_slug() {
        let name = FormatName::new("open-evolve_2").unwrap();
        assert_eq!(name.as_str(), "open-evolve_2");
        assert_eq!(name.to_string(), "open-evolve_2");
    }

    #[test]
    fn test_format_name_rejects_bad_input() {
        assert!(FormatName::new("").is_err());
        assert!(FormatName::new("OpenEvolve").is_err());
        assert!(FormatName::new("has space").is_err());
    }

    #[test]
    fn test_format_name_serde_validates() {
        let ok: FormatName = serde_json::from_str("\"shinkaevolve\"").unwrap();
        assert_eq!(ok.as_str(), "shinkaevolve");
        assert!(serde_json::from_str::<FormatName>("\"Bad Name\"").is_err());
    }
}
