//! Glob-like discovery patterns
//!
//! Supported syntax, matched against `/`-separated paths relative to the
//! scan root:
//!
//! | token | matches                                  |
//! |-------|------------------------------------------|
//! | `**/` | zero or more leading directories         |
//! | `**`  | anything, including `/`                  |
//! | `*`   | anything within one path segment         |
//! | `?`   | one character within one path segment    |

use std::fmt;
use std::path::{Component, Path};

use regex::Regex;

use crate::{Error, Result};

/// A compiled discovery pattern.
#[derive(Clone)]
pub struct PathPattern {
    source: String,
    regex: Regex,
}

impl PathPattern {
    /// Compile a glob-like pattern.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPattern`] for an empty pattern.
    pub fn new(pattern: &str) -> Result<Self> {
        if pattern.is_empty() {
            return Err(Error::InvalidPattern("empty pattern".to_string()));
        }
        let regex = Regex::new(&glob_to_regex(pattern))
            .map_err(|e| Error::InvalidPattern(format!("{pattern}: {e}")))?;
        Ok(Self {
            source: pattern.to_string(),
            regex,
        })
    }

    /// The pattern as written.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Whether a `/`-separated relative path matches.
    #[must_use]
    pub fn matches(&self, relative: &str) -> bool {
        self.regex.is_match(relative)
    }

    /// Whether a relative filesystem path matches.
    #[must_use]
    pub fn matches_path(&self, relative: &Path) -> bool {
        self.matches(&to_slash(relative))
    }
}

impl fmt::Debug for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PathPattern").field(&self.source).finish()
    }
}

/// Join the normal components of `path` with `/`.
#[must_use]
pub fn to_slash(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn glob_to_regex(pattern: &str) -> String {
    let mut out = String::from("^");
    let chars: Vec<char> = pattern.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '*' if chars.get(i + 1) == Some(&'*') => {
                if chars.get(i + 2) == Some(&'/') {
                    out.push_str("(?:.*/)?");
                    i += 3;
                } else {
                    out.push_str(".*");
                    i += 2;
                }
            }
            '*' => {
                out.push_str("[^/]*");
                i += 1;
            }
            '?' => {
                out.push_str("[^/]");
                i += 1;
            }
            c => {
                out.push_str(&regex::escape(&c.to_string()));
                i += 1;
            }
        }
    }
    out.push('$');
    out
}
