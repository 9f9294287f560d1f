//! Bounded retry for transient SQLite faults

use std::time::Duration;

use rusqlite::ErrorCode;
use tracing::{debug, error};

use crate::{Error, Result};

/// Exponential-backoff retry policy.
///
/// Only lock contention (`SQLITE_BUSY` / `SQLITE_LOCKED`) is retried;
/// every other error is returned on the first attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_delay: Duration,
}

impl Default for RetryPolicy {
    /// 5 attempts, sleeping 100ms, 200ms, 400ms, 800ms between them.
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    /// Create a policy. `max_attempts` is at least 1.
    #[must_use]
    pub fn new(max_attempts: u32, initial_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay,
        }
    }

    /// Maximum number of attempts.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Sleep before retry number `attempt` (0-based).
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        self.initial_delay.saturating_mul(2_u32.saturating_pow(attempt))
    }

    /// Run `f`, retrying transient failures.
    ///
    /// # Errors
    ///
    /// - [`Error::StorageBusy`] when every attempt hit lock contention
    /// - [`Error::Sqlite`] for any non-transient failure
    pub fn run<T, F>(&self, op: &str, mut f: F) -> Result<T>
    where
        F: FnMut() -> rusqlite::Result<T>,
    {
        let mut attempt = 0;
        loop {
            match f() {
                Ok(value) => return Ok(value),
                Err(e) if is_transient(&e) => {
                    attempt += 1;
                    if attempt >= self.max_attempts {
                        error!(op, attempts = attempt, error = %e, "Store still busy, giving up");
                        return Err(Error::StorageBusy {
                            attempts: attempt,
                            message: e.to_string(),
                        });
                    }
                    let delay = self.delay(attempt - 1);
                    debug!(op, attempt, max = self.max_attempts, ?delay, error = %e, "Store busy, retrying");
                    std::thread::sleep(delay);
                }
                Err(e) => return Err(Error::Sqlite(e)),
            }
        }
    }
}

/// Lock contention that a later attempt may not hit.
#[must_use]
pub fn is_transient(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(f, _)
            if matches!(f.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::ffi;

    fn busy() -> rusqlite::Error {
        rusqlite::Error::SqliteFailure(ffi::Error::new(ffi::SQLITE_BUSY), Some("database is locked".into()))
    }

    fn fast() -> RetryPolicy {
        RetryPolicy::new(5, Duration::from_millis(1))
    }

    #[test]
    fn test_default_backoff_doubles() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts(), 5);
        assert_eq!(policy.delay(0), Duration::from_millis(100));
        assert_eq!(policy.delay(3), Duration::from_millis(800));
    }

    #[test]
    fn test_recovers_after_transient_failures() {
        let mut calls = 0;
        let result = fast().run("test", || {
            calls += 1;
            if calls < 3 {
                Err(busy())
            } else {
                Ok(42)
            }
        });
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_exhaustion_is_storage_busy() {
        let mut calls = 0;
        let result: Result<()> = fast().run("test", || {
            calls += 1;
            Err(busy())
        });
        assert!(matches!(result, Err(Error::StorageBusy { attempts: 5, .. })));
        assert_eq!(calls, 5);
    }

    #[test]
    fn test_non_transient_fails_immediately() {
        let mut calls = 0;
        let result: Result<()> = fast().run("test", || {
            calls += 1;
            Err(rusqlite::Error::QueryReturnedNoRows)
        });
        assert!(matches!(result, Err(Error::Sqlite(_))));
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_locked_is_transient() {
        let locked = rusqlite::Error::SqliteFailure(ffi::Error::new(ffi::SQLITE_LOCKED), None);
        assert!(is_transient(&locked));
        assert!(!is_transient(&rusqlite::Error::InvalidQuery));
    }
}
