//! Debounce keyed by (experiment id, event type)

use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::model::EventType;

/// Suppresses events that arrive within `interval` of the last accepted
/// event for the same key. Suppressed events do not extend the window.
#[derive(Debug)]
pub struct Debouncer {
    interval: Duration,
    last_accepted: DashMap<(String, EventType), Instant>,
}

impl Debouncer {
    /// Create a debouncer with the given minimum spacing.
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_accepted: DashMap::new(),
        }
    }

    /// Minimum spacing between accepted events per key.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    /// Admit an event happening now.
    pub fn admit(&self, experiment_id: &str, event_type: EventType) -> bool {
        self.admit_at(experiment_id, event_type, Instant::now())
    }

    /// Admit an event happening at `at`. Returns `false` when suppressed.
    pub fn admit_at(&self, experiment_id: &str, event_type: EventType, at: Instant) -> bool {
        match self.last_accepted.entry((experiment_id.to_string(), event_type)) {
            Entry::Vacant(slot) => {
                slot.insert(at);
                true
            }
            Entry::Occupied(mut slot) => {
                if at.saturating_duration_since(*slot.get()) < self.interval {
                    false
                } else {
                    slot.insert(at);
                    true
                }
            }
        }
    }

    /// Drop every key belonging to `experiment_id`.
    pub fn forget(&self, experiment_id: &str) {
        self.last_accepted.retain(|(id, _), _| id != experiment_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_burst_within_window_is_suppressed() {
        let debounce = Debouncer::new(Duration::from_secs(1));
        let t0 = Instant::now();
        assert!(debounce.admit_at("exp", EventType::NewProgram, t0));
        assert!(!debounce.admit_at("exp", EventType::NewProgram, t0 + Duration::from_millis(100)));
        assert!(!debounce.admit_at("exp", EventType::NewProgram, t0 + Duration::from_millis(900)));
        assert!(debounce.admit_at("exp", EventType::NewProgram, t0 + Duration::from_millis(1000)));
    }

    #[test]
    fn test_keys_are_independent() {
        let debounce = Debouncer::new(Duration::from_secs(1));
        let t0 = Instant::now();
        assert!(debounce.admit_at("a", EventType::NewProgram, t0));
        assert!(debounce.admit_at("b", EventType::NewProgram, t0));
        assert!(debounce.admit_at("a", EventType::Improvement, t0));
    }

    #[test]
    fn test_forget_resets_window() {
        let debounce = Debouncer::new(Duration::from_secs(60));
        let t0 = Instant::now();
        assert!(debounce.admit_at("a", EventType::NewProgram, t0));
        debounce.forget("a");
        assert!(debounce.admit_at("a", EventType::NewProgram, t0));
    }
}
