//! Poll-strategy bookkeeping: last-seen mtime per experiment

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

/// Tracks the last observed mtime of each polled store.
#[derive(Debug, Default)]
pub struct PollTracker {
    last_seen: DashMap<String, f64>,
}

impl PollTracker {
    /// Create an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an observation and report whether it is a change.
    ///
    /// The first observation for an experiment only seeds the baseline.
    /// After that, only a strictly greater mtime counts.
    pub fn observe(&self, experiment_id: &str, mtime: f64) -> bool {
        match self.last_seen.entry(experiment_id.to_string()) {
            Entry::Vacant(slot) => {
                slot.insert(mtime);
                false
            }
            Entry::Occupied(mut slot) => {
                if mtime > *slot.get() {
                    slot.insert(mtime);
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Last recorded mtime.
    #[must_use]
    pub fn last_seen(&self, experiment_id: &str) -> Option<f64> {
        self.last_seen.get(experiment_id).map(|v| *v)
    }

    /// Drop the baseline so the next observation re-seeds it.
    pub fn forget(&self, experiment_id: &str) {
        self.last_seen.remove(experiment_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_observation_only_seeds() {
        let tracker = PollTracker::new();
        let fired: Vec<bool> = [100.0, 100.0, 150.0]
            .into_iter()
            .map(|m| tracker.observe("exp", m))
            .collect();
        assert_eq!(fired, vec![false, false, true]);
        assert_eq!(tracker.last_seen("exp"), Some(150.0));
    }

    #[test]
    fn test_older_mtime_is_ignored() {
        let tracker = PollTracker::new();
        tracker.observe("exp", 200.0);
        assert!(!tracker.observe("exp", 150.0));
        assert_eq!(tracker.last_seen("exp"), Some(200.0));
    }

    #[test]
    fn test_forget_reseeds() {
        let tracker = PollTracker::new();
        tracker.observe("exp", 100.0);
        tracker.forget("exp");
        assert!(!tracker.observe("exp", 500.0));
    }
}
