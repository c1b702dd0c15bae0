//! # VersionTracker
//! Remembers the newest revision this process has seen of each dataset, and uses it to reject stale change notifications.
//!
//! Neither half of the check is enough on its own: a writer that read before our commit can reuse a version number,
//! and wall clocks drift between machines. Checking both narrows the window in which an old snapshot can overwrite a
//! newer local state. It does not close it.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::data_model::VersionStamp;

#[derive(Clone, Debug)]
pub struct VersionTracker<K: Ord> {
    tracked: BTreeMap<K, VersionStamp>,
}

impl<K: Ord> Default for VersionTracker<K> {
    fn default() -> Self {
        Self {
            tracked: BTreeMap::new(),
        }
    }
}

impl<K: Ord + Copy + std::fmt::Debug> VersionTracker<K> {
    /// Record a revision we wrote or accepted.
    ///
    /// The tracked version never goes backwards: recording an older version than the one already tracked is ignored.
    pub fn record(&mut self, key: K, version: u64, updated_at: DateTime<Utc>) {
        match self.tracked.get(&key) {
            Some(tracked) if version < tracked.version => {
                log::debug!(
                    "Ignoring record of {key:?} v{version}, already tracking v{}",
                    tracked.version
                );
            }
            _ => {
                self.tracked.insert(
                    key,
                    VersionStamp {
                        version,
                        updated_at,
                    },
                );
            }
        }
    }

    pub fn should_accept(&self, key: K, version: u64, updated_at: DateTime<Utc>) -> bool {
        let Some(tracked) = self.tracked.get(&key) else {
            return true;
        };
        if version <= tracked.version {
            return false;
        }
        // version metadata can be inconsistent under races, so also refuse anything older than what we have
        updated_at >= tracked.updated_at
    }

    pub fn tracked(&self, key: K) -> Option<VersionStamp> {
        self.tracked.get(&key).copied()
    }

    pub fn clear(&mut self) {
        self.tracked.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_model::test_ids::TestId;
    use chrono::TimeZone;

    fn at(seconds: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(seconds, 0).unwrap()
    }

    #[test]
    fn test_untracked_dataset_accepts_anything() {
        let tracker = VersionTracker::<TestId>::default();
        assert!(tracker.should_accept(TestId::Guests, 0, at(0)));
        assert!(tracker.should_accept(TestId::Guests, 17, at(-5)));
    }

    #[test]
    fn test_rejects_versions_not_newer_than_tracked() {
        let mut tracker = VersionTracker::default();
        tracker.record(TestId::Guests, 3, at(100));

        for version in 0..=3 {
            assert!(!tracker.should_accept(TestId::Guests, version, at(1_000)));
        }
        assert!(tracker.should_accept(TestId::Guests, 4, at(100)));
        // other datasets are tracked independently
        assert!(tracker.should_accept(TestId::Menu, 1, at(0)));
    }

    #[test]
    fn test_rejects_newer_version_with_older_timestamp() {
        let mut tracker = VersionTracker::default();
        tracker.record(TestId::Menu, 2, at(100));

        assert!(!tracker.should_accept(TestId::Menu, 3, at(99)));
        assert!(tracker.should_accept(TestId::Menu, 3, at(100)));
    }

    #[test]
    fn test_tracked_version_is_monotonic() {
        let mut tracker = VersionTracker::default();
        let sequence = [(1, 10), (5, 50), (2, 20), (5, 55), (4, 60), (7, 70)];

        let mut highest = 0;
        for (version, seconds) in sequence {
            tracker.record(TestId::Guests, version, at(seconds));
            let tracked = tracker.tracked(TestId::Guests).unwrap().version;
            assert!(tracked >= highest);
            highest = tracked;
        }
        assert_eq!(highest, 7);
    }

    #[test]
    fn test_rerecording_same_version_refreshes_timestamp() {
        let mut tracker = VersionTracker::default();
        tracker.record(TestId::Guests, 2, at(10));
        tracker.record(TestId::Guests, 2, at(20));
        assert_eq!(
            tracker.tracked(TestId::Guests),
            Some(VersionStamp {
                version: 2,
                updated_at: at(20)
            })
        );
    }
}
