use std::collections::HashSet;

use crate::identity;
use crate::models::{DedupKey, JobRecord};

/// Keys observed for the active query class, from fetched pages and from
/// accepted change-feed inserts.
#[derive(Debug, Default)]
pub struct SeenIdTracker {
    keys: HashSet<DedupKey>,
}

impl SeenIdTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts over from a fresh first page.
    pub fn seed(&mut self, first_page: &[JobRecord]) {
        self.keys.clear();
        self.keys.extend(first_page.iter().map(identity::resolve));
    }

    pub fn add(&mut self, key: DedupKey) -> bool {
        self.keys.insert(key)
    }

    pub fn remove(&mut self, key: &DedupKey) -> bool {
        self.keys.remove(key)
    }

    pub fn has_seen(&self, key: &DedupKey) -> bool {
        self.keys.contains(key)
    }

    /// True when a fetched page brought nothing new. An empty page counts as
    /// nothing new.
    pub fn all_seen(&self, records: &[JobRecord]) -> bool {
        records
            .iter()
            .all(|record| self.has_seen(&identity::resolve(record)))
    }

    pub fn reset(&mut self) {
        self.keys.clear();
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::SeenIdTracker;
    use crate::identity;
    use crate::models::JobRecord;

    #[test]
    fn seed_replaces_previous_keys() {
        let mut tracker = SeenIdTracker::new();
        let old = JobRecord::new("1", "A", "Engineer", 0.5);
        tracker.add(identity::resolve(&old));

        let fresh = JobRecord::new("2", "A", "Engineer", 0.5);
        tracker.seed(std::slice::from_ref(&fresh));

        assert!(!tracker.has_seen(&identity::resolve(&old)));
        assert!(tracker.has_seen(&identity::resolve(&fresh)));
    }

    #[test]
    fn detects_pages_with_nothing_new() {
        let mut tracker = SeenIdTracker::new();
        let first = JobRecord::new("1", "A", "Engineer", 0.5);
        let second = JobRecord::new("2", "A", "Engineer", 0.4);
        tracker.seed(&[first.clone(), second.clone()]);

        assert!(tracker.all_seen(&[second.clone()]));
        assert!(tracker.all_seen(&[]));
        assert!(!tracker.all_seen(&[second, JobRecord::new("3", "A", "Engineer", 0.3)]));
    }
}
