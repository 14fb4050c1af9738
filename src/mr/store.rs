use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::mr::job::{JobKey, JobRecord};

/// Outstanding jobs of the current phase.
///
/// The store itself is not synchronized; the coordinator keeps it behind
/// its single lock together with the rest of the scheduling state.
#[derive(Debug, Default)]
pub struct JobStore {
    records: HashMap<JobKey, JobRecord>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a record. A record whose key is already present is dropped.
    pub fn insert(&mut self, job: JobRecord) -> bool {
        match self.records.entry(job.key()) {
            Entry::Occupied(entry) => {
                warn!(job = %entry.key(), "duplicate job id, ignoring");
                false
            }
            Entry::Vacant(entry) => {
                entry.insert(job);
                true
            }
        }
    }

    /// Removes a record, if it is still there.
    pub fn remove(&mut self, key: &JobKey) -> Option<JobRecord> {
        self.records.remove(key)
    }

    pub fn get(&self, key: &JobKey) -> Option<&JobRecord> {
        self.records.get(key)
    }

    pub fn get_mut(&mut self, key: &JobKey) -> Option<&mut JobRecord> {
        self.records.get_mut(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &JobRecord> {
        self.records.values()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Swaps the whole content for a new phase's records.
    pub fn replace_all(&mut self, jobs: impl IntoIterator<Item = JobRecord>) {
        self.records.clear();
        for job in jobs {
            self.insert(job);
        }
    }

    /// Clears the assignment of every record older than `timeout` and
    /// returns the keys that were reset.
    pub fn release_expired(&mut self, now: Instant, timeout: Duration) -> Vec<JobKey> {
        let mut released = vec![];
        for job in self.records.values_mut() {
            if job.is_expired(now, timeout) {
                debug!(job = %job, "assignment timed out");
                job.release();
                released.push(job.key());
            }
        }
        released
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_duplicate_insert_is_ignored() {
        let mut store = JobStore::new();
        assert!(store.insert(JobRecord::map(0, "a", b"first".to_vec())));
        assert!(!store.insert(JobRecord::map(0, "b", b"second".to_vec())));
        assert_eq!(store.len(), 1);
        let kept = store.get(&JobKey::map(0)).unwrap();
        assert_eq!(format!("{}", kept), "{ job: map-0, input: a (5 bytes), assigned: false }");
    }

    #[test]
    fn test_same_id_in_different_phases_coexist() {
        let mut store = JobStore::new();
        assert!(store.insert(JobRecord::map(0, "a", b"x".to_vec())));
        assert!(store.insert(JobRecord::reduce(0)));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_remove_absent_is_noop() {
        let mut store = JobStore::new();
        store.insert(JobRecord::reduce(1));
        assert!(store.remove(&JobKey::reduce(7)).is_none());
        assert!(store.remove(&JobKey::map(1)).is_none());
        assert_eq!(store.len(), 1);
        assert!(store.remove(&JobKey::reduce(1)).is_some());
        assert!(store.remove(&JobKey::reduce(1)).is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_release_expired_only_touches_stale_assignments() {
        let timeout = Duration::from_secs(10);
        let start = Instant::now();
        let mut store = JobStore::new();
        store.replace_all((0..3).map(JobRecord::reduce));
        store.get_mut(&JobKey::reduce(0)).unwrap().assign(start, 1);
        store
            .get_mut(&JobKey::reduce(1))
            .unwrap()
            .assign(start + Duration::from_secs(8), 2);

        let released = store.release_expired(start + Duration::from_secs(11), timeout);
        assert_eq!(released, vec![JobKey::reduce(0)]);

        let stale = store.get(&JobKey::reduce(0)).unwrap();
        assert!(!stale.is_assigned());
        assert!(stale.assigned_at().is_none());
        assert!(store.get(&JobKey::reduce(1)).unwrap().is_assigned());
        assert!(!store.get(&JobKey::reduce(2)).unwrap().is_assigned());
        assert_eq!(store.len(), 3);
    }
}
