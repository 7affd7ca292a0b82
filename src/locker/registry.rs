use std::collections::HashSet;
use std::sync::Mutex;

/// The set of job IDs whose advisory locks this process currently holds.
///
/// Both the poller and the notification path may discover the same job;
/// `try_insert` is the atomic test-and-set that decides the winner. The
/// loser releases its lock attempt and walks away.
#[derive(Debug, Default)]
pub struct LockRegistry {
    held: Mutex<HashSet<i64>>,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true iff the ID was not already present.
    pub fn try_insert(&self, job_id: i64) -> bool {
        self.held.lock().unwrap().insert(job_id)
    }

    pub fn remove(&self, job_id: i64) -> bool {
        self.held.lock().unwrap().remove(&job_id)
    }

    pub fn contains(&self, job_id: i64) -> bool {
        self.held.lock().unwrap().contains(&job_id)
    }

    pub fn len(&self) -> usize {
        self.held.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.held.lock().unwrap().is_empty()
    }

    /// Sorted copy of the held IDs, as the poll query's exclusion list.
    pub fn snapshot(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.held.lock().unwrap().iter().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Empties the registry, returning what was held.
    pub fn drain(&self) -> Vec<i64> {
        let mut held = self.held.lock().unwrap();
        let mut ids: Vec<i64> = held.drain().collect();
        ids.sort_unstable();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn try_insert_is_test_and_set() {
        let registry = LockRegistry::new();
        assert!(registry.try_insert(1));
        assert!(!registry.try_insert(1));
        assert!(registry.contains(1));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn remove_reports_presence() {
        let registry = LockRegistry::new();
        registry.try_insert(7);
        assert!(registry.remove(7));
        assert!(!registry.remove(7));
        assert!(registry.is_empty());
    }

    #[test]
    fn snapshot_is_sorted() {
        let registry = LockRegistry::new();
        for id in [5, 1, 9, 3] {
            registry.try_insert(id);
        }
        assert_eq!(registry.snapshot(), vec![1, 3, 5, 9]);
    }

    #[test]
    fn drain_empties_the_registry() {
        let registry = LockRegistry::new();
        registry.try_insert(2);
        registry.try_insert(4);
        assert_eq!(registry.drain(), vec![2, 4]);
        assert!(registry.is_empty());
    }
}
