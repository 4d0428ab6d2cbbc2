use crate::fiber::FiberId;
use crate::time::Deadline;

use std::collections::{BTreeMap, HashSet};

/// The deadline side of the scheduler's waiting tables.
///
/// Fibers are bucketed by absolute deadline. Several fibers may share a
/// bucket; the order in which a bucket is drained is unspecified. Empty
/// buckets are removed eagerly, so the first key is always the earliest
/// pending deadline.
#[derive(Debug, Default)]
pub(crate) struct ExpiryTable {
    buckets: BTreeMap<Deadline, HashSet<FiberId>>,
    len: usize,
}

impl ExpiryTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Files `fiber` under `deadline`.
    pub(crate) fn insert(&mut self, deadline: Deadline, fiber: FiberId) {
        if self.buckets.entry(deadline).or_default().insert(fiber) {
            self.len += 1;
        }
    }

    /// Removes `fiber` from the `deadline` bucket.
    ///
    /// Returns `false` if it was not filed there.
    pub(crate) fn remove(&mut self, deadline: Deadline, fiber: FiberId) -> bool {
        let Some(bucket) = self.buckets.get_mut(&deadline) else {
            return false;
        };

        let removed = bucket.remove(&fiber);

        if removed {
            self.len -= 1;
        }

        if bucket.is_empty() {
            self.buckets.remove(&deadline);
        }

        removed
    }

    /// Returns some fiber whose deadline is at or before `now`.
    ///
    /// The entry is left in place; waking the fiber removes it.
    pub(crate) fn first_expired(&self, now: u64) -> Option<(Deadline, FiberId)> {
        let (&deadline, bucket) = self.buckets.first_key_value()?;

        if deadline.as_millis() > now {
            return None;
        }

        bucket.iter().next().map(|&fiber| (deadline, fiber))
    }

    /// Earliest pending deadline.
    pub(crate) fn next_deadline(&self) -> Option<Deadline> {
        self.buckets.keys().next().copied()
    }

    /// Number of (deadline, fiber) entries.
    pub(crate) fn len(&self) -> usize {
        self.len
    }
}

#[cfg(test)]
mod tests {
    use super::ExpiryTable;
    use crate::fiber::FiberId;
    use crate::time::Deadline;
    use crate::utils::Slab;

    fn ids(n: usize) -> Vec<FiberId> {
        let mut slab = Slab::new(n);
        (0..n).map(|i| FiberId(slab.insert(i))).collect()
    }

    #[test]
    fn shared_deadline_buckets_drain_one_by_one() {
        let f = ids(3);
        let mut table = ExpiryTable::new();
        let at = Deadline::from_millis(10);

        for &id in &f {
            table.insert(at, id);
        }
        assert_eq!(table.len(), 3);

        let mut woken = Vec::new();
        while let Some((deadline, id)) = table.first_expired(10) {
            assert_eq!(deadline, at);
            assert!(table.remove(deadline, id));
            woken.push(id);
        }

        woken.sort();
        let mut expected = f.clone();
        expected.sort();
        assert_eq!(woken, expected);
        assert_eq!(table.len(), 0);
        assert_eq!(table.next_deadline(), None);
    }

    #[test]
    fn nothing_expires_before_its_deadline() {
        let f = ids(2);
        let mut table = ExpiryTable::new();

        table.insert(Deadline::from_millis(20), f[0]);
        table.insert(Deadline::from_millis(5), f[1]);

        assert_eq!(table.next_deadline(), Some(Deadline::from_millis(5)));
        assert_eq!(table.first_expired(4), None);
        assert_eq!(
            table.first_expired(19),
            Some((Deadline::from_millis(5), f[1]))
        );
    }

    #[test]
    fn removing_a_missing_entry_is_reported() {
        let f = ids(2);
        let mut table = ExpiryTable::new();

        table.insert(Deadline::from_millis(1), f[0]);

        assert!(!table.remove(Deadline::from_millis(1), f[1]));
        assert!(!table.remove(Deadline::from_millis(2), f[0]));
        assert_eq!(table.first_expired(1), Some((Deadline::from_millis(1), f[0])));
        assert_eq!(table.len(), 1);
    }
}
