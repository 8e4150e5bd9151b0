//! Cooperative garbage collection for the MVCC engine.
//!
//! Appending versions and tombstoning heads never frees anything, so a
//! write-heavy key accumulates history. `gc` walks the base level and asks
//! every chain to drop the versions no live or future transaction can
//! resolve anymore. It takes one chain mutex at a time and no segment
//! locks, so it can run alongside regular traffic.

use std::hash::Hash;
use std::sync::atomic::Ordering;

use crossbeam_epoch as epoch;
use log::debug;
use metrics::counter;

use crate::metrics::GC_VERSIONS_RECLAIMED_TOTAL;
use crate::mvcc::VersionedSkipList;

impl<K, V> VersionedSkipList<K, V>
where
    K: Ord + Hash + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Reclaims versions that are unobservable by every live and future
    /// transaction, returning how many were dropped.
    ///
    /// The reclamation horizon is the oldest active transaction id (or the
    /// next id when none are active): a version still inside some live
    /// transaction's visible range always survives, and the newest version
    /// of each chain is never touched.
    pub fn gc(&self) -> usize {
        let min_active = self.transaction_manager().min_active();
        let guard = &epoch::pin();

        let mut reclaimed = 0;
        let mut current = self
            .tower
            .head_ref(guard)
            .tower[0]
            .load(Ordering::Acquire, guard);
        while let Some(node) = unsafe { current.as_ref() } {
            reclaimed += node.payload.collect(min_active);
            current = node.tower[0].load(Ordering::Acquire, guard);
        }

        if reclaimed > 0 {
            self.note_reclaimed_versions(reclaimed);
        }
        counter!(GC_VERSIONS_RECLAIMED_TOTAL).increment(reclaimed as u64);
        debug!(
            "gc reclaimed {} version(s) below transaction {}",
            reclaimed, min_active
        );
        reclaimed
    }
}

#[cfg(test)]
mod tests {
    use crate::mvcc::VersionedSkipList;

    #[test]
    fn gc_leaves_only_the_newest_committed_version() {
        let list: VersionedSkipList<u64, String> = VersionedSkipList::new();
        let txns = list.transaction_manager().clone();

        for i in 0..10 {
            let txn = txns.begin();
            list.insert(1, format!("v{}", i), &txn).unwrap();
            txns.commit(&txn).unwrap();
        }
        assert_eq!(list.stats().total_versions, 10);

        let reclaimed = list.gc();
        assert_eq!(reclaimed, 9);
        assert_eq!(list.stats().total_versions, 1);

        let reader = txns.begin();
        assert_eq!(list.get(&1, &reader).unwrap(), Some("v9".to_string()));
    }

    #[test]
    fn gc_respects_live_readers() {
        let list: VersionedSkipList<u64, u64> = VersionedSkipList::new();
        let txns = list.transaction_manager().clone();

        let t1 = txns.begin();
        list.insert(1, 100, &t1).unwrap();
        txns.commit(&t1).unwrap();

        // An old reader pins the horizon before the overwrite commits.
        let old_reader = txns.begin();

        let t2 = txns.begin();
        list.insert(1, 200, &t2).unwrap();
        txns.commit(&t2).unwrap();

        assert_eq!(list.gc(), 0, "the old reader still needs version 100");
        assert_eq!(list.get(&1, &old_reader).unwrap(), Some(100));

        txns.commit(&old_reader).unwrap();
        assert_eq!(list.gc(), 1);
        let reader = txns.begin();
        assert_eq!(list.get(&1, &reader).unwrap(), Some(200));
    }

    #[test]
    fn gc_drops_tombstoned_history_once_unreachable() {
        let list: VersionedSkipList<u64, u64> = VersionedSkipList::new();
        let txns = list.transaction_manager().clone();

        let t1 = txns.begin();
        list.insert(7, 1, &t1).unwrap();
        txns.commit(&t1).unwrap();

        let t2 = txns.begin();
        list.remove(&7, &t2).unwrap();
        txns.commit(&t2).unwrap();

        let t3 = txns.begin();
        list.insert(7, 2, &t3).unwrap();
        txns.commit(&t3).unwrap();

        // Chain is [1 (deleted by t2), 2]. The deleted version is below the
        // horizon, so it goes; the head stays.
        assert_eq!(list.gc(), 1);
        assert_eq!(list.stats().total_versions, 1);
        let reader = txns.begin();
        assert_eq!(list.get(&7, &reader).unwrap(), Some(2));
    }
}
