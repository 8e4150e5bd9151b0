//! The multi-version engine: a skip list whose keys hold version chains.
//!
//! `VersionedSkipList` shares the structural core of
//! [`SkipList`](crate::SkipList): the same towers, segment locks, level
//! mutex, and node pool. What changes is the payload. Instead of a single
//! value, every node owns a shared [`VersionChain`], and all writes go
//! through a transaction handed out by the list's [`TransactionManager`].
//!
//! Structurally the list only ever grows: a transactional delete marks the
//! newest version with a tombstone rather than unsplicing the node, so
//! concurrent readers can keep resolving older versions. Dead versions are
//! reclaimed by [`VersionedSkipList::gc`].

use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_epoch as epoch;
use metrics::counter;

use crate::error::Error;
use crate::level::{GeometricLevels, LevelGenerator};
use crate::metrics::{LABEL_OPERATION_TYPE, OPERATIONS_TOTAL};
use crate::pool::PoolStats;
use crate::segment::DEFAULT_SEGMENT_COUNT;
use crate::transaction::{Transaction, TransactionManager, VersionChain};
use crate::{RemoveOutcome, Tower, DEFAULT_MAX_LEVEL};

/// Diagnostic counters for a [`VersionedSkipList`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MvccStats {
    /// Transactions that committed.
    pub commits: u64,
    /// Transactions that aborted.
    pub aborts: u64,
    /// Transactions currently active.
    pub active_transactions: usize,
    /// Versions currently held across every chain.
    pub total_versions: u64,
}

/// A concurrent ordered map with multi-version concurrency control at
/// Read-Committed isolation.
///
/// All operations take a [`Transaction`] obtained from
/// [`transaction_manager()`](Self::transaction_manager). A transaction sees
/// its own writes immediately; other transactions see them once it commits.
/// Reads never block writes and writes never block reads on other keys.
pub struct VersionedSkipList<K, V> {
    pub(crate) tower: Tower<K, Arc<VersionChain<V>>>,
    txns: Arc<TransactionManager<V>>,
    total_versions: AtomicU64,
}

impl<K, V> VersionedSkipList<K, V> {
    /// Returns the number of keys with structural presence, including keys
    /// whose newest version is a tombstone.
    pub fn len(&self) -> usize {
        self.tower.len()
    }

    /// Returns `true` if no key has ever been inserted (tombstoned keys
    /// keep their structural presence until the node is reclaimed).
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the node pool's diagnostic counters.
    pub fn pool_stats(&self) -> PoolStats {
        self.tower.pool_stats()
    }

    /// Returns a reference to the associated [`TransactionManager`].
    pub fn transaction_manager(&self) -> &Arc<TransactionManager<V>> {
        &self.txns
    }

    /// Returns the transaction and version counters.
    pub fn stats(&self) -> MvccStats {
        MvccStats {
            commits: self.txns.commit_count(),
            aborts: self.txns.abort_count(),
            active_transactions: self.txns.active_count(),
            total_versions: self.total_versions.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn note_reclaimed_versions(&self, reclaimed: usize) {
        self.total_versions
            .fetch_sub(reclaimed as u64, Ordering::Relaxed);
    }
}

impl<K, V> VersionedSkipList<K, V>
where
    K: Ord + Hash + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Creates an empty map with the default max level and segment count.
    pub fn new() -> Self {
        Self::with_max_level(DEFAULT_MAX_LEVEL)
    }

    /// Creates an empty map with a custom cap on tower height.
    pub fn with_max_level(max_level: usize) -> Self {
        Self::with_options(
            max_level,
            DEFAULT_SEGMENT_COUNT,
            Box::new(GeometricLevels::new()),
        )
    }

    /// Creates an empty map with explicit max level, segment count, and
    /// tower height source.
    pub fn with_options(
        max_level: usize,
        segment_count: usize,
        levels: Box<dyn LevelGenerator>,
    ) -> Self {
        VersionedSkipList {
            tower: Tower::new(max_level, segment_count, levels),
            txns: Arc::new(TransactionManager::new()),
            total_versions: AtomicU64::new(0),
        }
    }

    /// Inserts `key` with `value` on behalf of `txn`.
    ///
    /// If the key is structurally absent a node is spliced in; either way a
    /// new version created by `txn` becomes the chain head. The version is
    /// visible to `txn` at once and to others after `txn` commits.
    pub fn insert(&self, key: K, value: V, txn: &Transaction<V>) -> Result<(), Error> {
        if !txn.is_active() {
            return Err(Error::InactiveTransaction);
        }
        counter!(OPERATIONS_TOTAL, LABEL_OPERATION_TYPE => "insert").increment(1);
        let _segment = self.tower.segments.write(self.tower.segments.segment_of(&key));
        let mut level = self.tower.level.lock();
        let guard = &epoch::pin();

        let update = self.tower.find_update(&key, *level, guard);
        // SAFETY: update entries are linked nodes protected by the guard.
        let candidate = unsafe { update[0].deref() }.tower[0].load(Ordering::Acquire, guard);
        if let Some(node) = unsafe { candidate.as_ref() } {
            // SAFETY: successors of the head always carry a key.
            if unsafe { node.key_unchecked() } == &key {
                let chain = Arc::clone(&node.payload);
                chain.push(value, txn.id());
                txn.record_write(chain);
                self.total_versions.fetch_add(1, Ordering::Relaxed);
                return Ok(());
            }
        }

        let height = self.tower.next_height();
        if height > *level {
            *level = height;
        }
        let chain = Arc::new(VersionChain::with_version(value, txn.id()));
        self.tower
            .link(&update, key, Arc::clone(&chain), height, guard);
        txn.record_write(chain);
        self.total_versions.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Returns a copy of the newest value visible to `txn` under `key`.
    pub fn get(&self, key: &K, txn: &Transaction<V>) -> Result<Option<V>, Error>
    where
        V: Clone,
    {
        if !txn.is_active() {
            return Err(Error::InactiveTransaction);
        }
        counter!(OPERATIONS_TOTAL, LABEL_OPERATION_TYPE => "get").increment(1);
        let _segment = self.tower.segments.read(self.tower.segments.segment_of(key));
        let level = self.tower.current_level();
        let guard = &epoch::pin();

        let Some(node) = self.tower.find(key, level, guard) else {
            return Ok(None);
        };
        Ok(node
            .payload
            .visible(txn.id())
            .map(|version| version.value.clone()))
    }

    /// Returns `true` if `key` resolves to a visible version for `txn`.
    pub fn contains_key(&self, key: &K, txn: &Transaction<V>) -> Result<bool, Error> {
        if !txn.is_active() {
            return Err(Error::InactiveTransaction);
        }
        let _segment = self.tower.segments.read(self.tower.segments.segment_of(key));
        let level = self.tower.current_level();
        let guard = &epoch::pin();
        Ok(self
            .tower
            .find(key, level, guard)
            .and_then(|node| node.payload.visible(txn.id()))
            .is_some())
    }

    /// Logically removes `key` on behalf of `txn` by marking the chain head
    /// with a tombstone. The node keeps its structural presence; a later
    /// insert of the same key appends a fresh visible version.
    pub fn remove(&self, key: &K, txn: &Transaction<V>) -> Result<RemoveOutcome, Error> {
        if !txn.is_active() {
            return Err(Error::InactiveTransaction);
        }
        counter!(OPERATIONS_TOTAL, LABEL_OPERATION_TYPE => "remove").increment(1);
        let _segment = self.tower.segments.write(self.tower.segments.segment_of(key));
        let level = self.tower.current_level();
        let guard = &epoch::pin();

        let Some(node) = self.tower.find(key, level, guard) else {
            return Ok(RemoveOutcome::Absent);
        };
        if node.payload.tombstone(txn.id()) {
            Ok(RemoveOutcome::Removed)
        } else {
            Ok(RemoveOutcome::Absent)
        }
    }

    /// Returns every `(key, value)` pair with `low <= key <= high` whose
    /// chain resolves to a version visible to `txn`, in ascending key
    /// order. Empty when `low > high`.
    pub fn range(&self, low: &K, high: &K, txn: &Transaction<V>) -> Result<Vec<(K, V)>, Error>
    where
        K: Clone,
        V: Clone,
    {
        if !txn.is_active() {
            return Err(Error::InactiveTransaction);
        }
        counter!(OPERATIONS_TOTAL, LABEL_OPERATION_TYPE => "range_scan").increment(1);
        if low > high {
            return Ok(Vec::new());
        }
        let _all = self.tower.segments.read_all();
        let level = self.tower.current_level();
        let guard = &epoch::pin();

        let mut results = Vec::new();
        let pred = self.tower.seek(low, level, guard);
        // SAFETY: `seek` returns a linked node protected by the guard.
        let mut current = unsafe { pred.deref() }.tower[0].load(Ordering::Acquire, guard);
        while let Some(node) = unsafe { current.as_ref() } {
            // SAFETY: successors of the head always carry a key.
            let key = unsafe { node.key_unchecked() };
            if key > high {
                break;
            }
            if key >= low {
                if let Some(version) = node.payload.visible(txn.id()) {
                    results.push((key.clone(), version.value.clone()));
                }
            }
            current = node.tower[0].load(Ordering::Acquire, guard);
        }
        Ok(results)
    }
}

impl<K, V> Default for VersionedSkipList<K, V>
where
    K: Ord + Hash + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K: fmt::Debug, V> fmt::Debug for VersionedSkipList<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = self.tower.current_level();
        let guard = &epoch::pin();
        writeln!(
            f,
            "VersionedSkipList {{ len: {}, level: {}, versions: {} }}",
            self.len(),
            level,
            self.total_versions.load(Ordering::Relaxed)
        )?;
        let mut current = self.tower.head_ref(guard).tower[0].load(Ordering::Acquire, guard);
        while let Some(node) = unsafe { current.as_ref() } {
            // SAFETY: successors of the head always carry a key.
            writeln!(
                f,
                "  {:?}: {} version(s)",
                unsafe { node.key_unchecked() },
                node.payload.depth()
            )?;
            current = node.tower[0].load(Ordering::Acquire, guard);
        }
        Ok(())
    }
}
