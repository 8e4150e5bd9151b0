#![doc = include_str!("../README.md")]
//! The core, concurrent skip-list implementation.
//!
//! # Internals
//!
//! -   **Nodes:** every key owns a node with a tower of forward pointers;
//!     the tower height is drawn from a [`level::LevelGenerator`].
//! -   **Locking:** structural changes hold the owning segment's write lock
//!     plus the global level mutex, so splicing is serialized while reads
//!     stay concurrent. See [`segment`] for the full ordering discipline.
//! -   **Reclamation:** traversals run under an epoch guard. Removed nodes
//!     are unlinked immediately but only handed back to the node pool after
//!     every pinned reader has moved on, so a concurrent traversal never
//!     observes recycled memory.
//! -   **MVCC:** [`mvcc::VersionedSkipList`] reuses the same structural
//!     core but stores a version chain per key instead of a single value.

use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use ::metrics::counter;
use crossbeam_epoch::{self as epoch, Atomic, Guard, Owned, Shared};
use crossbeam_utils::CachePadded;
use parking_lot::Mutex;

pub mod error;
pub mod level;
pub mod metrics;
pub mod mvcc;
pub mod segment;
pub mod transaction;

mod persistence;
mod pool;
mod vacuum;

pub use crate::error::Error;
pub use crate::level::{GeometricLevels, LevelGenerator, ScriptedLevels};
pub use crate::mvcc::{MvccStats, VersionedSkipList};
pub use crate::pool::PoolStats;
pub use crate::segment::{SegmentTable, DEFAULT_SEGMENT_COUNT};
pub use crate::transaction::{
    Transaction, TransactionManager, TransactionState, TxId, Version, VersionChain, TXID_INFINITY,
};

use crate::metrics::{LABEL_OPERATION_TYPE, OPERATIONS_TOTAL};
use crate::pool::NodePool;

/// The default cap on tower height.
pub const DEFAULT_MAX_LEVEL: usize = 32;

/// The result of an insert: either the key was new, or it already existed
/// and the stored value was left untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    Existed,
}

/// The result of a remove: either the key was present and is now gone, or
/// there was nothing to remove.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    Removed,
    Absent,
}

/// A node in the skip list: a key, an engine-specific payload, and a tower
/// of forward pointers (index 0 is the base level).
pub(crate) struct Node<K, P> {
    key: Option<K>,
    pub(crate) payload: P,
    pub(crate) tower: Box<[Atomic<Node<K, P>>]>,
}

fn empty_tower<K, P>(height: usize) -> Box<[Atomic<Node<K, P>>]> {
    (0..height).map(|_| Atomic::null()).collect()
}

impl<K, P> Node<K, P> {
    /// Creates the head sentinel, keyless and with a full-height tower.
    fn head(max_level: usize) -> Owned<Self>
    where
        P: Default,
    {
        Owned::new(Node {
            key: None,
            payload: P::default(),
            tower: empty_tower(max_level),
        })
    }

    pub(crate) fn new(key: K, payload: P, height: usize) -> Self {
        Node {
            key: Some(key),
            payload,
            tower: empty_tower(height),
        }
    }

    pub(crate) fn height(&self) -> usize {
        self.tower.len()
    }

    /// # Safety
    ///
    /// Only the head sentinel is keyless; callers must not pass the head.
    pub(crate) unsafe fn key_unchecked(&self) -> &K {
        self.key.as_ref().unwrap_unchecked()
    }

    /// Re-initializes a recycled node. The forward array is kept when the
    /// height matches and reallocated otherwise.
    pub(crate) fn reset(&mut self, key: K, payload: P, height: usize) {
        if self.tower.len() != height {
            self.tower = empty_tower(height);
        } else {
            for slot in self.tower.iter() {
                slot.store(Shared::null(), Ordering::Relaxed);
            }
        }
        self.key = Some(key);
        self.payload = payload;
    }
}

/// The structural core shared by both engines: the head sentinel, the level
/// mutex, the segment locks, and the node pool.
///
/// Locking is the caller's job. Methods document which locks they expect to
/// be held; none of them acquire segment or level locks themselves.
pub(crate) struct Tower<K, P> {
    head: CachePadded<Atomic<Node<K, P>>>,
    pub(crate) max_level: usize,
    /// Guards the current level (the tallest live tower). Structural writers
    /// hold this for their whole critical section; readers lock it just long
    /// enough to snapshot the value.
    pub(crate) level: Mutex<usize>,
    len: CachePadded<AtomicUsize>,
    pub(crate) segments: SegmentTable,
    pool: Arc<NodePool<K, P>>,
    levels: Box<dyn LevelGenerator>,
}

impl<K, P> Tower<K, P> {
    pub(crate) fn new(
        max_level: usize,
        segment_count: usize,
        levels: Box<dyn LevelGenerator>,
    ) -> Self
    where
        P: Default,
    {
        assert!(max_level > 0, "max level must be non-zero");
        Tower {
            head: CachePadded::new(Atomic::from(Node::head(max_level))),
            max_level,
            level: Mutex::new(0),
            len: CachePadded::new(AtomicUsize::new(0)),
            segments: SegmentTable::new(segment_count),
            pool: Arc::new(NodePool::new()),
            levels,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }

    pub(crate) fn current_level(&self) -> usize {
        *self.level.lock()
    }

    pub(crate) fn head_ref<'g>(&self, guard: &'g Guard) -> &'g Node<K, P> {
        // SAFETY: the head sentinel is installed at construction and never
        // replaced or reclaimed before the tower itself is dropped.
        unsafe { self.head.load(Ordering::Relaxed, guard).deref() }
    }

    pub(crate) fn next_height(&self) -> usize {
        self.levels.level(self.max_level)
    }

    pub(crate) fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }
}

impl<K: Ord, P> Tower<K, P> {
    /// Descends from `level` toward the base and returns the greatest node
    /// whose key is strictly less than `key` (the head when there is none).
    ///
    /// The base level is always walked, so a stale `level` snapshot taken
    /// before a concurrent promotion cannot make the search skip nodes.
    pub(crate) fn seek<'g>(
        &self,
        key: &K,
        level: usize,
        guard: &'g Guard,
    ) -> Shared<'g, Node<K, P>> {
        let mut current = self.head.load(Ordering::Relaxed, guard);
        for i in (0..level.max(1)).rev() {
            loop {
                // SAFETY: `current` starts at the head and only ever advances
                // to non-null successors; the guard keeps them alive.
                let next = unsafe { current.deref() }.tower[i].load(Ordering::Acquire, guard);
                match unsafe { next.as_ref() } {
                    // SAFETY: successors of the head always carry a key.
                    Some(node) if unsafe { node.key_unchecked() } < key => current = next,
                    _ => break,
                }
            }
        }
        current
    }

    /// Finds the node holding `key`, if it is linked.
    pub(crate) fn find<'g>(
        &self,
        key: &K,
        level: usize,
        guard: &'g Guard,
    ) -> Option<&'g Node<K, P>> {
        let pred = self.seek(key, level, guard);
        // SAFETY: `seek` returns a linked node protected by the guard.
        let candidate = unsafe { pred.deref() }.tower[0].load(Ordering::Acquire, guard);
        let node = unsafe { candidate.as_ref() }?;
        // SAFETY: successors of the head always carry a key.
        (unsafe { node.key_unchecked() } == key).then_some(node)
    }

    /// Collects the per-level predecessors of `key`. Entries above `level`
    /// stay at the head so a tower promotion can splice against them
    /// directly. Callers must hold the level mutex.
    pub(crate) fn find_update<'g>(
        &self,
        key: &K,
        level: usize,
        guard: &'g Guard,
    ) -> Vec<Shared<'g, Node<K, P>>> {
        let head = self.head.load(Ordering::Relaxed, guard);
        let mut update = vec![head; self.max_level];
        let mut current = head;
        for i in (0..level).rev() {
            loop {
                // SAFETY: as in `seek`; the guard protects every node reached.
                let next = unsafe { current.deref() }.tower[i].load(Ordering::Acquire, guard);
                match unsafe { next.as_ref() } {
                    // SAFETY: successors of the head always carry a key.
                    Some(node) if unsafe { node.key_unchecked() } < key => current = next,
                    _ => break,
                }
            }
            update[i] = current;
        }
        update
    }

    /// Splices a freshly allocated node in behind the recorded predecessors.
    /// Callers must hold the key's segment write lock and the level mutex.
    pub(crate) fn link<'g>(
        &self,
        update: &[Shared<'g, Node<K, P>>],
        key: K,
        payload: P,
        height: usize,
        guard: &'g Guard,
    ) -> &'g Node<K, P> {
        debug_assert!(height >= 1 && height <= self.max_level);
        let node = self.pool.allocate(key, payload, height).into_shared(guard);
        for i in 0..height {
            // SAFETY: update entries come from `find_update` under this same
            // guard, and the level mutex keeps them linked meanwhile.
            let pred = unsafe { update[i].deref() };
            let next = pred.tower[i].load(Ordering::Relaxed, guard);
            unsafe { node.deref() }.tower[i].store(next, Ordering::Relaxed);
            pred.tower[i].store(node, Ordering::Release);
        }
        self.len.fetch_add(1, Ordering::Relaxed);
        // SAFETY: just linked under the guard.
        unsafe { node.deref() }
    }

    /// Unsplices `candidate` from every level it occupies, stopping at the
    /// first level where the predecessor no longer points at it, then lets
    /// the current level decay while the head's top pointers are empty.
    /// Callers must hold the segment write lock and the level mutex.
    pub(crate) fn unlink<'g>(
        &self,
        candidate: Shared<'g, Node<K, P>>,
        update: &[Shared<'g, Node<K, P>>],
        level: &mut usize,
        guard: &'g Guard,
    ) {
        for i in 0..*level {
            // SAFETY: update entries are linked nodes protected by the guard.
            let pred = unsafe { update[i].deref() };
            if pred.tower[i].load(Ordering::Relaxed, guard) != candidate {
                break;
            }
            let next = unsafe { candidate.deref() }.tower[i].load(Ordering::Relaxed, guard);
            pred.tower[i].store(next, Ordering::Release);
        }
        let head = self.head_ref(guard);
        while *level > 0 && head.tower[*level - 1].load(Ordering::Relaxed, guard).is_null() {
            *level -= 1;
        }
        debug_assert!(self.len.load(Ordering::Relaxed) > 0);
        self.len.fetch_sub(1, Ordering::Relaxed);
    }

    /// Hands an unlinked node back to the pool once every traversal that
    /// might still hold a pointer to it has unpinned.
    ///
    /// # Safety
    ///
    /// `node` must be fully unlinked, and no new reference to it may be
    /// created after this call.
    pub(crate) unsafe fn retire(&self, node: Shared<'_, Node<K, P>>, guard: &Guard) {
        let pool = Arc::clone(&self.pool);
        let raw = node.as_raw() as *mut Node<K, P>;
        guard.defer_unchecked(move || {
            // SAFETY: the node was unlinked before this epoch retired, so
            // this closure holds the only remaining pointer to it.
            pool.release(unsafe { Box::from_raw(raw) });
        });
    }
}

impl<K, P> Drop for Tower<K, P> {
    fn drop(&mut self) {
        // SAFETY: `drop` has exclusive access; no guard can still reference
        // these nodes.
        let guard = unsafe { epoch::unprotected() };
        let mut current = self.head.load(Ordering::Relaxed, guard);
        while let Some(node) = unsafe { current.as_ref() } {
            let next = node.tower[0].load(Ordering::Relaxed, guard);
            drop(unsafe { current.into_owned() });
            current = next;
        }
    }
}

/// A concurrent ordered map from `K` to `V`.
///
/// Single-key operations lock one hash-selected segment; structural changes
/// additionally serialize on the level mutex. Range scans take every
/// segment's read lock in index order and therefore observe a stable
/// structure.
pub struct SkipList<K, V> {
    pub(crate) tower: Tower<K, Atomic<V>>,
}

impl<K, V> SkipList<K, V> {
    /// Returns the number of live keys.
    pub fn len(&self) -> usize {
        self.tower.len()
    }

    /// Returns `true` if the map contains no keys.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the node pool's diagnostic counters.
    pub fn pool_stats(&self) -> PoolStats {
        self.tower.pool_stats()
    }
}

impl<K, V> SkipList<K, V>
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
        SkipList {
            tower: Tower::new(max_level, segment_count, levels),
        }
    }

    /// Inserts `key` with `value`.
    ///
    /// If the key is already present the map is left untouched and
    /// [`InsertOutcome::Existed`] is reported.
    pub fn insert(&self, key: K, value: V) -> InsertOutcome {
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
                return InsertOutcome::Existed;
            }
        }

        let height = self.tower.next_height();
        if height > *level {
            *level = height;
        }
        self.tower.link(&update, key, Atomic::new(value), height, guard);
        InsertOutcome::Inserted
    }

    /// Returns a copy of the value stored under `key`.
    pub fn get(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        counter!(OPERATIONS_TOTAL, LABEL_OPERATION_TYPE => "get").increment(1);
        let _segment = self.tower.segments.read(self.tower.segments.segment_of(key));
        let level = self.tower.current_level();
        let guard = &epoch::pin();

        let node = self.tower.find(key, level, guard)?;
        let value = node.payload.load(Ordering::Acquire, guard);
        // SAFETY: the value pointer is either null or owned by the linked
        // node; the guard keeps it alive while we copy it out.
        unsafe { value.as_ref() }.cloned()
    }

    /// Returns `true` if `key` is present.
    pub fn contains_key(&self, key: &K) -> bool {
        let _segment = self.tower.segments.read(self.tower.segments.segment_of(key));
        let level = self.tower.current_level();
        let guard = &epoch::pin();
        self.tower.find(key, level, guard).is_some()
    }

    /// Removes `key`, unsplicing its node from every level and recycling it
    /// through the pool.
    pub fn remove(&self, key: &K) -> RemoveOutcome {
        counter!(OPERATIONS_TOTAL, LABEL_OPERATION_TYPE => "remove").increment(1);
        let _segment = self.tower.segments.write(self.tower.segments.segment_of(key));
        let mut level = self.tower.level.lock();
        let guard = &epoch::pin();

        let update = self.tower.find_update(key, *level, guard);
        // SAFETY: update entries are linked nodes protected by the guard.
        let candidate = unsafe { update[0].deref() }.tower[0].load(Ordering::Acquire, guard);
        let Some(node) = (unsafe { candidate.as_ref() }) else {
            return RemoveOutcome::Absent;
        };
        // SAFETY: successors of the head always carry a key.
        if unsafe { node.key_unchecked() } != key {
            return RemoveOutcome::Absent;
        }

        self.tower.unlink(candidate, &update, &mut level, guard);
        let value = node.payload.swap(Shared::null(), Ordering::AcqRel, guard);
        unsafe {
            // SAFETY: the node is unlinked; its value and memory are retired
            // behind the epoch so concurrent readers stay safe.
            if !value.is_null() {
                guard.defer_destroy(value);
            }
            self.tower.retire(candidate, guard);
        }
        RemoveOutcome::Removed
    }

    /// Returns every `(key, value)` pair with `low <= key <= high`, in
    /// ascending key order. Empty when `low > high`.
    pub fn range(&self, low: &K, high: &K) -> Vec<(K, V)>
    where
        K: Clone,
        V: Clone,
    {
        counter!(OPERATIONS_TOTAL, LABEL_OPERATION_TYPE => "range_scan").increment(1);
        if low > high {
            return Vec::new();
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
                let value = node.payload.load(Ordering::Acquire, guard);
                if let Some(value) = unsafe { value.as_ref() } {
                    results.push((key.clone(), value.clone()));
                }
            }
            current = node.tower[0].load(Ordering::Acquire, guard);
        }
        results
    }
}

impl<K, V> Default for SkipList<K, V>
where
    K: Ord + Hash + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> Drop for SkipList<K, V> {
    fn drop(&mut self) {
        // SAFETY: `drop` has exclusive access. Values hang off the nodes as
        // raw epoch pointers, so they are reclaimed here before the tower
        // frees the nodes themselves.
        let guard = unsafe { epoch::unprotected() };
        let mut current = self.tower.head.load(Ordering::Relaxed, guard);
        while let Some(node) = unsafe { current.as_ref() } {
            let value = node.payload.swap(Shared::null(), Ordering::Relaxed, guard);
            if !value.is_null() {
                drop(unsafe { value.into_owned() });
            }
            current = node.tower[0].load(Ordering::Relaxed, guard);
        }
    }
}

impl<K: fmt::Debug, V> fmt::Debug for SkipList<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = *self.tower.level.lock();
        let guard = &epoch::pin();
        writeln!(f, "SkipList {{ len: {}, level: {} }}", self.len(), level)?;
        for i in (0..level).rev() {
            write!(f, "  level {:>2}:", i)?;
            let mut current = self.tower.head_ref(guard).tower[i].load(Ordering::Acquire, guard);
            while let Some(node) = unsafe { current.as_ref() } {
                // SAFETY: successors of the head always carry a key.
                write!(f, " {:?}", unsafe { node.key_unchecked() })?;
                current = node.tower[i].load(Ordering::Acquire, guard);
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::thread;

    /// Pushes the epoch forward until pending deferred work has run.
    fn settle_epoch() {
        for _ in 0..512 {
            epoch::pin().flush();
        }
    }

    /// Walks the whole structure and asserts the structural invariants:
    /// strictly increasing keys per level, tower contiguity, an accurate
    /// element count, and a current level equal to the tallest live tower.
    fn check_invariants<K, V>(list: &SkipList<K, V>)
    where
        K: Ord + Hash + Send + Sync + 'static,
        V: Send + Sync + 'static,
    {
        let _all = list.tower.segments.write_all();
        let level = *list.tower.level.lock();
        let guard = &epoch::pin();
        let head = list.tower.head_ref(guard);

        let mut heights: HashMap<usize, usize> = HashMap::new();
        let mut max_height = 0;
        let mut prev: Option<&K> = None;
        let mut current = head.tower[0].load(Ordering::Acquire, guard);
        while let Some(node) = unsafe { current.as_ref() } {
            let key = unsafe { node.key_unchecked() };
            if let Some(p) = prev {
                assert!(p < key, "base level keys must strictly increase");
            }
            prev = Some(key);
            heights.insert(current.as_raw() as usize, node.height());
            max_height = max_height.max(node.height());
            current = node.tower[0].load(Ordering::Acquire, guard);
        }
        assert_eq!(heights.len(), list.len(), "len must match the base level");
        assert_eq!(level, max_height, "level must match the tallest tower");

        for i in 1..level {
            let mut prev: Option<&K> = None;
            let mut seen = 0;
            let mut current = head.tower[i].load(Ordering::Acquire, guard);
            while let Some(node) = unsafe { current.as_ref() } {
                let key = unsafe { node.key_unchecked() };
                if let Some(p) = prev {
                    assert!(p < key, "level {} keys must strictly increase", i);
                }
                prev = Some(key);
                let height = heights
                    .get(&(current.as_raw() as usize))
                    .expect("every linked node must be reachable at the base level");
                assert!(*height > i);
                seen += 1;
                current = node.tower[i].load(Ordering::Acquire, guard);
            }
            let expected = heights.values().filter(|h| **h > i).count();
            assert_eq!(seen, expected, "level {} must contain every tall tower", i);
        }
    }

    #[test]
    fn new_list_is_empty() {
        let list: SkipList<u64, String> = SkipList::new();
        assert_eq!(list.len(), 0);
        assert!(list.is_empty());
        assert_eq!(list.tower.current_level(), 0);
        assert_eq!(list.get(&1), None);
    }

    #[test]
    fn insert_and_get_in_order() {
        let list: SkipList<i32, String> = SkipList::new();
        let pairs = [(3, "c"), (1, "a"), (5, "e"), (2, "b"), (4, "d")];
        for (k, v) in pairs {
            assert_eq!(list.insert(k, v.to_string()), InsertOutcome::Inserted);
        }
        assert_eq!(list.len(), 5);
        for (k, v) in pairs {
            assert_eq!(list.get(&k), Some(v.to_string()));
        }
        let scanned = list.range(&1, &5);
        let expected: Vec<(i32, String)> = [(1, "a"), (2, "b"), (3, "c"), (4, "d"), (5, "e")]
            .into_iter()
            .map(|(k, v)| (k, v.to_string()))
            .collect();
        assert_eq!(scanned, expected);
        check_invariants(&list);
    }

    #[test]
    fn insert_existing_reports_and_keeps_old_value() {
        let list: SkipList<u64, String> = SkipList::new();
        assert_eq!(list.insert(7, "first".to_string()), InsertOutcome::Inserted);
        assert_eq!(list.insert(7, "second".to_string()), InsertOutcome::Existed);
        assert_eq!(list.len(), 1);
        assert_eq!(list.get(&7), Some("first".to_string()));
    }

    #[test]
    fn remove_then_lookup_is_absent() {
        let list: SkipList<u64, u64> = SkipList::new();
        list.insert(1, 10);
        list.insert(2, 20);
        assert_eq!(list.remove(&1), RemoveOutcome::Removed);
        assert_eq!(list.get(&1), None);
        assert_eq!(list.remove(&1), RemoveOutcome::Absent);
        assert_eq!(list.remove(&99), RemoveOutcome::Absent);
        assert_eq!(list.len(), 1);
        check_invariants(&list);
    }

    #[test]
    fn deleting_a_tall_tower_resets_the_level() {
        let list: SkipList<u64, String> =
            SkipList::with_options(16, 4, Box::new(ScriptedLevels::new([5])));
        list.insert(10, "ten".to_string());
        assert_eq!(list.tower.current_level(), 5);
        assert_eq!(list.remove(&10), RemoveOutcome::Removed);
        assert_eq!(list.tower.current_level(), 0);
        assert_eq!(list.len(), 0);
        check_invariants(&list);
    }

    #[test]
    fn multi_step_promotion_keeps_structure_valid() {
        let list: SkipList<u64, u64> =
            SkipList::with_options(16, 4, Box::new(ScriptedLevels::new([1, 6, 3, 6])));
        for k in [4, 2, 9, 6] {
            list.insert(k, k * 10);
        }
        assert_eq!(list.tower.current_level(), 6);
        check_invariants(&list);
        for k in [4, 2, 9, 6] {
            assert_eq!(list.get(&k), Some(k * 10));
        }
        list.remove(&2);
        list.remove(&6);
        check_invariants(&list);
    }

    #[test]
    fn range_boundaries() {
        let list: SkipList<i32, i32> = SkipList::new();
        for k in [1, 3, 5, 7] {
            list.insert(k, k);
        }
        assert!(list.range(&5, &3).is_empty());
        assert_eq!(list.range(&3, &3), vec![(3, 3)]);
        assert!(list.range(&4, &4).is_empty());
        assert_eq!(list.range(&0, &2), vec![(1, 1)]);
        assert_eq!(list.range(&6, &100), vec![(7, 7)]);
    }

    #[test]
    fn removed_nodes_are_recycled_by_the_pool() {
        let list: SkipList<u64, u64> = SkipList::new();
        for k in 0..32 {
            list.insert(k, k);
        }
        for k in 0..32 {
            list.remove(&k);
        }
        settle_epoch();
        assert!(
            list.pool_stats().free_list > 0,
            "removed nodes should land on the free list"
        );

        for k in 100..132 {
            list.insert(k, k);
        }
        let stats = list.pool_stats();
        assert!(stats.reused > 0, "inserts should reuse pooled nodes");
        check_invariants(&list);
    }

    #[test]
    fn concurrent_disjoint_inserts() {
        let list: SkipList<u64, u64> = SkipList::new();
        thread::scope(|scope| {
            for worker in 0..4u64 {
                let list = &list;
                scope.spawn(move || {
                    let base = worker * 1_000;
                    for k in base..base + 1_000 {
                        assert_eq!(list.insert(k, k * 2), InsertOutcome::Inserted);
                    }
                });
            }
        });
        assert_eq!(list.len(), 4_000);
        for k in 0..4_000 {
            assert_eq!(list.get(&k), Some(k * 2));
        }
        check_invariants(&list);
    }

    #[test]
    fn concurrent_mixed_operations_smoke() {
        let list: SkipList<u64, u64> = SkipList::new();
        for k in 0..512 {
            list.insert(k, k);
        }
        thread::scope(|scope| {
            for worker in 0..4u64 {
                let list = &list;
                scope.spawn(move || {
                    let mut rng = fastrand::Rng::with_seed(worker);
                    for _ in 0..2_000 {
                        let key = rng.u64(0..512);
                        match rng.u8(0..4) {
                            0 => {
                                list.insert(key, key);
                            }
                            1 => {
                                list.remove(&key);
                            }
                            2 => {
                                list.get(&key);
                            }
                            _ => {
                                let low = rng.u64(0..512);
                                let high = rng.u64(low..512);
                                for window in list.range(&low, &high).windows(2) {
                                    assert!(window[0].0 < window[1].0);
                                }
                            }
                        }
                    }
                });
            }
        });
        check_invariants(&list);
    }

    #[test]
    fn debug_output_mentions_levels() {
        let list: SkipList<u64, u64> =
            SkipList::with_options(8, 4, Box::new(ScriptedLevels::new([3, 1])));
        list.insert(1, 1);
        list.insert(2, 2);
        let rendered = format!("{:?}", list);
        assert!(rendered.contains("len: 2"));
        assert!(rendered.contains("level  2:"));
    }
}
