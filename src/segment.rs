//! Segmented locking over the key space.
//!
//! The key space is partitioned by hash into a fixed number of segments,
//! each guarded by its own reader-writer lock. Operations on a single key
//! take exactly one segment lock, so threads working on different segments
//! never contend. Global operations (snapshots, stable range scans) take
//! every segment in ascending index order, which rules out lock-order
//! deadlocks between any two global acquirers.
//!
//! The permitted acquisition patterns are:
//!
//! 1. a single segment lock for a single-key operation,
//! 2. all segments in ascending order via [`SegmentTable::read_all`] or
//!    [`SegmentTable::write_all`],
//! 3. auxiliary engine mutexes (level, pool, version-chain) taken only
//!    while a segment lock is already held, never before it.

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hash};

/// The default number of segments. A power of two spreads hashes evenly.
pub const DEFAULT_SEGMENT_COUNT: usize = 16;

/// A fixed array of reader-writer locks partitioning the key space by hash.
///
/// The hash function is fixed at construction, so a given key maps to the
/// same segment for the lifetime of the table no matter where the lookup
/// happens. Two threads acting on the same key therefore always contend on
/// the same lock.
pub struct SegmentTable {
    locks: Box<[RwLock<()>]>,
    hasher: RandomState,
}

impl SegmentTable {
    /// Creates a table with `segment_count` independently lockable segments.
    ///
    /// # Panics
    ///
    /// Panics if `segment_count` is zero.
    pub fn new(segment_count: usize) -> Self {
        assert!(segment_count > 0, "segment count must be non-zero");
        SegmentTable {
            locks: (0..segment_count).map(|_| RwLock::new(())).collect(),
            hasher: RandomState::new(),
        }
    }

    /// Returns the number of segments.
    pub fn segment_count(&self) -> usize {
        self.locks.len()
    }

    /// Maps a key to its segment index in `[0, segment_count)`.
    pub fn segment_of<K: Hash + ?Sized>(&self, key: &K) -> usize {
        self.hasher.hash_one(key) as usize % self.locks.len()
    }

    /// Acquires the read lock for one segment.
    pub fn read(&self, index: usize) -> RwLockReadGuard<'_, ()> {
        self.locks[index].read()
    }

    /// Acquires the write lock for one segment.
    pub fn write(&self, index: usize) -> RwLockWriteGuard<'_, ()> {
        self.locks[index].write()
    }

    /// Acquires every segment's read lock in ascending index order.
    pub fn read_all(&self) -> AllSegmentsRead<'_> {
        AllSegmentsRead {
            guards: self.locks.iter().map(|lock| lock.read()).collect(),
        }
    }

    /// Acquires every segment's write lock in ascending index order.
    ///
    /// Used by snapshot dumps and any operation that must observe a globally
    /// consistent structure. Locks are released in reverse order when the
    /// returned guard is dropped.
    pub fn write_all(&self) -> AllSegmentsWrite<'_> {
        AllSegmentsWrite {
            guards: self.locks.iter().map(|lock| lock.write()).collect(),
        }
    }
}

impl std::fmt::Debug for SegmentTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentTable")
            .field("segments", &self.locks.len())
            .finish()
    }
}

/// Read guards over every segment, released in reverse acquisition order.
pub struct AllSegmentsRead<'a> {
    guards: Vec<RwLockReadGuard<'a, ()>>,
}

impl Drop for AllSegmentsRead<'_> {
    fn drop(&mut self) {
        while self.guards.pop().is_some() {}
    }
}

/// Write guards over every segment, released in reverse acquisition order.
pub struct AllSegmentsWrite<'a> {
    guards: Vec<RwLockWriteGuard<'a, ()>>,
}

impl Drop for AllSegmentsWrite<'_> {
    fn drop(&mut self) {
        while self.guards.pop().is_some() {}
    }
}
