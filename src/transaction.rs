//! Transactions, versions, and visibility for the MVCC engine.
//!
//! Each key in a [`VersionedSkipList`](crate::mvcc::VersionedSkipList) owns
//! a [`VersionChain`]: an append-only list of [`Version`]s, newest first,
//! guarded by the chain's own mutex. Writers append; nobody mutates a value
//! in place. A reader resolves a key by walking the chain from the newest
//! version and taking the first one visible to its transaction.
//!
//! Isolation is Read-Committed. No snapshot is taken at `begin`; every read
//! re-evaluates visibility, so a transaction sees its own writes at once
//! and everyone else's writes as soon as their transaction commits.
//!
//! The chain mutex is orthogonal to the segment locks: two threads touching
//! different keys never contend on it, and it is always taken after any
//! segment lock the caller already holds.

use crate::error::Error;
use crate::metrics::{ACTIVE_TRANSACTIONS, LABEL_STATUS, TRANSACTIONS_TOTAL};
use dashmap::DashMap;
use log::trace;
use metrics::{counter, gauge};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

/// A unique identifier for a transaction, drawn from a monotonic counter.
pub type TxId = u64;

/// The `delete_ts` sentinel for a version that has not been deleted.
pub const TXID_INFINITY: TxId = TxId::MAX;

/// The status of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// The transaction is currently in progress.
    Active,
    /// The transaction has successfully committed.
    Committed,
    /// The transaction has been aborted; its versions stay invisible and
    /// are reclaimed by garbage collection.
    Aborted,
}

const STATE_ACTIVE: u8 = 0;
const STATE_COMMITTED: u8 = 1;
const STATE_ABORTED: u8 = 2;

impl TransactionState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            STATE_ACTIVE => TransactionState::Active,
            STATE_COMMITTED => TransactionState::Committed,
            _ => TransactionState::Aborted,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            TransactionState::Active => STATE_ACTIVE,
            TransactionState::Committed => STATE_COMMITTED,
            TransactionState::Aborted => STATE_ABORTED,
        }
    }
}

/// A single version of a value in the multi-version store.
#[derive(Debug)]
pub struct Version<V> {
    /// The actual value.
    pub value: V,
    /// The id of the transaction that created this version.
    pub create_ts: TxId,
    /// The id of the transaction that deleted this version, or
    /// [`TXID_INFINITY`] while it is live. Set at most once.
    pub delete_ts: AtomicU64,
    /// Whether the creating transaction has committed. Monotonic: once set
    /// it is never cleared.
    pub committed: AtomicBool,
}

impl<V> Version<V> {
    fn new(value: V, create_ts: TxId) -> Self {
        Version {
            value,
            create_ts,
            delete_ts: AtomicU64::new(TXID_INFINITY),
            committed: AtomicBool::new(false),
        }
    }

    /// Decides whether this version can be observed by transaction `txn_id`.
    ///
    /// A version is visible to its own creator as long as the creator has
    /// not deleted it, and to everyone else once the creator has committed,
    /// provided the version was created before the reader began and not
    /// deleted at or before the reader's id.
    pub fn is_visible_to(&self, txn_id: TxId) -> bool {
        let delete_ts = self.delete_ts.load(Ordering::Acquire);
        if self.create_ts == txn_id {
            return delete_ts > txn_id;
        }
        self.committed.load(Ordering::Acquire) && self.create_ts < txn_id && delete_ts > txn_id
    }
}

/// The per-key chain of versions, guarded by its own mutex.
///
/// Versions are stored oldest first and walked newest first. Readers get an
/// `Arc` to the version they resolved, so a value reference can outlive the
/// chain lock even while garbage collection prunes around it.
pub struct VersionChain<V> {
    versions: Mutex<Vec<Arc<Version<V>>>>,
}

impl<V> Default for VersionChain<V> {
    fn default() -> Self {
        VersionChain {
            versions: Mutex::new(Vec::new()),
        }
    }
}

impl<V> VersionChain<V> {
    pub(crate) fn with_version(value: V, txn_id: TxId) -> Self {
        VersionChain {
            versions: Mutex::new(vec![Arc::new(Version::new(value, txn_id))]),
        }
    }

    /// Appends a new head version created by `txn_id`.
    pub(crate) fn push(&self, value: V, txn_id: TxId) {
        self.versions
            .lock()
            .push(Arc::new(Version::new(value, txn_id)));
    }

    /// Returns the newest version visible to `txn_id`, if any.
    pub fn visible(&self, txn_id: TxId) -> Option<Arc<Version<V>>> {
        self.versions
            .lock()
            .iter()
            .rev()
            .find(|version| version.is_visible_to(txn_id))
            .cloned()
    }

    /// Marks the head version deleted by `txn_id`.
    ///
    /// Returns `false` when the chain is empty or the head already carries
    /// a tombstone; `delete_ts` transitions away from infinity exactly once.
    pub(crate) fn tombstone(&self, txn_id: TxId) -> bool {
        let versions = self.versions.lock();
        let Some(head) = versions.last() else {
            return false;
        };
        head.delete_ts
            .compare_exchange(TXID_INFINITY, txn_id, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Marks every version created by `txn_id` as committed.
    pub(crate) fn commit(&self, txn_id: TxId) {
        for version in self.versions.lock().iter() {
            if version.create_ts == txn_id {
                version.committed.store(true, Ordering::Release);
            }
        }
    }

    /// Prunes versions that no live or future transaction can observe and
    /// returns how many were dropped.
    ///
    /// The head version is always retained. An older version is dead when
    /// it was deleted before every live transaction began, or when the
    /// nearest retained newer version is committed, undeleted, and was
    /// created before every live transaction began (that newer version then
    /// shadows it for every possible reader).
    pub(crate) fn collect(&self, min_active: TxId) -> usize {
        let mut versions = self.versions.lock();
        if versions.len() <= 1 {
            return 0;
        }
        let before = versions.len();
        let mut kept: Vec<Arc<Version<V>>> = Vec::with_capacity(before);
        let mut newest = versions.iter().rev();
        let head = newest.next().expect("chain checked non-empty").clone();
        let mut shield = head.clone();
        kept.push(head);
        for version in newest {
            let deleted_for_all = version.delete_ts.load(Ordering::Acquire) < min_active;
            let shadowed_for_all = shield.committed.load(Ordering::Acquire)
                && shield.create_ts < min_active
                && shield.delete_ts.load(Ordering::Acquire) == TXID_INFINITY;
            if deleted_for_all || shadowed_for_all {
                continue;
            }
            shield = version.clone();
            kept.push(version.clone());
        }
        kept.reverse();
        *versions = kept;
        before - versions.len()
    }

    /// The number of versions currently in the chain.
    pub fn depth(&self) -> usize {
        self.versions.lock().len()
    }
}

/// A single transaction: an id, a state, and the set of chains it wrote.
pub struct Transaction<V> {
    id: TxId,
    state: AtomicU8,
    dirty: Mutex<Vec<Arc<VersionChain<V>>>>,
}

impl<V> Transaction<V> {
    fn new(id: TxId) -> Self {
        Transaction {
            id,
            state: AtomicU8::new(STATE_ACTIVE),
            dirty: Mutex::new(Vec::new()),
        }
    }

    pub fn id(&self) -> TxId {
        self.id
    }

    pub fn state(&self) -> TransactionState {
        TransactionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_active(&self) -> bool {
        self.state() == TransactionState::Active
    }

    /// Records a chain this transaction appended to, so commit can mark the
    /// matching versions.
    pub(crate) fn record_write(&self, chain: Arc<VersionChain<V>>) {
        self.dirty.lock().push(chain);
    }

    fn transition(&self, to: TransactionState) -> bool {
        self.state
            .compare_exchange(
                STATE_ACTIVE,
                to.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
}

/// Manages the lifecycle of every transaction in one MVCC map.
///
/// Hands out monotonically increasing ids starting at 1, tracks the active
/// set, and drives commit and abort. The registry is the only structure
/// touched by every lifecycle operation, so nothing here is held across a
/// chain or segment lock.
pub struct TransactionManager<V> {
    next_txn_id: AtomicU64,
    active: DashMap<TxId, Arc<Transaction<V>>>,
    commits: AtomicU64,
    aborts: AtomicU64,
}

impl<V> TransactionManager<V> {
    pub fn new() -> Self {
        TransactionManager {
            next_txn_id: AtomicU64::new(1),
            active: DashMap::new(),
            commits: AtomicU64::new(0),
            aborts: AtomicU64::new(0),
        }
    }

    /// Begins a new transaction and registers it as active.
    pub fn begin(&self) -> Arc<Transaction<V>> {
        let id = self.next_txn_id.fetch_add(1, Ordering::SeqCst);
        let txn = Arc::new(Transaction::new(id));
        self.active.insert(id, txn.clone());
        gauge!(ACTIVE_TRANSACTIONS).increment(1.0);
        trace!("txn {} begin", id);
        txn
    }

    /// Commits `txn`: every version it created becomes visible to later
    /// transactions.
    ///
    /// Fails with [`Error::InactiveTransaction`] when the transaction
    /// already committed or aborted.
    pub fn commit(&self, txn: &Transaction<V>) -> Result<(), Error> {
        if !txn.transition(TransactionState::Committed) {
            return Err(Error::InactiveTransaction);
        }
        for chain in txn.dirty.lock().iter() {
            chain.commit(txn.id);
        }
        self.active.remove(&txn.id);
        self.commits.fetch_add(1, Ordering::Relaxed);
        counter!(TRANSACTIONS_TOTAL, LABEL_STATUS => "committed").increment(1);
        gauge!(ACTIVE_TRANSACTIONS).decrement(1.0);
        trace!("txn {} commit", txn.id);
        Ok(())
    }

    /// Aborts `txn`. Its versions are never marked committed, stay
    /// invisible to every other transaction, and are reclaimed by garbage
    /// collection. Aborting a non-active transaction is a no-op.
    pub fn abort(&self, txn: &Transaction<V>) {
        if !txn.transition(TransactionState::Aborted) {
            return;
        }
        self.active.remove(&txn.id);
        self.aborts.fetch_add(1, Ordering::Relaxed);
        counter!(TRANSACTIONS_TOTAL, LABEL_STATUS => "aborted").increment(1);
        gauge!(ACTIVE_TRANSACTIONS).decrement(1.0);
        trace!("txn {} abort", txn.id);
    }

    /// The id the next `begin` will hand out.
    pub fn next_txn_id(&self) -> TxId {
        self.next_txn_id.load(Ordering::SeqCst)
    }

    /// The oldest live transaction id, or the next id when none are live.
    /// Garbage collection uses this as its reclamation horizon.
    pub fn min_active(&self) -> TxId {
        self.active
            .iter()
            .map(|entry| *entry.key())
            .min()
            .unwrap_or_else(|| self.next_txn_id())
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn commit_count(&self) -> u64 {
        self.commits.load(Ordering::Relaxed)
    }

    pub fn abort_count(&self) -> u64 {
        self.aborts.load(Ordering::Relaxed)
    }
}

impl<V> Default for TransactionManager<V> {
    fn default() -> Self {
        Self::new()
    }
}
