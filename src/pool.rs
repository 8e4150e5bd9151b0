//! A node pool that recycles skip-list nodes instead of freeing them.
//!
//! Removing a key unlinks its node from every level, but the allocation
//! behind it is worth keeping: the node box and, when heights match, its
//! whole forward array can serve the next insert without touching the
//! global allocator. The pool keeps a free list of unlinked nodes behind a
//! single mutex and tracks how often it constructs versus reuses.
//!
//! Nodes must only be handed back once no concurrent traversal can still
//! observe them; the engines guarantee that by routing every release
//! through an epoch-deferred call.

use crate::Node;
use crossbeam_epoch::Owned;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// Diagnostic counters for a [`NodePool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Nodes constructed fresh because the free list was empty.
    pub allocated: u64,
    /// Allocations satisfied by recycling a free node.
    pub reused: u64,
    /// Nodes currently parked on the free list.
    pub free_list: usize,
}

pub(crate) struct NodePool<K, P> {
    free: Mutex<Vec<Box<Node<K, P>>>>,
    allocated: AtomicU64,
    reused: AtomicU64,
}

impl<K, P> NodePool<K, P> {
    pub(crate) fn new() -> Self {
        NodePool {
            free: Mutex::new(Vec::new()),
            allocated: AtomicU64::new(0),
            reused: AtomicU64::new(0),
        }
    }

    /// Produces a node with exactly `height` null forward pointers, holding
    /// the given key and payload.
    ///
    /// Prefers the free list; a recycled node keeps its forward array when
    /// the requested height matches and reallocates it otherwise.
    pub(crate) fn allocate(&self, key: K, payload: P, height: usize) -> Owned<Node<K, P>> {
        if let Some(mut node) = self.free.lock().pop() {
            node.reset(key, payload, height);
            self.reused.fetch_add(1, Ordering::Relaxed);
            return Owned::from(node);
        }
        self.allocated.fetch_add(1, Ordering::Relaxed);
        Owned::new(Node::new(key, payload, height))
    }

    /// Parks an unlinked node on the free list for later reuse.
    ///
    /// The caller must have fully unlinked the node and waited out any
    /// concurrent readers (the engines call this from an epoch-deferred
    /// closure). The pool may hold the node indefinitely.
    pub(crate) fn release(&self, node: Box<Node<K, P>>) {
        self.free.lock().push(node);
    }

    pub(crate) fn stats(&self) -> PoolStats {
        PoolStats {
            allocated: self.allocated.load(Ordering::Relaxed),
            reused: self.reused.load(Ordering::Relaxed),
            free_list: self.free.lock().len(),
        }
    }
}
