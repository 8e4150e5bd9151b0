//! Defines the metric keys and labels used throughout towermap.
//!
//! Using a central module for these constants helps prevent typos and ensures
//! consistency across the codebase.

// --- Metric Keys ---

/// Tracks the total number of transactions, labeled by their final status.
///
/// Labels:
/// - `status`: "committed", "aborted"
pub const TRANSACTIONS_TOTAL: &str = "towermap_transactions_total";

/// Tracks the total number of user-initiated operations.
///
/// Labels:
/// - `type`: "get", "insert", "remove", "range_scan"
pub const OPERATIONS_TOTAL: &str = "towermap_operations_total";

/// A gauge tracking the number of currently active transactions.
pub const ACTIVE_TRANSACTIONS: &str = "towermap_active_transactions";

/// Tracks the total number of dead versions reclaimed by garbage collection.
pub const GC_VERSIONS_RECLAIMED_TOTAL: &str = "towermap_gc_versions_reclaimed_total";

/// Tracks the total number of snapshot entries moved through persistence.
///
/// Labels:
/// - `direction`: "dump", "load"
pub const SNAPSHOT_ENTRIES_TOTAL: &str = "towermap_snapshot_entries_total";

// --- Label Keys ---

pub const LABEL_STATUS: &str = "status";
pub const LABEL_OPERATION_TYPE: &str = "type";
pub const LABEL_DIRECTION: &str = "direction";
