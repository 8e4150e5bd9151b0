//! Defines the error types used throughout towermap.
use std::fmt;
use std::io;

/// The primary error enum for all fallible operations in towermap.
///
/// Normal outcomes such as inserting over an existing key or removing a
/// missing one are not errors; they are reported through
/// [`InsertOutcome`](crate::InsertOutcome) and
/// [`RemoveOutcome`](crate::RemoveOutcome) so callers can always tell the
/// two apart.
#[derive(Debug, PartialEq, Eq)]
pub enum Error {
    /// A transactional operation was attempted on a transaction that is no
    /// longer `Active` (it already committed or aborted).
    InactiveTransaction,
    /// Wraps an error originating from the snapshot layer.
    Snapshot(SnapshotError),
}

/// A specific error originating from the snapshot dump/load path.
///
/// Malformed snapshot lines are not errors; they are skipped during load.
#[derive(Debug, PartialEq, Eq)]
pub enum SnapshotError {
    /// An underlying I/O error from the filesystem.
    Io(String),
}

impl fmt::Display for SnapshotError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SnapshotError::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for SnapshotError {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InactiveTransaction => {
                write!(f, "Transaction is not active")
            }
            Error::Snapshot(e) => write!(f, "Snapshot error: {}", e),
        }
    }
}

impl std::error::Error for Error {}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Snapshot(SnapshotError::Io(err.to_string()))
    }
}
