//! Snapshot persistence for both engines.
//!
//! The snapshot format is line-oriented UTF-8 text: one `KEY:VALUE` entry
//! per line, in ascending key order from a base-level walk. `VALUE` is
//! everything after the first `:` up to the newline, so values may contain
//! the delimiter; keys must not. On load, empty lines, lines without a
//! delimiter, and lines that fail to parse are skipped silently.
//!
//! Dumps take every segment's write lock, so the file is a point-in-time
//! view; concurrent writers block until the walk finishes. The MVCC dump
//! resolves each key through a synthetic reader positioned after every
//! handed-out transaction id, which selects the latest committed value and
//! omits uncommitted or aborted writes.

use std::fmt::Display;
use std::fs::File;
use std::hash::Hash;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::str::FromStr;
use std::sync::atomic::Ordering;

use crossbeam_epoch as epoch;
use log::{debug, trace};
use metrics::counter;

use crate::error::Error;
use crate::metrics::{LABEL_DIRECTION, SNAPSHOT_ENTRIES_TOTAL};
use crate::mvcc::VersionedSkipList;
use crate::transaction::Transaction;
use crate::SkipList;

/// Splits one snapshot line into key and value text, rejecting lines
/// without the delimiter.
fn split_entry(line: &str) -> Option<(&str, &str)> {
    line.split_once(':')
}

impl<K, V> SkipList<K, V>
where
    K: Ord + Hash + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Writes every `KEY:VALUE` pair to `path` in ascending key order,
    /// returning the number of entries written.
    ///
    /// Keys must not render with a `:`; load splits on the first one.
    pub fn dump<Q: AsRef<Path>>(&self, path: Q) -> Result<usize, Error>
    where
        K: Display,
        V: Display,
    {
        let _all = self.tower.segments.write_all();
        let guard = &epoch::pin();
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);

        let mut written = 0;
        let mut current = self.tower.head_ref(guard).tower[0].load(Ordering::Acquire, guard);
        while let Some(node) = unsafe { current.as_ref() } {
            let value = node.payload.load(Ordering::Acquire, guard);
            if let Some(value) = unsafe { value.as_ref() } {
                // SAFETY: successors of the head always carry a key.
                writeln!(writer, "{}:{}", unsafe { node.key_unchecked() }, value)?;
                written += 1;
            }
            current = node.tower[0].load(Ordering::Acquire, guard);
        }
        writer.flush()?;

        counter!(SNAPSHOT_ENTRIES_TOTAL, LABEL_DIRECTION => "dump").increment(written as u64);
        debug!("dumped {} entries", written);
        Ok(written)
    }

    /// Reads `KEY:VALUE` lines from `path` and inserts them, returning the
    /// number of well-formed entries read. Malformed lines are skipped, and
    /// keys already present keep their value (insert semantics).
    pub fn load<Q: AsRef<Path>>(&self, path: Q) -> Result<usize, Error>
    where
        K: FromStr,
        V: FromStr,
    {
        let file = File::open(path)?;
        let reader = BufReader::new(file);

        let mut applied = 0;
        for line in reader.lines() {
            let line = line?;
            let Some((key, value)) = split_entry(&line) else {
                continue;
            };
            let (Ok(key), Ok(value)) = (key.parse::<K>(), value.parse::<V>()) else {
                trace!("skipping malformed snapshot line");
                continue;
            };
            self.insert(key, value);
            applied += 1;
        }

        counter!(SNAPSHOT_ENTRIES_TOTAL, LABEL_DIRECTION => "load").increment(applied as u64);
        debug!("loaded {} entries", applied);
        Ok(applied)
    }
}

impl<K, V> VersionedSkipList<K, V>
where
    K: Ord + Hash + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Writes the latest committed value of every key to `path` in
    /// ascending key order, returning the number of entries written.
    ///
    /// Uncommitted and aborted writes are omitted; keys whose newest
    /// committed version is a tombstone are omitted as well.
    pub fn dump<Q: AsRef<Path>>(&self, path: Q) -> Result<usize, Error>
    where
        K: Display,
        V: Display,
    {
        let _all = self.tower.segments.write_all();
        let reader_id = self.transaction_manager().next_txn_id();
        let guard = &epoch::pin();
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);

        let mut written = 0;
        let mut current = self.tower.head_ref(guard).tower[0].load(Ordering::Acquire, guard);
        while let Some(node) = unsafe { current.as_ref() } {
            if let Some(version) = node.payload.visible(reader_id) {
                // SAFETY: successors of the head always carry a key.
                writeln!(
                    writer,
                    "{}:{}",
                    unsafe { node.key_unchecked() },
                    version.value
                )?;
                written += 1;
            }
            current = node.tower[0].load(Ordering::Acquire, guard);
        }
        writer.flush()?;

        counter!(SNAPSHOT_ENTRIES_TOTAL, LABEL_DIRECTION => "dump").increment(written as u64);
        debug!("dumped {} committed entries", written);
        Ok(written)
    }

    /// Reads `KEY:VALUE` lines from `path` inside a single transaction and
    /// commits it, so the loaded state becomes visible atomically. Returns
    /// the number of entries applied; malformed lines are skipped.
    pub fn load<Q: AsRef<Path>>(&self, path: Q) -> Result<usize, Error>
    where
        K: FromStr,
        V: FromStr,
    {
        let txns = self.transaction_manager().clone();
        let txn = txns.begin();
        match self.apply_snapshot(path.as_ref(), &txn) {
            Ok(applied) => {
                txns.commit(&txn)?;
                counter!(SNAPSHOT_ENTRIES_TOTAL, LABEL_DIRECTION => "load")
                    .increment(applied as u64);
                debug!("loaded {} entries in txn {}", applied, txn.id());
                Ok(applied)
            }
            Err(err) => {
                txns.abort(&txn);
                Err(err)
            }
        }
    }

    fn apply_snapshot(&self, path: &Path, txn: &Transaction<V>) -> Result<usize, Error>
    where
        K: FromStr,
        V: FromStr,
    {
        let file = File::open(path)?;
        let reader = BufReader::new(file);

        let mut applied = 0;
        for line in reader.lines() {
            let line = line?;
            let Some((key, value)) = split_entry(&line) else {
                continue;
            };
            let (Ok(key), Ok(value)) = (key.parse::<K>(), value.parse::<V>()) else {
                trace!("skipping malformed snapshot line");
                continue;
            };
            self.insert(key, value, txn)?;
            applied += 1;
        }
        Ok(applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn dump_writes_sorted_entries() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("plain.snapshot");

        let list: SkipList<u64, String> = SkipList::new();
        for k in [30u64, 10, 20] {
            list.insert(k, format!("v{}", k));
        }
        assert_eq!(list.dump(&path).unwrap(), 3);

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "10:v10\n20:v20\n30:v30\n");
    }

    #[test]
    fn load_skips_malformed_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("dirty.snapshot");
        std::fs::write(
            &path,
            "1:one\n\nno delimiter\nnot-a-number:oops\n2:two:with:colons\n",
        )
        .unwrap();

        let list: SkipList<u64, String> = SkipList::new();
        assert_eq!(list.load(&path).unwrap(), 2);
        assert_eq!(list.get(&1), Some("one".to_string()));
        assert_eq!(list.get(&2), Some("two:with:colons".to_string()));
    }

    #[test]
    fn missing_snapshot_file_is_an_io_error() {
        let dir = tempdir().unwrap();
        let list: SkipList<u64, String> = SkipList::new();
        let err = list.load(dir.path().join("absent.snapshot")).unwrap_err();
        assert!(matches!(err, Error::Snapshot(_)));
    }

    #[test]
    fn mvcc_dump_takes_the_committed_view() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("mvcc.snapshot");

        let list: VersionedSkipList<u64, String> = VersionedSkipList::new();
        let txns = list.transaction_manager().clone();

        let committed = txns.begin();
        list.insert(1, "one".to_string(), &committed).unwrap();
        list.insert(2, "two".to_string(), &committed).unwrap();
        txns.commit(&committed).unwrap();

        let uncommitted = txns.begin();
        list.insert(2, "shadow".to_string(), &uncommitted).unwrap();
        list.insert(3, "phantom".to_string(), &uncommitted).unwrap();

        let aborted = txns.begin();
        list.insert(4, "gone".to_string(), &aborted).unwrap();
        txns.abort(&aborted);

        assert_eq!(list.dump(&path).unwrap(), 2);
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "1:one\n2:two\n");
        txns.abort(&uncommitted);
    }

    #[test]
    fn mvcc_load_is_atomically_visible() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("reload.snapshot");
        std::fs::write(&path, "5:five\n6:six\n").unwrap();

        let list: VersionedSkipList<u64, String> = VersionedSkipList::new();
        assert_eq!(list.load(&path).unwrap(), 2);

        let txns = list.transaction_manager().clone();
        let reader = txns.begin();
        assert_eq!(list.get(&5, &reader).unwrap(), Some("five".to_string()));
        assert_eq!(list.get(&6, &reader).unwrap(), Some("six".to_string()));
        assert_eq!(list.stats().commits, 1);
    }
}
