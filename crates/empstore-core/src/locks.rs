//! Per-record shared/exclusive lock table keyed by client id.
//!
//! Every method takes the single table mutex for its whole duration, so each
//! call is atomic. Nothing waits: acquisition returns `false` immediately on
//! conflict and the caller decides whether to retry.
//!
//! Read locks are a set per record, so acquiring twice is a no-op and one
//! release frees it. A client may hold its own read lock and the write lock on
//! the same record at once (upgrade); a write lock never coexists with another
//! client's read lock.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// Lock holders of one record at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LockState {
    pub readers: BTreeSet<i32>,
    pub writer: Option<i32>,
}

impl LockState {
    pub fn is_free(&self) -> bool {
        self.readers.is_empty() && self.writer.is_none()
    }
}

#[derive(Debug, Default)]
struct Tables {
    read_locks: HashMap<i32, HashSet<i32>>,
    write_locks: HashMap<i32, i32>,
}

/// Thread-safe lock table.
#[derive(Debug, Default)]
pub struct LockTable {
    inner: Mutex<Tables>,
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    // Each update is a single map operation; a poisoned table is still consistent.
    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take a shared lock unless another client holds the write lock.
    pub fn acquire_read(&self, record_id: i32, client_id: i32) -> bool {
        let mut tables = self.tables();

        if let Some(&writer) = tables.write_locks.get(&record_id) {
            if writer != client_id {
                debug!(
                    "Read lock on {} denied to client {}: held for writing by {}",
                    record_id, client_id, writer
                );
                return false;
            }
        }

        tables
            .read_locks
            .entry(record_id)
            .or_default()
            .insert(client_id);
        true
    }

    /// Take the exclusive lock.
    ///
    /// Re-entrant for the current holder. Upgrading from a read lock works only
    /// while the caller is the sole reader.
    pub fn acquire_write(&self, record_id: i32, client_id: i32) -> bool {
        let mut tables = self.tables();

        if let Some(readers) = tables.read_locks.get(&record_id) {
            if readers.iter().any(|&reader| reader != client_id) {
                debug!(
                    "Write lock on {} denied to client {}: {} reader(s) present",
                    record_id,
                    client_id,
                    readers.len()
                );
                return false;
            }
        }

        if let Some(&writer) = tables.write_locks.get(&record_id) {
            if writer != client_id {
                debug!(
                    "Write lock on {} denied to client {}: held by {}",
                    record_id, client_id, writer
                );
                return false;
            }
        }

        tables.write_locks.insert(record_id, client_id);
        true
    }

    pub fn release_read(&self, record_id: i32, client_id: i32) {
        let mut tables = self.tables();
        if let Some(readers) = tables.read_locks.get_mut(&record_id) {
            readers.remove(&client_id);
            if readers.is_empty() {
                tables.read_locks.remove(&record_id);
            }
        }
    }

    /// Release the write lock if `client_id` holds it; otherwise do nothing.
    pub fn release_write(&self, record_id: i32, client_id: i32) {
        let mut tables = self.tables();
        if tables.write_locks.get(&record_id) == Some(&client_id) {
            tables.write_locks.remove(&record_id);
        }
    }

    /// Drop every lock held by `client_id`.
    pub fn release_all(&self, client_id: i32) {
        let mut tables = self.tables();

        tables.read_locks.retain(|_, readers| {
            readers.remove(&client_id);
            !readers.is_empty()
        });
        let before = tables.write_locks.len();
        tables.write_locks.retain(|_, writer| *writer != client_id);

        debug!(
            "Released all locks of client {} ({} write lock(s))",
            client_id,
            before - tables.write_locks.len()
        );
    }

    pub fn snapshot(&self, record_id: i32) -> LockState {
        let tables = self.tables();
        LockState {
            readers: tables
                .read_locks
                .get(&record_id)
                .map(|readers| readers.iter().copied().collect())
                .unwrap_or_default(),
            writer: tables.write_locks.get(&record_id).copied(),
        }
    }

    /// True when no record has any holder.
    pub fn is_empty(&self) -> bool {
        let tables = self.tables();
        tables.read_locks.is_empty() && tables.write_locks.is_empty()
    }
}
