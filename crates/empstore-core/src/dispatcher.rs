//! Request handling against the lock table and record store.
//!
//! [`Dispatcher::handle`] turns one request into one response. The server loop
//! calls it for a single request at a time, so lock decisions and store
//! updates never interleave.

use crate::locks::LockTable;
use crate::protocol::{Operation, Request, Response, Status};
use crate::record::Record;
use crate::store::{self, RecordStore};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

/// Releases a write lock on drop unless the commit went through.
struct WriteLockGuard<'a> {
    locks: &'a LockTable,
    record_id: i32,
    client_id: i32,
    armed: bool,
}

impl<'a> WriteLockGuard<'a> {
    fn new(locks: &'a LockTable, record_id: i32, client_id: i32) -> Self {
        Self {
            locks,
            record_id,
            client_id,
            armed: true,
        }
    }

    fn keep(mut self) {
        self.armed = false;
    }
}

impl Drop for WriteLockGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            debug!(
                "Rolling back write lock on {} for client {}",
                self.record_id, self.client_id
            );
            self.locks.release_write(self.record_id, self.client_id);
        }
    }
}

/// Owns the lock table and the in-memory copy of the record set.
#[derive(Debug)]
pub struct Dispatcher {
    store: RecordStore,
    records: Mutex<Vec<Record>>,
    locks: LockTable,
}

impl Dispatcher {
    /// Load the record set from `store` and start with no locks.
    pub fn new(store: RecordStore) -> Self {
        let records = store.load();
        info!(
            "Loaded {} record(s) from {}",
            records.len(),
            store.path().display()
        );
        Self {
            store,
            records: Mutex::new(records),
            locks: LockTable::new(),
        }
    }

    pub fn locks(&self) -> &LockTable {
        &self.locks
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    fn current(&self) -> MutexGuard<'_, Vec<Record>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// A copy of the records as last persisted.
    pub fn records(&self) -> Vec<Record> {
        self.current().clone()
    }

    /// Drop every lock of a client that can no longer be reached.
    pub fn disconnect(&self, client_id: i32) {
        info!("Releasing locks of unreachable client {}", client_id);
        self.locks.release_all(client_id);
    }

    /// Process one request.
    pub fn handle(&self, request: &Request) -> Response {
        let client_id = request.client_id;
        let record_id = request.record_id;

        if request.operation != Operation::Exit {
            let records = self.current();
            if store::find(&records, record_id).is_none() {
                debug!("Record {} not found", record_id);
                return Response::to(request, Status::NotFound);
            }
        }

        match request.operation {
            Operation::Read => {
                info!("Client {} reading record {}", client_id, record_id);
                if self.locks.acquire_read(record_id, client_id) {
                    self.respond_with_current(request)
                } else {
                    Response::to(request, Status::Locked)
                }
            }
            Operation::Write if request.is_lock_only() => {
                info!("Client {} locking record {} for writing", client_id, record_id);
                if self.locks.acquire_write(record_id, client_id) {
                    self.respond_with_current(request)
                } else {
                    Response::to(request, Status::Locked)
                }
            }
            Operation::Write => {
                info!("Client {} writing record {}", client_id, record_id);
                self.commit(request)
            }
            Operation::Unlock => {
                info!("Client {} unlocking record {}", client_id, record_id);
                self.locks.release_read(record_id, client_id);
                self.locks.release_write(record_id, client_id);
                Response::to(request, Status::Success)
            }
            Operation::Exit => {
                info!("Client {} exiting", client_id);
                self.locks.release_all(client_id);
                Response::to(request, Status::Success)
            }
        }
    }

    fn respond_with_current(&self, request: &Request) -> Response {
        let records = self.current();
        match store::find(&records, request.record_id) {
            Some(record) => Response::to(request, Status::Success).with_payload(record.clone()),
            None => Response::to(request, Status::NotFound),
        }
    }

    fn commit(&self, request: &Request) -> Response {
        let client_id = request.client_id;
        let record_id = request.record_id;

        if request.payload.id != record_id {
            warn!(
                "Client {} tried to write record {} with payload id {}",
                client_id, record_id, request.payload.id
            );
            return Response::to(request, Status::Error);
        }

        if !self.locks.acquire_write(record_id, client_id) {
            return Response::to(request, Status::Locked);
        }
        let guard = WriteLockGuard::new(&self.locks, record_id, client_id);

        let mut records = self.current();
        let mut updated = records.clone();
        match store::find_mut(&mut updated, record_id) {
            Some(slot) => *slot = request.payload.clone(),
            None => return Response::to(request, Status::NotFound),
        }

        match self.store.replace(&updated) {
            Ok(()) => {
                *records = updated;
                guard.keep();
                info!("Record {} updated by client {}", record_id, client_id);
                Response::to(request, Status::Success).with_payload(request.payload.clone())
            }
            Err(e) => {
                warn!("Failed to persist record {}: {}", record_id, e);
                Response::to(request, Status::Error)
            }
        }
    }
}
