//! Client API over any [`ClientChannel`].
//!
//! Each call sends one request and waits for the matching response with a
//! bounded timeout. Requests carry a per-session timestamp that increases
//! with every call; the server echoes it, which is how a reply is matched to
//! its request. The per-operation methods return the raw [`Response`] so
//! that `LOCKED`/`NOT_FOUND`/`ERROR` stay ordinary outcomes; `Err` always
//! means no usable response arrived.

use crate::config::TransportConfig;
use crate::protocol::{now_timestamp, Request, Response};
use crate::record::Record;
use crate::transport::ClientChannel;
use crate::{Result, StoreError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// A client session identified by its channel's client id.
#[derive(Debug)]
pub struct RecordClient<C: ClientChannel> {
    channel: C,
    reply_timeout: Duration,
    last_timestamp: u64,
}

impl<C: ClientChannel> RecordClient<C> {
    pub fn new(channel: C) -> Self {
        Self {
            channel,
            reply_timeout: TransportConfig::REPLY_TIMEOUT,
            last_timestamp: 0,
        }
    }

    pub fn with_reply_timeout(mut self, timeout: Duration) -> Self {
        self.reply_timeout = timeout;
        self
    }

    pub fn client_id(&self) -> i32 {
        self.channel.client_id()
    }

    /// Clock seconds, bumped past the previous stamp when calls share a second.
    fn next_timestamp(&mut self) -> u64 {
        let stamp = now_timestamp().max(self.last_timestamp + 1);
        self.last_timestamp = stamp;
        stamp
    }

    /// Send `request` and wait for its response.
    ///
    /// The request's timestamp is replaced with the next session stamp.
    /// Responses echoing any other stamp or record id (late replies to an
    /// earlier timed-out request) are discarded. Returns `StoreError::Timeout`
    /// when nothing matching arrives in time.
    pub async fn call(&mut self, mut request: Request) -> Result<Response> {
        request.timestamp = self.next_timestamp();
        self.channel.send_request(&request).await?;
        debug!(
            "Client {} sent {:?} for record {}",
            request.client_id, request.operation, request.record_id
        );

        let deadline = Instant::now() + self.reply_timeout;
        loop {
            let response = tokio::time::timeout_at(deadline, self.channel.recv_response())
                .await
                .map_err(|_| StoreError::Timeout(self.reply_timeout))??;

            if response.record_id == request.record_id && response.timestamp == request.timestamp
            {
                return Ok(response);
            }
            warn!(
                "Client {} discarding stale response for record {} (stamp {})",
                request.client_id, response.record_id, response.timestamp
            );
        }
    }

    /// Take a shared lock and fetch the record.
    pub async fn read(&mut self, record_id: i32) -> Result<Response> {
        self.call(Request::read(self.client_id(), record_id)).await
    }

    /// Take the write lock and fetch the record without changing it.
    pub async fn lock_for_write(&mut self, record_id: i32) -> Result<Response> {
        self.call(Request::lock_for_write(self.client_id(), record_id))
            .await
    }

    /// Overwrite the stored record with `record.id`.
    pub async fn commit(&mut self, record: Record) -> Result<Response> {
        self.call(Request::commit(self.client_id(), record)).await
    }

    pub async fn unlock(&mut self, record_id: i32) -> Result<Response> {
        self.call(Request::unlock(self.client_id(), record_id)).await
    }

    /// Release every lock this client holds.
    pub async fn exit(&mut self) -> Result<Response> {
        self.call(Request::exit(self.client_id())).await
    }

    /// Read-modify-write: lock, let `edit` change the current value, commit,
    /// then unlock whatever the commit outcome.
    ///
    /// Non-success statuses come back as `NotFound`, `Locked` or `ServerError`.
    pub async fn modify<F>(&mut self, record_id: i32, edit: F) -> Result<Record>
    where
        F: FnOnce(&mut Record),
    {
        let mut record = self.lock_for_write(record_id).await?.into_result()?;
        edit(&mut record);
        record.id = record_id;

        let committed = self.commit(record).await;

        match self.unlock(record_id).await {
            Ok(response) if response.is_success() => {}
            Ok(response) => warn!(
                "Unlock of record {} answered {}",
                record_id,
                response.status.as_str()
            ),
            Err(e) => warn!("Unlock of record {} failed: {}", record_id, e),
        }

        committed?.into_result()
    }

    /// Send EXIT and tear down the channel.
    pub async fn close(mut self) -> Result<()> {
        self.exit().await?.into_result().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::Dispatcher;
    use crate::protocol::Status;
    use crate::server::Server;
    use crate::store::RecordStore;
    use crate::transport::{MemoryHub, RequestSource, ResponseSink};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn seeded_dispatcher(temp_dir: &TempDir) -> Arc<Dispatcher> {
        let store = RecordStore::new(temp_dir.path().join("staff.dat"));
        store
            .replace(&[Record::new(1, "Alice", 40.0), Record::new(2, "Bob", 35.5)])
            .unwrap();
        Arc::new(Dispatcher::new(store))
    }

    fn start(temp_dir: &TempDir) -> (MemoryHub, crate::server::ServerHandle, Arc<Dispatcher>) {
        let dispatcher = seeded_dispatcher(temp_dir);
        let (hub, source) = MemoryHub::new();
        let handle = Server::start(dispatcher.clone(), source, hub.sink());
        (hub, handle, dispatcher)
    }

    #[tokio::test]
    async fn test_modify_commits_and_unlocks() {
        let temp_dir = TempDir::new().unwrap();
        let (hub, _handle, dispatcher) = start(&temp_dir);
        let mut client = RecordClient::new(hub.connect(1));

        let record = client
            .modify(2, |r| {
                r.name = "Robert".into();
                r.hours = 38.0;
            })
            .await
            .unwrap();

        assert_eq!(record, Record::new(2, "Robert", 38.0));
        assert_eq!(dispatcher.store().load()[1], Record::new(2, "Robert", 38.0));
        assert!(dispatcher.locks().is_empty());
    }

    #[tokio::test]
    async fn test_modify_locked_record_is_error() {
        let temp_dir = TempDir::new().unwrap();
        let (hub, _handle, _dispatcher) = start(&temp_dir);
        let mut reader = RecordClient::new(hub.connect(1));
        let mut writer = RecordClient::new(hub.connect(2));

        assert!(reader.read(1).await.unwrap().is_success());
        let result = writer.modify(1, |r| r.hours = 0.0).await;
        assert!(matches!(result, Err(StoreError::Locked { record_id: 1 })));
    }

    #[tokio::test]
    async fn test_modify_cannot_change_record_id() {
        let temp_dir = TempDir::new().unwrap();
        let (hub, _handle, dispatcher) = start(&temp_dir);
        let mut client = RecordClient::new(hub.connect(1));

        client.modify(1, |r| r.id = 77).await.unwrap();
        assert_eq!(dispatcher.store().load()[0].id, 1);
    }

    #[tokio::test]
    async fn test_timeout_is_distinct_from_status() {
        // No server is reading the inbound queue.
        let (hub, _source) = MemoryHub::new();
        let mut client =
            RecordClient::new(hub.connect(3)).with_reply_timeout(Duration::from_millis(50));

        let result = client.read(1).await;
        assert!(matches!(result, Err(StoreError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_timestamps_increase_per_call() {
        let (hub, _source) = MemoryHub::new();
        let mut client = RecordClient::new(hub.connect(1));

        let first = client.next_timestamp();
        let second = client.next_timestamp();
        assert!(first >= now_timestamp() - 1);
        assert!(second > first);
    }

    #[tokio::test]
    async fn test_late_reply_is_not_taken_for_next_call() {
        let (hub, mut source) = MemoryHub::new();
        let sink = hub.sink();
        let mut client =
            RecordClient::new(hub.connect(1)).with_reply_timeout(Duration::from_millis(50));

        let result = client.read(2).await;
        assert!(matches!(result, Err(StoreError::Timeout(_))));

        // The READ is answered only after the client gave up on it.
        let late = source.recv().await.unwrap().unwrap();
        sink.send(1, &Response::to(&late, Status::Locked))
            .await
            .unwrap();

        let responder = tokio::spawn(async move {
            let request = source.recv().await.unwrap().unwrap();
            sink.send(1, &Response::to(&request, Status::Success))
                .await
                .unwrap();
        });

        let response = client.unlock(2).await.unwrap();
        assert_eq!(response.status, Status::Success);
        responder.await.unwrap();
    }

    #[tokio::test]
    async fn test_modify_after_timed_out_unlock_keeps_record_intact() {
        let temp_dir = TempDir::new().unwrap();
        let dispatcher = seeded_dispatcher(&temp_dir);
        let (hub, source) = MemoryHub::new();
        let mut client =
            RecordClient::new(hub.connect(1)).with_reply_timeout(Duration::from_millis(300));

        // Nobody serves yet, so the UNLOCK times out and stays queued.
        let result = client.unlock(2).await;
        assert!(matches!(result, Err(StoreError::Timeout(_))));

        let _handle = Server::start(dispatcher.clone(), source, hub.sink());
        let record = client.modify(2, |r| r.hours = 1.0).await.unwrap();

        assert_eq!(record, Record::new(2, "Bob", 1.0));
        assert_eq!(dispatcher.store().load()[1], Record::new(2, "Bob", 1.0));
        assert!(dispatcher.locks().is_empty());
    }

    #[tokio::test]
    async fn test_close_releases_locks() {
        let temp_dir = TempDir::new().unwrap();
        let (hub, _handle, dispatcher) = start(&temp_dir);
        let mut client = RecordClient::new(hub.connect(4));

        assert_eq!(client.lock_for_write(2).await.unwrap().status, Status::Success);
        client.close().await.unwrap();
        assert!(dispatcher.locks().is_empty());
    }
}
