//! End-to-end tests for the record server.
//!
//! These drive a real [`Server`] over both transports and check what ends up
//! on disk.

use empstore_core::transport::{ClientChannel, MemoryHub};
use empstore_core::{
    Dispatcher, Record, RecordClient, RecordStore, Request, Server, ServerHandle, Status,
};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Create a store holding Alice and Bob.
fn create_store(temp_dir: &TempDir) -> RecordStore {
    let store = RecordStore::new(temp_dir.path().join("employees.bin"));
    store
        .replace(&[Record::new(1, "Alice", 40.0), Record::new(2, "Bob", 35.5)])
        .expect("Failed to seed store");
    store
}

fn start_memory_server(store: RecordStore) -> (MemoryHub, ServerHandle, Arc<Dispatcher>) {
    let dispatcher = Arc::new(Dispatcher::new(store));
    let (hub, source) = MemoryHub::new();
    let handle = Server::start(dispatcher.clone(), source, hub.sink());
    (hub, handle, dispatcher)
}

#[tokio::test]
async fn test_reader_blocks_writer_until_unlock() {
    let temp_dir = TempDir::new().unwrap();
    let (hub, handle, _dispatcher) = start_memory_server(create_store(&temp_dir));
    let mut a = RecordClient::new(hub.connect(1));
    let mut b = RecordClient::new(hub.connect(2));

    let response = a.read(2).await.unwrap();
    assert_eq!(response.status, Status::Success);
    assert_eq!(response.payload, Record::new(2, "Bob", 35.5));

    let response = b.lock_for_write(2).await.unwrap();
    assert_eq!(response.status, Status::Locked);

    assert!(a.unlock(2).await.unwrap().is_success());

    let response = b.lock_for_write(2).await.unwrap();
    assert_eq!(response.status, Status::Success);
    assert_eq!(response.payload, Record::new(2, "Bob", 35.5));

    let response = b.commit(Record::new(2, "Robert", 38.0)).await.unwrap();
    assert_eq!(response.status, Status::Success);
    assert_eq!(response.payload, Record::new(2, "Robert", 38.0));

    handle.shutdown();
    handle.join().await.unwrap();

    let on_disk = RecordStore::new(temp_dir.path().join("employees.bin")).load();
    assert_eq!(
        on_disk,
        vec![Record::new(1, "Alice", 40.0), Record::new(2, "Robert", 38.0)]
    );
}

#[tokio::test]
async fn test_file_layout_is_fixed_width() {
    let temp_dir = TempDir::new().unwrap();
    let store = create_store(&temp_dir);

    let bytes = std::fs::read(store.path()).unwrap();
    assert_eq!(bytes.len(), 2 * 22);
    assert_eq!(&bytes[0..4], &1i32.to_le_bytes());
    assert_eq!(&bytes[4..9], b"Alice");
    assert_eq!(bytes[9], 0);
    assert_eq!(&bytes[14..22], &40.0f64.to_le_bytes());
}

#[tokio::test]
async fn test_unknown_record_is_not_found() {
    let temp_dir = TempDir::new().unwrap();
    let (hub, _handle, dispatcher) = start_memory_server(create_store(&temp_dir));
    let mut client = RecordClient::new(hub.connect(1));

    let response = client.read(99).await.unwrap();
    assert_eq!(response.status, Status::NotFound);
    assert_eq!(response.record_id, 99);
    assert!(dispatcher.locks().is_empty());
}

#[tokio::test]
async fn test_exit_frees_write_lock_for_others() {
    let temp_dir = TempDir::new().unwrap();
    let store = RecordStore::new(temp_dir.path().join("employees.bin"));
    store
        .replace(&[
            Record::new(1, "Alice", 40.0),
            Record::new(2, "Bob", 35.5),
            Record::new(3, "Carol", 12.25),
        ])
        .unwrap();
    let (hub, _handle, _dispatcher) = start_memory_server(store);
    let mut holder = RecordClient::new(hub.connect(5));
    let mut waiter = RecordClient::new(hub.connect(6));

    assert!(holder.lock_for_write(3).await.unwrap().is_success());
    assert_eq!(waiter.read(3).await.unwrap().status, Status::Locked);

    holder.close().await.unwrap();
    let response = waiter.lock_for_write(3).await.unwrap();
    assert_eq!(response.status, Status::Success);
    assert_eq!(response.payload.name.as_str(), "Carol");
}

#[tokio::test]
async fn test_commit_response_echoes_timestamp() {
    let temp_dir = TempDir::new().unwrap();
    let (hub, _handle, _dispatcher) = start_memory_server(create_store(&temp_dir));
    let mut channel = hub.connect(1);

    let mut request = Request::commit(1, Record::new(1, "Alicia", 41.5));
    request.timestamp = 1_700_000_000;
    channel.send_request(&request).await.unwrap();
    let response = channel.recv_response().await.unwrap();

    assert_eq!(response.status, Status::Success);
    assert_eq!(response.timestamp, 1_700_000_000);
    assert_eq!(response.payload.name.as_str(), "Alicia");
}

#[tokio::test]
async fn test_request_after_shutdown_is_transport_error() {
    let temp_dir = TempDir::new().unwrap();
    let (hub, handle, _dispatcher) = start_memory_server(create_store(&temp_dir));
    let mut client =
        RecordClient::new(hub.connect(1)).with_reply_timeout(Duration::from_millis(100));

    handle.shutdown();
    handle.join().await.unwrap();

    let result = client.read(1).await;
    assert!(matches!(result, Err(ref e) if e.is_transport()));
}

#[tokio::test]
async fn test_restart_sees_committed_data() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("employees.bin");
    {
        let (hub, handle, _dispatcher) = start_memory_server(create_store(&temp_dir));
        let mut client = RecordClient::new(hub.connect(1));
        client.modify(1, |r| r.hours = 45.0).await.unwrap();
        handle.shutdown();
        handle.join().await.unwrap();
    }

    let (hub, _handle, _dispatcher) = start_memory_server(RecordStore::new(&path));
    let mut client = RecordClient::new(hub.connect(1));
    let response = client.read(1).await.unwrap();
    assert_eq!(response.payload.hours, 45.0);
}

#[cfg(unix)]
mod fifo {
    use super::*;
    use empstore_core::transport::{FifoClient, FifoSink, FifoSource};
    use empstore_core::FifoPaths;

    #[tokio::test]
    async fn test_end_to_end_over_named_pipes() {
        let temp_dir = TempDir::new().unwrap();
        let paths = FifoPaths::in_dir(temp_dir.path());
        let dispatcher = Arc::new(Dispatcher::new(create_store(&temp_dir)));

        let source = FifoSource::create(&paths).unwrap();
        let handle = Server::start(dispatcher.clone(), source, FifoSink::new(paths.clone()));

        let mut a = RecordClient::new(FifoClient::connect(1, &paths).unwrap());
        let mut b = RecordClient::new(FifoClient::connect(2, &paths).unwrap());

        assert_eq!(a.read(2).await.unwrap().status, Status::Success);
        assert_eq!(b.lock_for_write(2).await.unwrap().status, Status::Locked);
        assert!(a.unlock(2).await.unwrap().is_success());

        let updated = b
            .modify(2, |r| {
                r.name = "Robert".into();
                r.hours = 38.0;
            })
            .await
            .unwrap();
        assert_eq!(updated, Record::new(2, "Robert", 38.0));

        a.close().await.unwrap();
        b.close().await.unwrap();
        handle.shutdown();
        handle.join().await.unwrap();

        assert!(dispatcher.locks().is_empty());
        assert_eq!(dispatcher.store().load()[1], Record::new(2, "Robert", 38.0));
        assert!(!paths.client(1).exists());
    }

    #[tokio::test]
    async fn test_departed_client_locks_are_released() {
        let temp_dir = TempDir::new().unwrap();
        let paths = FifoPaths::in_dir(temp_dir.path());
        let dispatcher = Arc::new(Dispatcher::new(create_store(&temp_dir)));

        let source = FifoSource::create(&paths).unwrap();
        let sink = FifoSink::new(paths.clone()).with_open_timeout(Duration::from_millis(200));
        let _handle = Server::start(dispatcher.clone(), source, sink);

        let mut survivor = RecordClient::new(FifoClient::connect(2, &paths).unwrap());

        // Client 1 takes a lock, sends another request and exits before the
        // reply can be written.
        let mut doomed = FifoClient::connect(1, &paths).unwrap();
        doomed.send_request(&Request::lock_for_write(1, 1)).await.unwrap();
        assert!(doomed.recv_response().await.unwrap().is_success());
        doomed.send_request(&Request::read(1, 2)).await.unwrap();
        drop(doomed);

        let response = survivor.lock_for_write(1).await.unwrap();
        assert_eq!(response.status, Status::Success);
    }
}
