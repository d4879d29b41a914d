//! In-process transport over tokio channels.
//!
//! The hub owns the shared inbound queue and a registry of per-client reply
//! queues. Replies use `try_send`, so a client that stopped reading never
//! stalls the dispatcher.

use super::{ClientChannel, RequestSource, ResponseSink};
use crate::config::TransportConfig;
use crate::protocol::{Request, Response};
use crate::{Result, StoreError};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tracing::debug;

type Registry = Arc<Mutex<HashMap<i32, mpsc::Sender<Response>>>>;

fn not_connected(client_id: i32) -> StoreError {
    StoreError::Transport {
        message: format!("client {} is not connected", client_id),
        path: None,
        source: None,
    }
}

/// Connects in-process clients to one dispatcher.
#[derive(Debug, Clone)]
pub struct MemoryHub {
    inbound: mpsc::Sender<Request>,
    clients: Registry,
}

impl MemoryHub {
    /// Create a hub and the request source the dispatcher reads from.
    pub fn new() -> (Self, MemorySource) {
        let (tx, rx) = mpsc::channel(TransportConfig::MEMORY_CHANNEL_CAPACITY);
        let hub = Self {
            inbound: tx,
            clients: Arc::default(),
        };
        (hub, MemorySource { inbound: rx })
    }

    pub fn sink(&self) -> MemorySink {
        MemorySink {
            clients: self.clients.clone(),
        }
    }

    /// Register `client_id` and return its channel pair.
    ///
    /// Connecting again with the same id replaces the earlier registration.
    pub fn connect(&self, client_id: i32) -> MemoryClient {
        let (tx, rx) = mpsc::channel(TransportConfig::MEMORY_CHANNEL_CAPACITY);
        self.clients
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(client_id, tx.clone());
        debug!("Memory client {} connected", client_id);
        MemoryClient {
            client_id,
            inbound: self.inbound.clone(),
            registration: tx,
            replies: rx,
            clients: self.clients.clone(),
        }
    }
}

/// Dispatcher end of the shared inbound queue.
#[derive(Debug)]
pub struct MemorySource {
    inbound: mpsc::Receiver<Request>,
}

#[async_trait::async_trait]
impl RequestSource for MemorySource {
    async fn recv(&mut self) -> Result<Option<Request>> {
        Ok(self.inbound.recv().await)
    }
}

/// Dispatcher end of the reply queues.
#[derive(Debug, Clone)]
pub struct MemorySink {
    clients: Registry,
}

#[async_trait::async_trait]
impl ResponseSink for MemorySink {
    async fn send(&self, client_id: i32, response: &Response) -> Result<()> {
        let tx = self
            .clients
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&client_id)
            .cloned()
            .ok_or_else(|| not_connected(client_id))?;

        tx.try_send(response.clone()).map_err(|e| StoreError::Transport {
            message: format!("reply to client {} not delivered: {}", client_id, e),
            path: None,
            source: None,
        })
    }
}

/// One in-process client. Dropping it unregisters the reply queue.
#[derive(Debug)]
pub struct MemoryClient {
    client_id: i32,
    inbound: mpsc::Sender<Request>,
    registration: mpsc::Sender<Response>,
    replies: mpsc::Receiver<Response>,
    clients: Registry,
}

#[async_trait::async_trait]
impl ClientChannel for MemoryClient {
    fn client_id(&self) -> i32 {
        self.client_id
    }

    async fn send_request(&mut self, request: &Request) -> Result<()> {
        self.inbound
            .send(request.clone())
            .await
            .map_err(|_| StoreError::Transport {
                message: "server is not running".to_string(),
                path: None,
                source: None,
            })
    }

    async fn recv_response(&mut self) -> Result<Response> {
        self.replies
            .recv()
            .await
            .ok_or_else(|| not_connected(self.client_id))
    }
}

impl Drop for MemoryClient {
    fn drop(&mut self) {
        let mut clients = self.clients.lock().unwrap_or_else(PoisonError::into_inner);
        // A newer connection under the same id keeps its registration.
        if clients
            .get(&self.client_id)
            .is_some_and(|tx| tx.same_channel(&self.registration))
        {
            clients.remove(&self.client_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Status;

    #[tokio::test]
    async fn test_request_reaches_source_and_reply_reaches_client() {
        let (hub, mut source) = MemoryHub::new();
        let sink = hub.sink();
        let mut client = hub.connect(5);

        let request = Request::read(5, 1);
        client.send_request(&request).await.unwrap();
        let received = source.recv().await.unwrap().unwrap();
        assert_eq!(received, request);

        sink.send(5, &Response::to(&received, Status::Success))
            .await
            .unwrap();
        let response = client.recv_response().await.unwrap();
        assert_eq!(response.status, Status::Success);
    }

    #[tokio::test]
    async fn test_send_to_unknown_client_fails() {
        let (hub, _source) = MemoryHub::new();
        let result = hub
            .sink()
            .send(42, &Response::to(&Request::read(42, 1), Status::Success))
            .await;
        assert!(matches!(result, Err(StoreError::Transport { .. })));
    }

    #[tokio::test]
    async fn test_dropped_client_is_unregistered() {
        let (hub, _source) = MemoryHub::new();
        let sink = hub.sink();
        drop(hub.connect(3));

        let result = sink
            .send(3, &Response::to(&Request::read(3, 1), Status::Success))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_full_reply_queue_fails_instead_of_blocking() {
        let (hub, _source) = MemoryHub::new();
        let sink = hub.sink();
        let _client = hub.connect(1);
        let response = Response::to(&Request::read(1, 1), Status::Success);

        for _ in 0..TransportConfig::MEMORY_CHANNEL_CAPACITY {
            sink.send(1, &response).await.unwrap();
        }
        assert!(sink.send(1, &response).await.is_err());
    }
}
