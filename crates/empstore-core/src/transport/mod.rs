//! Byte-channel transport between clients and the dispatcher.
//!
//! # Architecture
//!
//! - **Inbound**: one channel shared by every client, read only by the server
//!   ([`RequestSource`])
//! - **Outbound**: one private channel per client id ([`ResponseSink`] on the
//!   server side, [`ClientChannel`] on the client side)
//!
//! Two implementations are provided: named pipes on unix ([`fifo`]) and tokio
//! channels for in-process use ([`memory`]).

#[cfg(unix)]
pub mod fifo;
pub mod memory;

use crate::protocol::{Request, Response};
use crate::Result;

#[cfg(unix)]
pub use fifo::{FifoClient, FifoEndpoint, FifoSink, FifoSource};
pub use memory::{MemoryClient, MemoryHub, MemorySink, MemorySource};

/// Server side of the shared inbound channel.
#[async_trait::async_trait]
pub trait RequestSource: Send {
    /// Wait for the next request.
    ///
    /// Returns `None` once no client can ever write again. A malformed frame
    /// is reported as `StoreError::Protocol` and does not close the channel.
    async fn recv(&mut self) -> Result<Option<Request>>;
}

/// Server side of the per-client reply channels.
#[async_trait::async_trait]
pub trait ResponseSink: Send + Sync {
    /// Deliver one response to `client_id`.
    ///
    /// Must fail within a bounded time when the client is not reachable.
    async fn send(&self, client_id: i32, response: &Response) -> Result<()>;
}

/// Client side of both channels.
#[async_trait::async_trait]
pub trait ClientChannel: Send {
    fn client_id(&self) -> i32;

    async fn send_request(&mut self, request: &Request) -> Result<()>;

    /// Wait for the next response on this client's private channel.
    async fn recv_response(&mut self) -> Result<Response>;
}
