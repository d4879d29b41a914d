//! Empstore Core - lock-coordinated employee record store.
//!
//! A single server process owns a binary file of fixed-size employee records
//! and serves client requests that arrive over byte-pipe IPC. Every request is
//! handled to completion before the next one, and per-record read/write locks
//! keep concurrent clients from stepping on each other.
//!
//! # Example
//!
//! ```rust,ignore
//! use empstore_core::transport::MemoryHub;
//! use empstore_core::{Dispatcher, RecordClient, RecordStore, Server};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> empstore_core::Result<()> {
//!     let dispatcher = Arc::new(Dispatcher::new(RecordStore::new("staff.dat")));
//!     let (hub, source) = MemoryHub::new();
//!     let _server = Server::start(dispatcher, source, hub.sink());
//!
//!     let mut client = RecordClient::new(hub.connect(1));
//!     let bob = client.modify(2, |r| r.hours = 38.0).await?;
//!     println!("{}", bob);
//!     client.close().await
//! }
//! ```

pub mod client;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod locks;
pub mod protocol;
pub mod record;
pub mod server;
pub mod store;
pub mod transport;

// Re-export commonly used types
pub use client::RecordClient;
pub use config::{FifoPaths, StoreConfig, TransportConfig};
pub use dispatcher::Dispatcher;
pub use error::{Result, StoreError};
pub use locks::{LockState, LockTable};
pub use protocol::{Operation, Request, Response, Status};
pub use record::{EmployeeName, Record};
pub use server::{Server, ServerHandle};
pub use store::{RecordStore, StoreLock};
