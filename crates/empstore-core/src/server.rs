//! The server's request loop.
//!
//! One tokio task pulls requests off the shared inbound channel, hands each to
//! the [`Dispatcher`] and writes the response to the requesting client's
//! channel before touching the next request.
//!
//! A reply that cannot be delivered is logged and the client's locks are
//! released; the loop keeps serving everyone else.

use crate::dispatcher::Dispatcher;
use crate::protocol::{Response, Status};
use crate::transport::{RequestSource, ResponseSink};
use crate::{Result, StoreError};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Handle to a running dispatcher loop. Dropping it stops the loop.
pub struct ServerHandle {
    shutdown_tx: watch::Sender<bool>,
    task_handle: Option<JoinHandle<Result<()>>>,
}

impl ServerHandle {
    /// Ask the loop to stop after the request it is currently serving.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Wait for the loop to finish and return how it ended.
    pub async fn join(mut self) -> Result<()> {
        match self.task_handle.take() {
            Some(handle) => handle.await.unwrap_or_else(|e| {
                Err(StoreError::Task {
                    message: format!("dispatcher loop: {}", e),
                })
            }),
            None => Ok(()),
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.shutdown();
        if let Some(handle) = self.task_handle.take() {
            handle.abort();
        }
    }
}

/// Runs a [`Dispatcher`] over a transport.
pub struct Server;

impl Server {
    /// Spawn the request loop on the current tokio runtime.
    pub fn start<S, K>(dispatcher: Arc<Dispatcher>, source: S, sink: K) -> ServerHandle
    where
        S: RequestSource + 'static,
        K: ResponseSink + 'static,
    {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task_handle = tokio::spawn(async move {
            let mut source = source;
            Self::run(dispatcher, &mut source, &sink, shutdown_rx).await
        });

        ServerHandle {
            shutdown_tx,
            task_handle: Some(task_handle),
        }
    }

    /// Serve requests until shutdown or until the inbound channel closes.
    ///
    /// Each request is handled on the blocking pool, since a commit rewrites
    /// and fsyncs the record file. The loop still waits for it before reading
    /// the next request.
    pub async fn run<S, K>(
        dispatcher: Arc<Dispatcher>,
        source: &mut S,
        sink: &K,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> Result<()>
    where
        S: RequestSource + ?Sized,
        K: ResponseSink + ?Sized,
    {
        info!("Server started, waiting for requests");

        loop {
            let request = tokio::select! {
                result = source.recv() => match result {
                    Ok(Some(request)) => request,
                    Ok(None) => {
                        info!("Inbound channel closed");
                        return Ok(());
                    }
                    Err(StoreError::Protocol { message }) => {
                        warn!("Dropping malformed request: {}", message);
                        continue;
                    }
                    Err(e) => {
                        error!("Inbound channel failed: {}", e);
                        return Err(e);
                    }
                },
                _ = shutdown_rx.changed() => {
                    info!("Server shutting down");
                    return Ok(());
                }
            };

            debug!(
                "Received {:?} from client {} for record {}",
                request.operation, request.client_id, request.record_id
            );
            let response = {
                let worker = Arc::clone(&dispatcher);
                let job = request.clone();
                tokio::task::spawn_blocking(move || worker.handle(&job)).await
            };
            let response = match response {
                Ok(response) => response,
                Err(e) => {
                    error!(
                        "Handling {:?} from client {} failed: {}",
                        request.operation, request.client_id, e
                    );
                    Response::to(&request, Status::Error)
                }
            };

            match sink.send(request.client_id, &response).await {
                Ok(()) => debug!(
                    "Replied {} to client {}",
                    response.status.as_str(),
                    request.client_id
                ),
                Err(e) => {
                    error!("Failed to reply to client {}: {}", request.client_id, e);
                    dispatcher.disconnect(request.client_id);
                }
            }
        }
    }
}
