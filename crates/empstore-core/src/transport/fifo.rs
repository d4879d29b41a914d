//! Named-pipe transport.
//!
//! The server reads requests from one well-known FIFO; each client reads
//! replies from its own FIFO at a path derived from its id. Writers open the
//! target FIFO per message and close it afterwards.
//!
//! Every endpoint keeps a writer open on its own FIFO so that its reader never
//! sees EOF in the gaps between real writers. Frames are smaller than
//! `PIPE_BUF`, so concurrent writers never interleave.

use super::{ClientChannel, RequestSource, ResponseSink};
use crate::config::{FifoPaths, TransportConfig};
use crate::protocol::{read_frame, write_frame, Request, Response, REQUEST_WIDTH, RESPONSE_WIDTH};
use crate::{Result, StoreError};
use nix::errno::Errno;
use nix::sys::stat::Mode;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::net::unix::pipe;
use tokio::time::Instant;
use tracing::{debug, warn};

/// A FIFO this process created and reads from. Removed on drop.
#[derive(Debug)]
pub struct FifoEndpoint {
    path: PathBuf,
    receiver: pipe::Receiver,
    _keepalive: pipe::Sender,
}

impl FifoEndpoint {
    /// Create the FIFO at `path` (replacing any stale one) and open it.
    ///
    /// Must be called from within a tokio runtime.
    pub fn create(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        match std::fs::remove_file(&path) {
            Ok(()) => debug!("Removed stale FIFO {}", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(StoreError::transport_at(e, &path)),
        }

        let mode = Mode::S_IRUSR
            | Mode::S_IWUSR
            | Mode::S_IRGRP
            | Mode::S_IWGRP
            | Mode::S_IROTH
            | Mode::S_IWOTH;
        nix::unistd::mkfifo(&path, mode)
            .map_err(|errno| StoreError::transport_at(errno.into(), &path))?;

        let receiver = pipe::OpenOptions::new()
            .open_receiver(&path)
            .map_err(|e| StoreError::transport_at(e, &path))?;
        let keepalive = pipe::OpenOptions::new()
            .open_sender(&path)
            .map_err(|e| StoreError::transport_at(e, &path))?;

        debug!("Created FIFO {}", path.display());
        Ok(Self {
            path,
            receiver,
            _keepalive: keepalive,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read<const N: usize>(&mut self) -> Result<Option<[u8; N]>> {
        read_frame::<N, _>(&mut self.receiver).await
    }
}

impl Drop for FifoEndpoint {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!("Failed to remove FIFO {}: {}", self.path.display(), e);
        }
    }
}

/// Open `path` for writing, waiting up to `timeout` for a reader.
///
/// A FIFO that exists without a reader is polled every
/// [`TransportConfig::OPEN_POLL_INTERVAL`]. A missing FIFO fails at once.
pub async fn open_writer(path: &Path, timeout: Duration) -> Result<pipe::Sender> {
    let deadline = Instant::now() + timeout;
    loop {
        match pipe::OpenOptions::new().open_sender(path) {
            Ok(sender) => return Ok(sender),
            Err(e) if e.raw_os_error() == Some(Errno::ENXIO as i32) => {
                if Instant::now() >= deadline {
                    return Err(StoreError::Transport {
                        message: format!("no reader after {:?}", timeout),
                        path: Some(path.to_path_buf()),
                        source: Some(e),
                    });
                }
                tokio::time::sleep(TransportConfig::OPEN_POLL_INTERVAL).await;
            }
            Err(e) => return Err(StoreError::transport_at(e, path)),
        }
    }
}

/// Open, write and close. The open and the write are each bounded by
/// `timeout`; a FIFO whose reader stopped draining it fails the send.
async fn send_frame(path: &Path, frame: &[u8], timeout: Duration) -> Result<()> {
    let mut sender = open_writer(path, timeout).await?;
    let written = tokio::time::timeout(timeout, write_frame(&mut sender, frame))
        .await
        .map_err(|_| StoreError::Transport {
            message: format!("write not accepted within {:?}", timeout),
            path: Some(path.to_path_buf()),
            source: None,
        })?;

    written.map_err(|e| match e {
        StoreError::Transport { message, source, .. } => StoreError::Transport {
            message,
            path: Some(path.to_path_buf()),
            source,
        },
        other => other,
    })
}

/// The server's inbound FIFO.
#[derive(Debug)]
pub struct FifoSource {
    endpoint: FifoEndpoint,
}

impl FifoSource {
    pub fn create(paths: &FifoPaths) -> Result<Self> {
        Ok(Self {
            endpoint: FifoEndpoint::create(&paths.server)?,
        })
    }

    pub fn path(&self) -> &Path {
        self.endpoint.path()
    }
}

#[async_trait::async_trait]
impl RequestSource for FifoSource {
    async fn recv(&mut self) -> Result<Option<Request>> {
        match self.endpoint.read::<REQUEST_WIDTH>().await? {
            Some(frame) => Request::decode(&frame).map(Some),
            None => Ok(None),
        }
    }
}

/// Writes replies to the per-client FIFOs.
#[derive(Debug, Clone)]
pub struct FifoSink {
    paths: FifoPaths,
    open_timeout: Duration,
}

impl FifoSink {
    pub fn new(paths: FifoPaths) -> Self {
        Self {
            paths,
            open_timeout: TransportConfig::OPEN_TIMEOUT,
        }
    }

    pub fn with_open_timeout(mut self, timeout: Duration) -> Self {
        self.open_timeout = timeout;
        self
    }
}

#[async_trait::async_trait]
impl ResponseSink for FifoSink {
    async fn send(&self, client_id: i32, response: &Response) -> Result<()> {
        let path = self.paths.client(client_id);
        send_frame(&path, &response.encode(), self.open_timeout).await
    }
}

/// A client process's view of the FIFO transport.
///
/// Creates the client's reply FIFO on connect and removes it on drop.
#[derive(Debug)]
pub struct FifoClient {
    client_id: i32,
    server: PathBuf,
    replies: FifoEndpoint,
    open_timeout: Duration,
}

impl FifoClient {
    pub fn connect(client_id: i32, paths: &FifoPaths) -> Result<Self> {
        Ok(Self {
            client_id,
            server: paths.server.clone(),
            replies: FifoEndpoint::create(paths.client(client_id))?,
            open_timeout: TransportConfig::OPEN_TIMEOUT,
        })
    }

    pub fn with_open_timeout(mut self, timeout: Duration) -> Self {
        self.open_timeout = timeout;
        self
    }

    pub fn reply_path(&self) -> &Path {
        self.replies.path()
    }
}

#[async_trait::async_trait]
impl ClientChannel for FifoClient {
    fn client_id(&self) -> i32 {
        self.client_id
    }

    async fn send_request(&mut self, request: &Request) -> Result<()> {
        send_frame(&self.server, &request.encode(), self.open_timeout).await
    }

    async fn recv_response(&mut self) -> Result<Response> {
        match self.replies.read::<RESPONSE_WIDTH>().await? {
            Some(frame) => Response::decode(&frame),
            None => Err(StoreError::Transport {
                message: "reply channel closed".to_string(),
                path: Some(self.replies.path().to_path_buf()),
                source: None,
            }),
        }
    }
}
