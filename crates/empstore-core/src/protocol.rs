//! Request/response types and the fixed-width wire format.
//!
//! Every value is little-endian with no padding:
//!
//! ```text
//! Record   = [i32 id][10 bytes name, NUL-padded][f64 hours]                 22 bytes
//! Request  = [i32 client_id][i32 record_id][u8 op][Record][u64 timestamp]   39 bytes
//! Response = [i32 record_id][u8 status][Record][u64 timestamp]              35 bytes
//! ```
//!
//! Frames carry no delimiter or length prefix; the reader knows the width.

use crate::config::StoreConfig;
use crate::record::{EmployeeName, Record};
use crate::{Result, StoreError};
use bytes::{Buf, BufMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const RECORD_WIDTH: usize = 4 + StoreConfig::NAME_FIELD_WIDTH + 8;
pub const REQUEST_WIDTH: usize = 4 + 4 + 1 + RECORD_WIDTH + 8;
pub const RESPONSE_WIDTH: usize = 4 + 1 + RECORD_WIDTH + 8;

/// Operation requested by a client.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Read = b'R',
    Write = b'W',
    Unlock = b'U',
    Exit = b'X',
}

impl Operation {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Result<Self> {
        match code {
            b'R' => Ok(Operation::Read),
            b'W' => Ok(Operation::Write),
            b'U' => Ok(Operation::Unlock),
            b'X' => Ok(Operation::Exit),
            other => Err(StoreError::protocol(format!(
                "unknown operation code {:#04x}",
                other
            ))),
        }
    }
}

/// Outcome reported by the server.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Success = b'S',
    Error = b'E',
    Locked = b'L',
    NotFound = b'N',
}

impl Status {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Result<Self> {
        match code {
            b'S' => Ok(Status::Success),
            b'E' => Ok(Status::Error),
            b'L' => Ok(Status::Locked),
            b'N' => Ok(Status::NotFound),
            other => Err(StoreError::protocol(format!(
                "unknown status code {:#04x}",
                other
            ))),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Success => "SUCCESS",
            Status::Error => "ERROR",
            Status::Locked => "LOCKED",
            Status::NotFound => "NOT_FOUND",
        }
    }
}

/// Seconds since the Unix epoch, as stamped on requests.
pub fn now_timestamp() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}

/// A client request.
///
/// A `Write` whose payload has `id == 0` only takes the write lock and returns
/// the current record; any other payload is committed.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub client_id: i32,
    pub record_id: i32,
    pub operation: Operation,
    pub payload: Record,
    pub timestamp: u64,
}

impl Request {
    pub fn new(client_id: i32, record_id: i32, operation: Operation, payload: Record) -> Self {
        Self {
            client_id,
            record_id,
            operation,
            payload,
            timestamp: now_timestamp(),
        }
    }

    pub fn read(client_id: i32, record_id: i32) -> Self {
        Self::new(client_id, record_id, Operation::Read, Record::default())
    }

    /// Lock-only write: acquire the write lock without modifying anything.
    pub fn lock_for_write(client_id: i32, record_id: i32) -> Self {
        Self::new(client_id, record_id, Operation::Write, Record::default())
    }

    /// Commit `record` over the stored record with the same id.
    pub fn commit(client_id: i32, record: Record) -> Self {
        Self::new(client_id, record.id, Operation::Write, record)
    }

    pub fn unlock(client_id: i32, record_id: i32) -> Self {
        Self::new(client_id, record_id, Operation::Unlock, Record::default())
    }

    pub fn exit(client_id: i32) -> Self {
        Self::new(client_id, 0, Operation::Exit, Record::default())
    }

    pub fn is_lock_only(&self) -> bool {
        self.operation == Operation::Write && self.payload.is_empty()
    }

    pub fn encode(&self) -> [u8; REQUEST_WIDTH] {
        let mut frame = [0u8; REQUEST_WIDTH];
        let mut buf = &mut frame[..];
        buf.put_i32_le(self.client_id);
        buf.put_i32_le(self.record_id);
        buf.put_u8(self.operation.code());
        put_record(&mut buf, &self.payload);
        buf.put_u64_le(self.timestamp);
        frame
    }

    pub fn decode(frame: &[u8]) -> Result<Self> {
        check_width("request", frame, REQUEST_WIDTH)?;
        let mut buf = frame;
        let client_id = buf.get_i32_le();
        let record_id = buf.get_i32_le();
        let operation = Operation::from_code(buf.get_u8())?;
        let payload = get_record(&mut buf);
        let timestamp = buf.get_u64_le();
        Ok(Self {
            client_id,
            record_id,
            operation,
            payload,
            timestamp,
        })
    }
}

/// The server's answer to one request.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub record_id: i32,
    pub status: Status,
    pub payload: Record,
    pub timestamp: u64,
}

impl Response {
    /// A payload-less response echoing the request's id and timestamp.
    pub fn to(request: &Request, status: Status) -> Self {
        Self {
            record_id: request.record_id,
            status,
            payload: Record::default(),
            timestamp: request.timestamp,
        }
    }

    pub fn with_payload(mut self, payload: Record) -> Self {
        self.payload = payload;
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }

    /// Map non-success statuses to the matching [`StoreError`].
    pub fn into_result(self) -> Result<Record> {
        match self.status {
            Status::Success => Ok(self.payload),
            Status::Locked => Err(StoreError::Locked {
                record_id: self.record_id,
            }),
            Status::NotFound => Err(StoreError::NotFound {
                record_id: self.record_id,
            }),
            Status::Error => Err(StoreError::ServerError {
                record_id: self.record_id,
            }),
        }
    }

    pub fn encode(&self) -> [u8; RESPONSE_WIDTH] {
        let mut frame = [0u8; RESPONSE_WIDTH];
        let mut buf = &mut frame[..];
        buf.put_i32_le(self.record_id);
        buf.put_u8(self.status.code());
        put_record(&mut buf, &self.payload);
        buf.put_u64_le(self.timestamp);
        frame
    }

    pub fn decode(frame: &[u8]) -> Result<Self> {
        check_width("response", frame, RESPONSE_WIDTH)?;
        let mut buf = frame;
        let record_id = buf.get_i32_le();
        let status = Status::from_code(buf.get_u8())?;
        let payload = get_record(&mut buf);
        let timestamp = buf.get_u64_le();
        Ok(Self {
            record_id,
            status,
            payload,
            timestamp,
        })
    }
}

/// Encode a record into its 22-byte form.
pub fn encode_record(record: &Record) -> [u8; RECORD_WIDTH] {
    let mut frame = [0u8; RECORD_WIDTH];
    put_record(&mut &mut frame[..], record);
    frame
}

/// Decode one 22-byte record.
pub fn decode_record(frame: &[u8]) -> Result<Record> {
    check_width("record", frame, RECORD_WIDTH)?;
    Ok(get_record(&mut &frame[..]))
}

fn put_record<B: BufMut>(buf: &mut B, record: &Record) {
    buf.put_i32_le(record.id);
    buf.put_slice(&record.name.to_field());
    buf.put_f64_le(record.hours);
}

fn get_record<B: Buf>(buf: &mut B) -> Record {
    let id = buf.get_i32_le();
    let mut name = [0u8; StoreConfig::NAME_FIELD_WIDTH];
    buf.copy_to_slice(&mut name);
    let hours = buf.get_f64_le();
    Record {
        id,
        name: EmployeeName::from_field(&name),
        hours,
    }
}

fn check_width(what: &str, frame: &[u8], width: usize) -> Result<()> {
    if frame.len() != width {
        return Err(StoreError::protocol(format!(
            "{} frame is {} bytes, expected {}",
            what,
            frame.len(),
            width
        )));
    }
    Ok(())
}

/// Read one fixed-width frame.
///
/// Partial reads are retried until the frame is complete. Returns `None` on a
/// clean EOF before the first byte; EOF inside a frame is a protocol error.
pub async fn read_frame<const N: usize, R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<Option<[u8; N]>> {
    let mut frame = [0u8; N];
    let mut filled = 0;
    while filled < N {
        let n = reader.read(&mut frame[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(StoreError::protocol(format!(
                "short frame: channel closed after {} of {} bytes",
                filled, N
            )));
        }
        filled += n;
    }
    Ok(Some(frame))
}

/// Write one frame and flush it.
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, frame: &[u8]) -> Result<()> {
    writer.write_all(frame).await?;
    writer.flush().await?;
    Ok(())
}
