//! Durable record file.
//!
//! The file is a bare sequence of fixed-width records; its length implies the
//! count. Updates rewrite the whole set:
//! 1. Write to a sibling temp file
//! 2. fsync it
//! 3. Read it back and check the length
//! 4. Atomically rename it over the real file
//!
//! A reader therefore sees either the old set or the new one, never a mix.

use crate::config::StoreConfig;
use crate::protocol::{decode_record, encode_record, RECORD_WIDTH};
use crate::record::Record;
use crate::{Result, StoreError};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Linear lookup by id.
pub fn find(records: &[Record], id: i32) -> Option<&Record> {
    records.iter().find(|record| record.id == id)
}

pub fn find_mut(records: &mut [Record], id: i32) -> Option<&mut Record> {
    records.iter_mut().find(|record| record.id == id)
}

/// Record file at a fixed path.
#[derive(Debug, Clone)]
pub struct RecordStore {
    path: PathBuf,
}

impl RecordStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn sibling(&self, suffix: &str) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(suffix);
        self.path.with_file_name(name)
    }

    /// Where `replace` stages the new contents.
    pub fn temp_path(&self) -> PathBuf {
        self.sibling(StoreConfig::TEMP_SUFFIX)
    }

    /// Read the full record set.
    ///
    /// A missing, unreadable, truncated or undecodable file is treated as an
    /// empty set and logged.
    pub fn load(&self) -> Vec<Record> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("Record file {} does not exist yet", self.path.display());
                return Vec::new();
            }
            Err(e) => {
                warn!("Failed to read {}: {}", self.path.display(), e);
                return Vec::new();
            }
        };

        if bytes.len() % RECORD_WIDTH != 0 {
            warn!(
                "Record file {} is {} bytes, not a multiple of {}; treating as empty",
                self.path.display(),
                bytes.len(),
                RECORD_WIDTH
            );
            return Vec::new();
        }

        match bytes
            .chunks_exact(RECORD_WIDTH)
            .map(decode_record)
            .collect::<Result<Vec<_>>>()
        {
            Ok(records) => records,
            Err(e) => {
                warn!("Corrupt record file {}: {}", self.path.display(), e);
                Vec::new()
            }
        }
    }

    /// Atomically replace the stored set with `records`.
    ///
    /// On error the durable file is unchanged and the temp file is removed.
    pub fn replace(&self, records: &[Record]) -> Result<()> {
        self.replace_with(records, |from, to| fs::rename(from, to))
    }

    /// `replace` with the final rename step supplied by the caller.
    pub(crate) fn replace_with<F>(&self, records: &[Record], commit: F) -> Result<()>
    where
        F: FnOnce(&Path, &Path) -> io::Result<()>,
    {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).map_err(|e| {
                    StoreError::persistence_at(
                        format!("Failed to create directory {}", parent.display()),
                        parent,
                        Some(e),
                    )
                })?;
            }
        }

        let temp_path = self.temp_path();
        let result = self.stage(records, &temp_path).and_then(|()| {
            commit(&temp_path, &self.path).map_err(|e| {
                StoreError::persistence_at(
                    format!(
                        "Failed to rename {} to {}",
                        temp_path.display(),
                        self.path.display()
                    ),
                    &self.path,
                    Some(e),
                )
            })
        });

        if result.is_err() {
            // Only clean up a regular file we may have left behind.
            if temp_path.is_file() {
                if let Err(e) = fs::remove_file(&temp_path) {
                    warn!("Failed to remove {}: {}", temp_path.display(), e);
                }
            }
            return result;
        }

        debug!(
            "Atomically wrote {} record(s) to {}",
            records.len(),
            self.path.display()
        );
        Ok(())
    }

    fn stage(&self, records: &[Record], temp_path: &Path) -> Result<()> {
        let payload: Vec<u8> = records.iter().flat_map(encode_record).collect();
        let io_err = |what: &str, e: io::Error| {
            StoreError::persistence_at(
                format!("Failed to {} temp file {}", what, temp_path.display()),
                temp_path,
                Some(e),
            )
        };

        {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(temp_path)
                .map_err(|e| io_err("create", e))?;
            file.write_all(&payload).map_err(|e| io_err("write", e))?;
            file.flush().map_err(|e| io_err("flush", e))?;
            file.sync_all().map_err(|e| io_err("sync", e))?;
        }

        let written = fs::read(temp_path).map_err(|e| io_err("re-read", e))?;
        let expected = records.len() * RECORD_WIDTH;
        if written.len() != expected || written != payload {
            return Err(StoreError::persistence_at(
                format!(
                    "Temp file {} holds {} bytes, expected {}",
                    temp_path.display(),
                    written.len(),
                    expected
                ),
                temp_path,
                None,
            ));
        }
        Ok(())
    }

    /// Claim this record file for the calling process.
    ///
    /// Takes an advisory exclusive lock on a `.lock` sidecar; a second server
    /// on the same file gets `StoreError::Config`.
    pub fn try_lock(&self) -> Result<StoreLock> {
        let lock_path = self.sibling(StoreConfig::LOCK_SUFFIX);
        if let Some(parent) = lock_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).map_err(|e| {
                    StoreError::persistence_at("Failed to create lock directory", parent, Some(e))
                })?;
            }
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| {
                StoreError::persistence_at("Failed to open lock file", &lock_path, Some(e))
            })?;

        FileExt::try_lock_exclusive(&file).map_err(|_| StoreError::Config {
            message: format!(
                "{} is already served by another process",
                self.path.display()
            ),
        })?;

        debug!("Locked {}", lock_path.display());
        Ok(StoreLock {
            file,
            path: lock_path,
        })
    }
}

/// Held for as long as a server owns the record file.
#[derive(Debug)]
pub struct StoreLock {
    file: File,
    path: PathBuf,
}

impl StoreLock {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!("Failed to unlock {}: {}", self.path.display(), e);
        }
    }
}
