//! Destination writers
//!
//! The engine only ever sees [`DestinationWriter`]; whether bytes land on a
//! block device, a regular file or a test buffer is up to the implementation.

use async_trait::async_trait;
use refurb_errors::SyncError;
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;

/// Sink for one destination of a fan-out copy
#[async_trait]
pub trait DestinationWriter: Send {
    /// Human-readable target, e.g. a device path
    fn target(&self) -> String;

    /// Write one chunk completely; returning means the bytes are acknowledged
    async fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), SyncError>;

    /// Flush and sync after the last chunk
    async fn finish(&mut self) -> Result<(), SyncError>;
}

/// Writes to a regular file or a block device
pub struct FileWriter {
    path: PathBuf,
    file: File,
}

impl FileWriter {
    /// Open `path` for writing. Regular files are created and truncated;
    /// block devices are written in place.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::DestinationOpen` if the path cannot be opened.
    pub async fn open(path: &Path) -> Result<Self, SyncError> {
        let is_device = tokio::fs::metadata(path)
            .await
            .map(|m| m.file_type().is_block_device())
            .unwrap_or(false);
        let mut options = OpenOptions::new();
        options.write(true);
        if !is_device {
            options.create(true).truncate(true);
        }
        let file = options
            .open(path)
            .await
            .map_err(|e| SyncError::DestinationOpen {
                destination: path.display().to_string(),
                message: e.to_string(),
            })?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    fn write_error(&self, err: &std::io::Error) -> SyncError {
        SyncError::DestinationWrite {
            destination: self.path.display().to_string(),
            message: err.to_string(),
        }
    }
}

#[async_trait]
impl DestinationWriter for FileWriter {
    fn target(&self) -> String {
        self.path.display().to_string()
    }

    async fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), SyncError> {
        self.file
            .write_all(chunk)
            .await
            .map_err(|e| self.write_error(&e))
    }

    async fn finish(&mut self) -> Result<(), SyncError> {
        self.file.flush().await.map_err(|e| self.write_error(&e))?;
        self.file.sync_all().await.map_err(|e| self.write_error(&e))
    }
}

/// Shared view of what a [`MemoryWriter`] received
pub type MemoryBuffer = Arc<Mutex<Vec<u8>>>;

/// In-memory writer, optionally failing once a byte budget is exceeded
pub struct MemoryWriter {
    name: String,
    buffer: MemoryBuffer,
    fail_after: Option<u64>,
}

impl MemoryWriter {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            buffer: Arc::new(Mutex::new(Vec::new())),
            fail_after: None,
        }
    }

    /// Fail the first write that would take the total past `bytes`
    #[must_use]
    pub fn failing_after(mut self, bytes: u64) -> Self {
        self.fail_after = Some(bytes);
        self
    }

    #[must_use]
    pub fn buffer(&self) -> MemoryBuffer {
        Arc::clone(&self.buffer)
    }
}

#[async_trait]
impl DestinationWriter for MemoryWriter {
    fn target(&self) -> String {
        format!("memory:{}", self.name)
    }

    async fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), SyncError> {
        let mut buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(limit) = self.fail_after {
            if buffer.len() as u64 + chunk.len() as u64 > limit {
                return Err(SyncError::DestinationWrite {
                    destination: self.target(),
                    message: "injected write failure".to_string(),
                });
            }
        }
        buffer.extend_from_slice(chunk);
        Ok(())
    }

    async fn finish(&mut self) -> Result<(), SyncError> {
        Ok(())
    }
}
