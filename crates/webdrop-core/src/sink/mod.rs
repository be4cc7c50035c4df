//! Output sinks for received files.
//!
//! The transfer engine writes every reassembled chunk, in order, to an
//! [`OutputSink`] obtained from a [`SinkFactory`]. A sink is a scoped
//! resource: it is either closed after the last chunk or aborted, never
//! left open.
//!
//! Two implementations are provided:
//!
//! - [`FsSinkFactory`] writes to `<dir>/<name>.part` and renames the file
//!   into place on close; abort removes the partial file.
//! - [`MemorySinkFactory`] keeps every file in memory and records its final
//!   state, which is what tests and embedders without a filesystem use.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::file::sanitize_file_name;

/// Suffix for files that are still being received.
pub const PARTIAL_SUFFIX: &str = ".part";

/// A writable target for one received file.
pub trait OutputSink: Send {
    /// Append bytes to the output.
    fn write<'a>(&'a mut self, bytes: &'a [u8]) -> BoxFuture<'a, Result<()>>;

    /// Finish the output successfully.
    fn close(self: Box<Self>) -> BoxFuture<'static, Result<()>>;

    /// Discard the output, releasing any partial data.
    fn abort(self: Box<Self>) -> BoxFuture<'static, ()>;
}

/// Creates an output sink per accepted transfer.
pub trait SinkFactory: Send + Sync {
    /// Create a sink for a file called `name` of `total_size` bytes.
    fn create<'a>(&'a self, name: &'a str, total_size: u64)
        -> BoxFuture<'a, Result<Box<dyn OutputSink>>>;
}

/// Writes received files into a directory.
#[derive(Debug, Clone)]
pub struct FsSinkFactory {
    output_dir: PathBuf,
}

impl FsSinkFactory {
    /// Create a factory writing into `output_dir`.
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    /// Directory files are written to.
    #[must_use]
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Claim a final path that neither exists nor is being received into.
    ///
    /// The partial file is created with `create_new`, so two sinks for the
    /// same name never share one; the loser moves on to `name (n).ext`.
    async fn claim(&self, name: &str) -> Result<(PathBuf, PathBuf, tokio::fs::File)> {
        let path = Path::new(name);
        let stem = path
            .file_stem()
            .map_or_else(|| name.to_string(), |s| s.to_string_lossy().to_string());
        let extension = path
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();

        let mut counter = 0u32;
        loop {
            let final_path = if counter == 0 {
                self.output_dir.join(name)
            } else {
                self.output_dir.join(format!("{stem} ({counter}){extension}"))
            };
            counter += 1;

            if tokio::fs::try_exists(&final_path).await.unwrap_or(false) {
                continue;
            }

            let mut partial = final_path.clone().into_os_string();
            partial.push(PARTIAL_SUFFIX);
            let partial_path = PathBuf::from(partial);

            match tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&partial_path)
                .await
            {
                Ok(file) => return Ok((final_path, partial_path, file)),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
                Err(e) => return Err(e.into()),
            }
        }
    }
}

impl SinkFactory for FsSinkFactory {
    fn create<'a>(
        &'a self,
        name: &'a str,
        total_size: u64,
    ) -> BoxFuture<'a, Result<Box<dyn OutputSink>>> {
        Box::pin(async move {
            let safe_name = sanitize_file_name(name)
                .ok_or_else(|| Error::InvalidPath(format!("unusable file name '{name}'")))?;

            tokio::fs::create_dir_all(&self.output_dir).await?;

            let (final_path, partial_path, file) = self.claim(&safe_name).await?;
            tracing::debug!(
                "Writing {} ({} bytes) to {}",
                safe_name,
                total_size,
                partial_path.display()
            );

            Ok(Box::new(FsSink {
                final_path,
                partial_path,
                expected_size: total_size,
                bytes_written: 0,
                file: Some(file),
            }) as Box<dyn OutputSink>)
        })
    }
}

/// A file being received into the filesystem.
#[derive(Debug)]
pub struct FsSink {
    final_path: PathBuf,
    partial_path: PathBuf,
    expected_size: u64,
    bytes_written: u64,
    file: Option<tokio::fs::File>,
}

impl OutputSink for FsSink {
    fn write<'a>(&'a mut self, bytes: &'a [u8]) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let file = self.file.as_mut().ok_or_else(|| Error::Sink {
                file: self.final_path.display().to_string(),
                reason: "sink already finished".to_string(),
            })?;
            file.write_all(bytes).await?;
            self.bytes_written += bytes.len() as u64;
            Ok(())
        })
    }

    fn close(mut self: Box<Self>) -> BoxFuture<'static, Result<()>> {
        Box::pin(async move {
            if let Some(mut file) = self.file.take() {
                file.flush().await?;
                file.sync_all().await?;
            }

            if self.bytes_written != self.expected_size {
                tracing::warn!(
                    "{}: wrote {} bytes, expected {}",
                    self.final_path.display(),
                    self.bytes_written,
                    self.expected_size
                );
            }

            tokio::fs::rename(&self.partial_path, &self.final_path).await?;
            tracing::info!("Saved {}", self.final_path.display());
            Ok(())
        })
    }

    fn abort(mut self: Box<Self>) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            drop(self.file.take());
            if let Err(e) = tokio::fs::remove_file(&self.partial_path).await {
                tracing::warn!(
                    "Failed to remove partial file {}: {}",
                    self.partial_path.display(),
                    e
                );
            }
        })
    }
}

/// Final state of a file received into memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkState {
    /// Still receiving
    Open,
    /// Closed after the last chunk
    Closed,
    /// Aborted; data is discarded
    Aborted,
}

/// A file received into memory.
#[derive(Debug, Clone)]
pub struct MemoryFile {
    /// Announced file name
    pub name: String,
    /// Announced size
    pub total_size: u64,
    /// Bytes written so far
    pub data: Vec<u8>,
    /// Number of write calls, in order
    pub writes: usize,
    /// Current state
    pub state: SinkState,
}

/// Collects received files in memory.
#[derive(Debug, Clone, Default)]
pub struct MemorySinkFactory {
    files: Arc<Mutex<Vec<MemoryFile>>>,
}

impl MemorySinkFactory {
    /// Create an empty factory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every sink created so far, in creation order.
    pub async fn files(&self) -> Vec<MemoryFile> {
        self.files.lock().await.clone()
    }

    /// Snapshot of sinks grouped by name.
    pub async fn by_name(&self) -> HashMap<String, MemoryFile> {
        self.files
            .lock()
            .await
            .iter()
            .map(|f| (f.name.clone(), f.clone()))
            .collect()
    }
}

impl SinkFactory for MemorySinkFactory {
    fn create<'a>(
        &'a self,
        name: &'a str,
        total_size: u64,
    ) -> BoxFuture<'a, Result<Box<dyn OutputSink>>> {
        Box::pin(async move {
            let mut files = self.files.lock().await;
            let slot = files.len();
            files.push(MemoryFile {
                name: name.to_string(),
                total_size,
                data: Vec::new(),
                writes: 0,
                state: SinkState::Open,
            });

            Ok(Box::new(MemorySink {
                files: Arc::clone(&self.files),
                slot,
            }) as Box<dyn OutputSink>)
        })
    }
}

struct MemorySink {
    files: Arc<Mutex<Vec<MemoryFile>>>,
    slot: usize,
}

impl MemorySink {
    async fn finish(&self, state: SinkState) {
        if let Some(file) = self.files.lock().await.get_mut(self.slot) {
            file.state = state;
            if state == SinkState::Aborted {
                file.data.clear();
            }
        }
    }
}

impl OutputSink for MemorySink {
    fn write<'a>(&'a mut self, bytes: &'a [u8]) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let mut files = self.files.lock().await;
            let file = files
                .get_mut(self.slot)
                .ok_or_else(|| Error::Internal("memory sink slot missing".to_string()))?;
            file.data.extend_from_slice(bytes);
            file.writes += 1;
            Ok(())
        })
    }

    fn close(self: Box<Self>) -> BoxFuture<'static, Result<()>> {
        Box::pin(async move {
            self.finish(SinkState::Closed).await;
            Ok(())
        })
    }

    fn abort(self: Box<Self>) -> BoxFuture<'static, ()> {
        Box::pin(async move { self.finish(SinkState::Aborted).await })
    }
}
