//! File sources for outgoing transfers.
//!
//! This module handles:
//! - Byte sources that outgoing chunks are sliced from
//! - Metadata (name, MIME type, size) of files selected for sending
//! - File name sanitization for received files
//!
//! Sources are read one chunk at a time, so a file is never held in memory
//! as a whole unless it was provided as bytes to begin with.

use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::error::{Error, Result};

/// A random-access source of bytes for an outgoing file.
pub trait ByteSource: Send + Sync {
    /// Total length of the source in bytes.
    fn len(&self) -> u64;

    /// Read the bytes in `range`.
    ///
    /// The range is always within `0..len()`.
    fn read_range(&self, range: Range<u64>) -> BoxFuture<'_, Result<Vec<u8>>>;
}

/// A source backed by bytes already in memory.
#[derive(Debug, Clone)]
pub struct MemorySource {
    data: Arc<[u8]>,
}

impl MemorySource {
    /// Wrap bytes as a source.
    pub fn new(data: impl Into<Arc<[u8]>>) -> Self {
        Self { data: data.into() }
    }
}

impl ByteSource for MemorySource {
    fn len(&self) -> u64 {
        self.data.len() as u64
    }

    fn read_range(&self, range: Range<u64>) -> BoxFuture<'_, Result<Vec<u8>>> {
        Box::pin(async move {
            let start = usize::try_from(range.start)
                .map_err(|_| Error::Internal("range start overflows usize".to_string()))?;
            let end = usize::try_from(range.end)
                .map_err(|_| Error::Internal("range end overflows usize".to_string()))?;
            self.data
                .get(start..end)
                .map(<[u8]>::to_vec)
                .ok_or_else(|| Error::Internal(format!("range {start}..{end} out of bounds")))
        })
    }
}

/// A source backed by a file on disk, read chunk by chunk.
#[derive(Debug, Clone)]
pub struct FsSource {
    path: PathBuf,
    len: u64,
}

impl FsSource {
    /// Open a file as a source.
    ///
    /// # Errors
    ///
    /// Returns an error if the path does not exist or is not a regular file.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let metadata = tokio::fs::metadata(&path)
            .await
            .map_err(|_| Error::FileNotFound(path.display().to_string()))?;
        if !metadata.is_file() {
            return Err(Error::InvalidPath(format!(
                "{} is not a regular file",
                path.display()
            )));
        }
        Ok(Self {
            path,
            len: metadata.len(),
        })
    }

    /// Path of the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ByteSource for FsSource {
    fn len(&self) -> u64 {
        self.len
    }

    fn read_range(&self, range: Range<u64>) -> BoxFuture<'_, Result<Vec<u8>>> {
        Box::pin(async move {
            use tokio::io::{AsyncReadExt, AsyncSeekExt};

            let len = usize::try_from(range.end - range.start)
                .map_err(|_| Error::Internal("chunk length overflows usize".to_string()))?;
            let mut file = tokio::fs::File::open(&self.path).await?;
            file.seek(std::io::SeekFrom::Start(range.start)).await?;

            let mut buffer = vec![0u8; len];
            file.read_exact(&mut buffer).await?;
            Ok(buffer)
        })
    }
}

/// A file selected for sending.
#[derive(Clone)]
pub struct OutgoingFile {
    /// File name announced to the receiver
    pub name: String,
    /// MIME type announced to the receiver
    pub mime_type: String,
    source: Arc<dyn ByteSource>,
}

impl std::fmt::Debug for OutgoingFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutgoingFile")
            .field("name", &self.name)
            .field("mime_type", &self.mime_type)
            .field("size", &self.size())
            .finish_non_exhaustive()
    }
}

impl OutgoingFile {
    /// Create an outgoing file from any byte source.
    pub fn new(
        name: impl Into<String>,
        mime_type: impl Into<String>,
        source: Arc<dyn ByteSource>,
    ) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            source,
        }
    }

    /// Create an outgoing file from bytes in memory.
    ///
    /// The MIME type is guessed from the name.
    pub fn from_bytes(name: impl Into<String>, data: impl Into<Arc<[u8]>>) -> Self {
        let name = name.into();
        let mime_type = guess_mime_type(Path::new(&name));
        Self::new(name, mime_type, Arc::new(MemorySource::new(data)))
    }

    /// Open a file on disk for sending.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or has no file name.
    pub async fn open(path: &Path) -> Result<Self> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| Error::InvalidPath(path.display().to_string()))?;
        let source = FsSource::open(path).await?;
        Ok(Self::new(name, guess_mime_type(path), Arc::new(source)))
    }

    /// Size of the file in bytes.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.source.len()
    }

    /// Read the bytes in `range`.
    ///
    /// # Errors
    ///
    /// Returns an error if the source cannot be read.
    pub async fn read_range(&self, range: Range<u64>) -> Result<Vec<u8>> {
        self.source.read_range(range).await
    }
}

fn guess_mime_type(path: &Path) -> String {
    mime_guess::from_path(path)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

/// Reduce an announced file name to a safe single path component.
///
/// Peers control the announced name, so anything that could escape the
/// output directory is stripped. Returns `None` if nothing usable remains.
#[must_use]
pub fn sanitize_file_name(name: &str) -> Option<String> {
    let last = name.rsplit(['/', '\\']).next()?;
    let cleaned: String = last.chars().filter(|c| !c.is_control()).collect();
    let cleaned = cleaned.trim();

    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        None
    } else {
        Some(cleaned.to_string())
    }
}

/// Format bytes as human-readable size.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0), "0 B");
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(1024), "1.0 KB");
        assert_eq!(format_size(1536), "1.5 KB");
        assert_eq!(format_size(1024 * 1024), "1.0 MB");
        assert_eq!(format_size(1024 * 1024 * 1024), "1.0 GB");
    }

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("photo.jpg"), Some("photo.jpg".to_string()));
        assert_eq!(
            sanitize_file_name("../../../etc/passwd"),
            Some("passwd".to_string())
        );
        assert_eq!(
            sanitize_file_name("C:\\Users\\me\\notes.txt"),
            Some("notes.txt".to_string())
        );
        assert_eq!(sanitize_file_name(".."), None);
        assert_eq!(sanitize_file_name("dir/"), None);
        assert_eq!(sanitize_file_name(""), None);
    }

    #[tokio::test]
    async fn test_memory_source_ranges() {
        let file = OutgoingFile::from_bytes("notes.txt", b"Hello, WebDrop!".to_vec());
        assert_eq!(file.size(), 15);
        assert_eq!(file.mime_type, "text/plain");
        assert_eq!(file.read_range(0..5).await.expect("read"), b"Hello");
        assert_eq!(file.read_range(7..15).await.expect("read"), b"WebDrop!");
        assert!(file.read_range(10..20).await.is_err());
    }

    #[tokio::test]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    async fn test_fs_source_reads_chunks() {
        let temp_dir = TempDir::new().expect("create temp dir");
        let path = temp_dir.path().join("large.bin");
        let content: Vec<u8> = (0..2560).map(|i| (i % 256) as u8).collect();
        std::fs::write(&path, &content).expect("write file");

        let file = OutgoingFile::open(&path).await.expect("open");
        assert_eq!(file.name, "large.bin");
        assert_eq!(file.size(), 2560);
        assert_eq!(file.mime_type, "application/octet-stream");

        let mut reassembled = Vec::new();
        for start in (0..2560u64).step_by(1024) {
            let end = (start + 1024).min(2560);
            reassembled.extend(file.read_range(start..end).await.expect("read"));
        }
        assert_eq!(reassembled, content);
    }

    #[tokio::test]
    async fn test_open_missing_file() {
        let temp_dir = TempDir::new().expect("create temp dir");
        let result = OutgoingFile::open(&temp_dir.path().join("missing.txt")).await;
        assert!(matches!(result, Err(Error::FileNotFound(_))));

        let result = OutgoingFile::open(temp_dir.path()).await;
        assert!(result.is_err(), "directories cannot be sent");
    }
}
