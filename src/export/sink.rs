//! Output sink
//!
//! Buffered byte destination owned by exactly one writer at a time. Lines
//! are written whole, so as long as a single task owns the sink no two
//! records can interleave.

use std::path::Path;

use tokio::fs::File;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tracing::debug;

use crate::error::{ConfigError, Result};

/// Type-erased async byte destination.
pub type BoxedWrite = Box<dyn AsyncWrite + Send + Unpin>;

/// Buffer size for file output.
const FILE_BUFFER_CAPACITY: usize = 8 * 1024 * 1024;

/// Buffer size for console and in-memory output.
const DEFAULT_BUFFER_CAPACITY: usize = 64 * 1024;

/// Buffered output destination for exported lines.
pub struct OutputSink<W = BoxedWrite>
where
    W: AsyncWrite + Unpin,
{
    writer: BufWriter<W>,
    label: String,
    records: u64,
    bytes: u64,
}

impl OutputSink<BoxedWrite> {
    /// Create (or truncate) a file sink
    ///
    /// # Arguments
    /// * `path` - Output file path; its parent directory must exist
    ///
    /// # Returns
    /// * `Result<Self>` - New sink or error
    pub async fn file(path: &Path) -> Result<Self> {
        validate_path(path)?;
        let file = File::create(path).await?;
        debug!("Created output file: {}", path.display());

        Ok(Self::with_capacity(
            Box::new(file),
            path.display().to_string(),
            FILE_BUFFER_CAPACITY,
        ))
    }

    /// Sink writing to standard output.
    pub fn stdout() -> Self {
        Self::new(Box::new(tokio::io::stdout()), "console")
    }
}

impl<W> OutputSink<W>
where
    W: AsyncWrite + Unpin,
{
    /// Wrap any async writer.
    pub fn new(inner: W, label: impl Into<String>) -> Self {
        Self::with_capacity(inner, label, DEFAULT_BUFFER_CAPACITY)
    }

    fn with_capacity(inner: W, label: impl Into<String>, capacity: usize) -> Self {
        Self {
            writer: BufWriter::with_capacity(capacity, inner),
            label: label.into(),
            records: 0,
            bytes: 0,
        }
    }

    /// Write the header line. Not counted as a record.
    pub async fn write_header(&mut self, header: &str) -> Result<()> {
        self.write_line(header.as_bytes()).await
    }

    /// Write one encoded record followed by a newline.
    pub async fn write_record(&mut self, line: &[u8]) -> Result<()> {
        self.write_line(line).await?;
        self.records += 1;
        Ok(())
    }

    async fn write_line(&mut self, line: &[u8]) -> Result<()> {
        self.writer.write_all(line).await?;
        self.writer.write_all(b"\n").await?;
        self.bytes += line.len() as u64 + 1;
        Ok(())
    }

    /// Number of records written so far.
    pub fn records_written(&self) -> u64 {
        self.records
    }

    /// Number of bytes handed to the buffer so far, header included.
    pub fn bytes_written(&self) -> u64 {
        self.bytes
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Flush and release the destination, returning the inner writer.
    pub async fn close(mut self) -> Result<W> {
        self.writer.flush().await?;
        debug!(
            "Closed sink {} ({} records, {} bytes)",
            self.label, self.records, self.bytes
        );
        Ok(self.writer.into_inner())
    }
}

/// Check that the parent directory of `path` exists.
pub(crate) fn validate_path(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
        && !parent.exists()
    {
        return Err(ConfigError::InvalidValue {
            field: "output".to_string(),
            value: format!("directory does not exist: {}", parent.display()),
        }
        .into());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::fs;

    #[tokio::test]
    async fn test_memory_sink_lines() {
        let mut sink = OutputSink::new(Vec::new(), "memory");
        sink.write_header("a,b").await.unwrap();
        sink.write_record(b"1,2").await.unwrap();
        sink.write_record(b"3,4").await.unwrap();

        assert_eq!(sink.records_written(), 2);
        assert_eq!(sink.bytes_written(), 12);

        let bytes = sink.close().await.unwrap();
        assert_eq!(String::from_utf8(bytes).unwrap(), "a,b\n1,2\n3,4\n");
    }

    #[tokio::test]
    async fn test_file_sink() {
        let path = std::env::temp_dir().join(format!("fastexport-sink-{}.csv", std::process::id()));
        let mut sink = OutputSink::file(&path).await.unwrap();
        sink.write_record(b"hello").await.unwrap();
        sink.close().await.unwrap();

        let content = fs::read_to_string(&path).await.unwrap();
        assert_eq!(content, "hello\n");

        // Cleanup
        fs::remove_file(&path).await.ok();
    }

    #[tokio::test]
    async fn test_file_sink_invalid_directory() {
        let result = OutputSink::file(Path::new("/nonexistent/directory/out.csv")).await;
        assert!(matches!(result, Err(crate::error::ExportError::Config(_))));
    }
}
