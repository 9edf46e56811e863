use std::path::PathBuf;
use bytes::Bytes;
use futures_util::stream;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;
use crate::utils::ProgressStream;
use crate::transport::TransferReporter;
use super::errors::Result;

const STREAM_CAPACITY: usize = 64 * 1024;

/// Where the bytes of a file come from.
#[derive(Debug, Clone)]
pub enum FileSource {
    Path(PathBuf),
    Memory(Bytes),
}

impl FileSource {
    pub async fn len(&self) -> Result<u64> {
        match self {
            Self::Path(path) => {
                let metadata = tokio::fs::metadata(path).await?;
                if !metadata.is_file() {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::InvalidInput,
                        format!("{} is not a file", path.display()),
                    )
                    .into());
                }
                Ok(metadata.len())
            }
            Self::Memory(bytes) => Ok(bytes.len() as u64),
        }
    }

    /// Read at most `len` bytes starting at `offset`.
    pub async fn read_chunk(&self, offset: u64, len: u64) -> Result<Bytes> {
        match self {
            Self::Path(path) => {
                let mut file = File::open(path).await?;
                file.seek(std::io::SeekFrom::Start(offset)).await?;

                let mut buffer = Vec::new();
                file.take(len).read_to_end(&mut buffer).await?;
                Ok(Bytes::from(buffer))
            }
            Self::Memory(bytes) => {
                let start = (offset as usize).min(bytes.len());
                let end = start.saturating_add(len as usize).min(bytes.len());
                Ok(bytes.slice(start..end))
            }
        }
    }

    /// Whole-file request body that reports progress while it is read.
    pub async fn body(&self, reporter: &TransferReporter) -> Result<reqwest::Body> {
        let body = match self {
            Self::Path(path) => {
                let file = File::open(path).await?;
                let stream = ReaderStream::with_capacity(file, STREAM_CAPACITY);
                reqwest::Body::wrap_stream(ProgressStream::new(stream, reporter.clone(), 0))
            }
            Self::Memory(bytes) => {
                let chunks: Vec<std::io::Result<Bytes>> = bytes
                    .chunks(STREAM_CAPACITY)
                    .map(|chunk| Ok(bytes.slice_ref(chunk)))
                    .collect();
                let stream = stream::iter(chunks);
                reqwest::Body::wrap_stream(ProgressStream::new(stream, reporter.clone(), 0))
            }
        };

        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_memory_chunks() {
        let source = FileSource::Memory(Bytes::from_static(b"0123456789"));

        assert_eq!(source.len().await.unwrap(), 10);
        assert_eq!(&source.read_chunk(0, 4).await.unwrap()[..], b"0123");
        assert_eq!(&source.read_chunk(8, 4).await.unwrap()[..], b"89");
        assert!(source.read_chunk(20, 4).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_path_chunks() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"hello world").unwrap();
        let source = FileSource::Path(file.path().to_path_buf());

        assert_eq!(source.len().await.unwrap(), 11);
        assert_eq!(&source.read_chunk(6, 100).await.unwrap()[..], b"world");
    }

    #[tokio::test]
    async fn test_directory_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let source = FileSource::Path(dir.path().to_path_buf());

        assert!(source.len().await.is_err());
    }
}
