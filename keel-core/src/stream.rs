//! Byte streams and read handles

use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt, TryStreamExt};
use std::fmt;
use std::pin::Pin;
use tokio::io::AsyncRead;
use tokio_util::io::ReaderStream;

use crate::error::{StorageError, StorageResult};

/// Byte stream type
pub type ByteStream = Pin<Box<dyn Stream<Item = StorageResult<Bytes>> + Send>>;

/// An open byte stream with its length at open time.
///
/// Dropping the handle releases the underlying file descriptor or connection,
/// whether or not the stream was consumed.
pub struct ReadHandle {
    pub stream: ByteStream,
    pub length: u64,
    pub content_type: Option<String>,
}

impl ReadHandle {
    pub fn new(stream: ByteStream, length: u64, content_type: Option<String>) -> Self {
        Self { stream, length, content_type }
    }

    /// Drain the stream into memory.
    pub async fn into_bytes(self) -> StorageResult<Bytes> {
        collect(self.stream).await
    }
}

impl fmt::Debug for ReadHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadHandle")
            .field("length", &self.length)
            .field("content_type", &self.content_type)
            .finish_non_exhaustive()
    }
}

/// Stream an async reader in chunks; read errors surface as stream items.
pub fn from_reader<R>(reader: R) -> ByteStream
where
    R: AsyncRead + Send + 'static,
{
    Box::pin(ReaderStream::new(reader).map_err(StorageError::Io))
}

/// Single-chunk stream over bytes already in memory
pub fn once(bytes: impl Into<Bytes>) -> ByteStream {
    let bytes = bytes.into();
    Box::pin(futures::stream::once(async move { Ok(bytes) }))
}

/// Concatenate every chunk of a stream.
pub async fn collect(mut stream: ByteStream) -> StorageResult<Bytes> {
    let mut buffer = BytesMut::new();
    while let Some(chunk) = stream.next().await {
        buffer.extend_from_slice(&chunk?);
    }
    Ok(buffer.freeze())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_collect_concatenates_chunks() {
        let chunks = vec![Ok(Bytes::from("ab")), Ok(Bytes::from("cd"))];
        let stream: ByteStream = Box::pin(futures::stream::iter(chunks));
        assert_eq!(collect(stream).await.unwrap(), Bytes::from("abcd"));
    }

    #[tokio::test]
    async fn test_collect_propagates_errors() {
        let chunks = vec![
            Ok(Bytes::from("ab")),
            Err(StorageError::BackendUnavailable("reset".into())),
        ];
        let stream: ByteStream = Box::pin(futures::stream::iter(chunks));
        assert!(matches!(
            collect(stream).await,
            Err(StorageError::BackendUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_from_reader() {
        let stream = from_reader(&b"hello"[..]);
        let handle = ReadHandle::new(stream, 5, None);
        assert_eq!(handle.into_bytes().await.unwrap(), Bytes::from("hello"));
    }
}
