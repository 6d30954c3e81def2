//! On-the-fly zip export
//!
//! A [`ZipSession`] owns a writer task that appends entries to a store-only zip
//! archive in registration order, streaming each source straight from its backend
//! into a bounded pipe. The other end of the pipe is the session's output stream.
//!
//! The pipe is bounded, so the output stream has to be drained concurrently with
//! [`ZipSession::finalize`]; otherwise the writer stalls once the pipe is full.

use async_zip::base::write::ZipFileWriter;
use async_zip::{Compression, ZipEntryBuilder};
use futures::{AsyncWriteExt, StreamExt};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tokio::io::DuplexStream;
use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::{
    backend::StorageBackend,
    error::{StorageError, StorageResult},
    stream::{self, ByteStream},
    LogicalPath,
};

/// Size of the in-memory pipe between the archive writer and the consumer
const PIPE_CAPACITY: usize = 64 * 1024;

/// Lifecycle of a [`ZipSession`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZipState {
    /// Accepting `add_file`
    Open,
    /// Draining queued entries and writing the trailer
    Finalizing,
    /// Output stream ended
    Closed,
}

enum ZipCommand {
    Add { source: LogicalPath, name: String },
    Finish,
}

/// An in-progress zip archive.
pub struct ZipSession {
    state: Mutex<ZipState>,
    queue: Mutex<Option<mpsc::UnboundedSender<ZipCommand>>>,
    writer: AsyncMutex<Option<JoinHandle<StorageResult<()>>>>,
    output: Mutex<Option<ByteStream>>,
    /// Failure reported by the first `finalize`
    failure: Mutex<Option<String>>,
}

impl ZipSession {
    /// Start a session reading its entries from `backend`.
    pub fn start(backend: Arc<dyn StorageBackend>) -> StorageResult<Self> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            StorageError::InvalidState("zip sessions need a running Tokio runtime".into())
        })?;

        let (queue, commands) = mpsc::unbounded_channel();
        let (sink, source) = tokio::io::duplex(PIPE_CAPACITY);
        let (outcome_tx, outcome_rx) = oneshot::channel::<Result<(), String>>();

        let writer = runtime.spawn(async move {
            let result = write_archive(backend, commands, sink).await;
            if let Err(e) = &result {
                warn!("zip export aborted: {}", e);
            }
            let _ = outcome_tx.send(result.as_ref().map(|_| ()).map_err(|e| e.to_string()));
            result
        });

        // The pipe reaching EOF is not enough: the writer may have stopped half way.
        // Only a reported success lets the output end cleanly.
        let trailer = futures::stream::once(async move {
            match outcome_rx.await {
                Ok(Ok(())) => None,
                Ok(Err(message)) => Some(Err(StorageError::Archive(message))),
                Err(_) => Some(Err(StorageError::Archive(
                    "zip session dropped before finalize".into(),
                ))),
            }
        })
        .filter_map(futures::future::ready);
        let output: ByteStream = Box::pin(stream::from_reader(source).chain(trailer));

        Ok(Self {
            state: Mutex::new(ZipState::Open),
            queue: Mutex::new(Some(queue)),
            writer: AsyncMutex::new(Some(writer)),
            output: Mutex::new(Some(output)),
            failure: Mutex::new(None),
        })
    }

    pub fn state(&self) -> ZipState {
        *self.state.lock()
    }

    /// Take the archive output. Can be taken once.
    pub fn stream(&self) -> StorageResult<ByteStream> {
        self.output
            .lock()
            .take()
            .ok_or_else(|| StorageError::InvalidState("zip output already taken".into()))
    }

    /// Queue `source` to be stored in the archive as `name`.
    pub fn add_file(&self, source: LogicalPath, name: impl Into<String>) -> StorageResult<()> {
        let state = self.state.lock();
        if *state != ZipState::Open {
            return Err(StorageError::InvalidState(format!(
                "cannot add {source} to a zip session that is {:?}",
                *state
            )));
        }
        let queue = self.queue.lock();
        let Some(queue) = queue.as_ref() else {
            return Err(StorageError::InvalidState("zip session is not open".into()));
        };
        queue
            .send(ZipCommand::Add { source, name: name.into() })
            .map_err(|_| StorageError::Archive("zip writer stopped after an earlier failure".into()))
    }

    /// Wait for every queued entry to be written, then write the archive trailer.
    ///
    /// Attempts are serialized. Once the session is closed further calls repeat the
    /// first outcome, with a failure reported as `Archive`.
    pub async fn finalize(&self) -> StorageResult<()> {
        let mut writer = self.writer.lock().await;
        let Some(handle) = writer.take() else {
            return match self.failure.lock().clone() {
                Some(message) => Err(StorageError::Archive(message)),
                None => Ok(()),
            };
        };

        {
            let mut state = self.state.lock();
            *state = ZipState::Finalizing;
            if let Some(queue) = self.queue.lock().take() {
                let _ = queue.send(ZipCommand::Finish);
            }
        }

        let result = match handle.await {
            Ok(result) => result,
            Err(e) => Err(StorageError::Archive(format!("zip writer task failed: {e}"))),
        };
        if let Err(e) = &result {
            *self.failure.lock() = Some(e.to_string());
        }
        *self.state.lock() = ZipState::Closed;
        result
    }
}

impl Drop for ZipSession {
    fn drop(&mut self) {
        if let Some(handle) = self.writer.get_mut().take() {
            handle.abort();
        }
    }
}

impl fmt::Debug for ZipSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ZipSession")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

async fn write_archive(
    backend: Arc<dyn StorageBackend>,
    mut commands: mpsc::UnboundedReceiver<ZipCommand>,
    sink: DuplexStream,
) -> StorageResult<()> {
    let mut zip = ZipFileWriter::with_tokio(sink);
    let mut entries = 0usize;

    loop {
        match commands.recv().await {
            Some(ZipCommand::Add { source, name }) => {
                let mut handle = backend.create_read_stream(&source, None).await?;
                let builder = ZipEntryBuilder::new(name.clone().into(), Compression::Stored);
                let mut entry = zip.write_entry_stream(builder).await.map_err(archive_error)?;
                while let Some(chunk) = handle.stream.next().await {
                    entry.write_all(&chunk?).await?;
                }
                entry.close().await.map_err(archive_error)?;
                entries += 1;
                debug!(source = %source, entry = %name, "zip entry written");
            }
            Some(ZipCommand::Finish) => break,
            None => {
                return Err(StorageError::Archive(
                    "zip session dropped before finalize".into(),
                ))
            }
        }
    }

    zip.close().await.map_err(archive_error)?;
    debug!(entries, backend = backend.id(), "zip archive finalized");
    Ok(())
}

fn archive_error(e: async_zip::error::ZipError) -> StorageError {
    StorageError::Archive(e.to_string())
}
