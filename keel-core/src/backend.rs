//! Storage backend trait

use async_trait::async_trait;
use std::sync::Arc;

use crate::{
    archive::ZipSession,
    error::StorageResult,
    operations::DeleteOptions,
    stream::{ByteStream, ReadHandle},
    LogicalPath,
};

/// Storage backend capabilities
#[derive(Debug, Clone, Default)]
pub struct StorageCapabilities {
    /// Directories exist independently of their contents
    pub native_directories: bool,
    /// `move_file` is a single atomic rename
    pub atomic_move: bool,
    /// `check_disk_usage` reports real capacity
    pub disk_usage: bool,
    pub prune_empty_dirs: bool,
}

impl StorageCapabilities {
    pub fn local_filesystem() -> Self {
        Self {
            native_directories: true,
            atomic_move: true,
            disk_usage: true,
            prune_empty_dirs: true,
        }
    }

    pub fn object_store() -> Self {
        Self {
            prune_empty_dirs: true,
            ..Default::default()
        }
    }
}

/// Space information, in bytes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiskUsage {
    pub available: u64,
    pub free: u64,
    pub total: u64,
}

/// The filesystem contract implemented by every backend.
///
/// Paths are logical; each backend maps them onto its own convention. Apart from
/// `check_file_exists`, every operation reports failure through [`StorageResult`].
#[async_trait]
pub trait StorageBackend: Send + Sync {
    fn id(&self) -> &str;
    fn display_name(&self) -> &str;
    fn capabilities(&self) -> &StorageCapabilities;

    async fn check_disk_usage(&self, path: &LogicalPath) -> StorageResult<DiskUsage>;

    /// True only when `path` is an existing regular file. Never fails.
    async fn check_file_exists(&self, path: &LogicalPath) -> bool;

    async fn create_read_stream(
        &self,
        path: &LogicalPath,
        content_type: Option<&str>,
    ) -> StorageResult<ReadHandle>;

    /// Start a store-only zip archive whose entries are read from this backend.
    ///
    /// Must be called from within a Tokio runtime.
    fn create_zip_stream(self: Arc<Self>) -> StorageResult<ZipSession>;

    /// Store a file, replacing any previous content. Returns the bytes written.
    async fn write_file(&self, path: &LogicalPath, stream: ByteStream) -> StorageResult<u64>;

    /// Create a directory and any missing ancestors. Idempotent.
    async fn mkdir(&self, path: &LogicalPath) -> StorageResult<()>;

    /// Move a file; fails with `AlreadyExists` rather than overwrite `target`.
    async fn move_file(&self, source: &LogicalPath, target: &LogicalPath) -> StorageResult<()>;

    /// Names of the immediate children of a directory, in no particular order.
    async fn readdir(&self, path: &LogicalPath) -> StorageResult<Vec<String>>;

    /// Remove directories below `root` left empty; `root` itself always survives.
    async fn remove_empty_dirs(&self, root: &LogicalPath) -> StorageResult<()>;

    async fn unlink(&self, path: &LogicalPath) -> StorageResult<()>;

    async fn unlink_dir(&self, path: &LogicalPath, options: &DeleteOptions) -> StorageResult<()>;
}
