//! Local filesystem backend

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt};
use keel_core::{
    backend::{DiskUsage, StorageBackend, StorageCapabilities},
    error::{StorageError, StorageResult},
    operations::DeleteOptions,
    stream::{self, ByteStream, ReadHandle},
    LogicalPath, ZipSession,
};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Suffix counter for in-progress writes
static PARTIAL_WRITES: AtomicU64 = AtomicU64::new(0);

/// Local filesystem backend
pub struct LocalBackend {
    id: String,
    root: PathBuf,
    capabilities: StorageCapabilities,
}

impl LocalBackend {
    pub fn new(id: impl Into<String>, root: impl AsRef<Path>) -> Self {
        Self {
            id: id.into(),
            root: root.as_ref().to_path_buf(),
            capabilities: StorageCapabilities::local_filesystem(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn to_real_path(&self, path: &LogicalPath) -> PathBuf {
        let mut real = self.root.clone();
        for seg in path.segments() {
            real.push(seg);
        }
        real
    }
}

/// Classify an IO error, adding the errno values `std` leaves as `Other`.
fn io_error(err: std::io::Error, path: impl fmt::Display) -> StorageError {
    match err.raw_os_error() {
        Some(libc::ENOTEMPTY) => StorageError::DirectoryNotEmpty(path.to_string()),
        Some(libc::EEXIST) => StorageError::AlreadyExists(path.to_string()),
        // Renaming a file over a directory
        Some(libc::EISDIR) => StorageError::AlreadyExists(path.to_string()),
        _ => StorageError::from_io(err, path),
    }
}

/// Depth-first removal of empty directories below `dir`.
///
/// Resolves to true when `dir` itself was removed. The root of the walk is kept.
fn prune_dir(dir: PathBuf, is_root: bool) -> BoxFuture<'static, StorageResult<bool>> {
    async move {
        let mut entries = fs::read_dir(&dir)
            .await
            .map_err(|e| io_error(e, dir.display()))?;
        let mut remaining = 0usize;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| io_error(e, dir.display()))?
        {
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| io_error(e, entry.path().display()))?;
            // Symlinks count as content and are never followed
            if file_type.is_dir() {
                if !prune_dir(entry.path(), false).await? {
                    remaining += 1;
                }
            } else {
                remaining += 1;
            }
        }

        if remaining > 0 || is_root {
            return Ok(false);
        }
        fs::remove_dir(&dir)
            .await
            .map_err(|e| io_error(e, dir.display()))?;
        debug!(dir = %dir.display(), "removed empty directory");
        Ok(true)
    }
    .boxed()
}

/// Stream `data` into `partial`, then rename it over `target`.
async fn write_partial(partial: &Path, target: &Path, data: &mut ByteStream) -> StorageResult<u64> {
    let mut file = fs::File::create(partial)
        .await
        .map_err(|e| io_error(e, partial.display()))?;
    let mut written = 0u64;
    while let Some(chunk) = data.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.sync_all().await?;
    fs::rename(partial, target)
        .await
        .map_err(|e| io_error(e, target.display()))?;
    Ok(written)
}

#[cfg(unix)]
async fn statvfs(path: PathBuf) -> StorageResult<DiskUsage> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|_| StorageError::InvalidPath(path.display().to_string()))?;

    let usage = tokio::task::spawn_blocking(move || {
        let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
        // SAFETY: c_path is NUL-terminated and stat is a valid out pointer.
        let rc = unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) };
        if rc != 0 {
            return Err(std::io::Error::last_os_error());
        }
        let frsize = stat.f_frsize as u64;
        Ok(DiskUsage {
            available: stat.f_bavail as u64 * frsize,
            free: stat.f_bfree as u64 * frsize,
            total: stat.f_blocks as u64 * frsize,
        })
    })
    .await
    .map_err(|e| StorageError::Io(std::io::Error::other(e)))?;

    usage.map_err(|e| io_error(e, path.display()))
}

#[cfg(not(unix))]
async fn statvfs(_path: PathBuf) -> StorageResult<DiskUsage> {
    Err(StorageError::Unsupported("disk usage on this platform".into()))
}

#[async_trait]
impl StorageBackend for LocalBackend {
    fn id(&self) -> &str {
        &self.id
    }

    fn display_name(&self) -> &str {
        "Local Filesystem"
    }

    fn capabilities(&self) -> &StorageCapabilities {
        &self.capabilities
    }

    async fn check_disk_usage(&self, path: &LogicalPath) -> StorageResult<DiskUsage> {
        statvfs(self.to_real_path(path)).await
    }

    async fn check_file_exists(&self, path: &LogicalPath) -> bool {
        fs::metadata(self.to_real_path(path))
            .await
            .map(|meta| meta.is_file())
            .unwrap_or(false)
    }

    async fn create_read_stream(
        &self,
        path: &LogicalPath,
        content_type: Option<&str>,
    ) -> StorageResult<ReadHandle> {
        let real = self.to_real_path(path);
        let file = fs::File::open(&real).await.map_err(|e| io_error(e, path))?;
        let meta = file.metadata().await.map_err(|e| io_error(e, path))?;
        if !meta.is_file() {
            return Err(StorageError::InvalidState(format!("{path} is not a file")));
        }

        Ok(ReadHandle::new(
            stream::from_reader(file),
            meta.len(),
            content_type.map(String::from),
        ))
    }

    fn create_zip_stream(self: Arc<Self>) -> StorageResult<ZipSession> {
        ZipSession::start(self)
    }

    async fn write_file(&self, path: &LogicalPath, mut data: ByteStream) -> StorageResult<u64> {
        let real = self.to_real_path(path);
        if let Some(parent) = real.parent() {
            fs::create_dir_all(parent).await.map_err(|e| io_error(e, path))?;
        }

        // Readers never observe a half-written target. The name stays short so
        // targets close to NAME_MAX still fit.
        let partial = real.with_file_name(format!(
            ".keel-partial-{}-{}",
            std::process::id(),
            PARTIAL_WRITES.fetch_add(1, Ordering::Relaxed)
        ));

        let written = write_partial(&partial, &real, &mut data).await;
        let written = match written {
            Ok(written) => written,
            Err(e) => {
                let _ = fs::remove_file(&partial).await;
                return Err(e);
            }
        };
        debug!(path = %path, bytes = written, "wrote file");
        Ok(written)
    }

    async fn mkdir(&self, path: &LogicalPath) -> StorageResult<()> {
        let real = self.to_real_path(path);
        fs::create_dir_all(&real).await.map_err(|e| io_error(e, path))?;
        debug!(path = %path, "created directory");
        Ok(())
    }

    async fn move_file(&self, source: &LogicalPath, target: &LogicalPath) -> StorageResult<()> {
        let src_real = self.to_real_path(source);
        let dst_real = self.to_real_path(target);

        fs::symlink_metadata(&src_real)
            .await
            .map_err(|e| io_error(e, source))?;
        if fs::symlink_metadata(&dst_real).await.is_ok() {
            return Err(StorageError::AlreadyExists(format!(
                "cannot move {source} to {target}: {target} already exists"
            )));
        }
        if let Some(parent) = dst_real.parent() {
            fs::create_dir_all(parent).await.map_err(|e| io_error(e, target))?;
        }

        match fs::rename(&src_real, &dst_real).await {
            Ok(()) => {}
            Err(e) if e.raw_os_error() == Some(libc::EXDEV) => {
                // Different filesystems: no atomic rename available
                fs::copy(&src_real, &dst_real)
                    .await
                    .map_err(|e| io_error(e, target))?;
                fs::remove_file(&src_real)
                    .await
                    .map_err(|e| io_error(e, source))?;
            }
            Err(e) => return Err(io_error(e, source)),
        }

        debug!(source = %source, target = %target, "moved file");
        Ok(())
    }

    async fn readdir(&self, path: &LogicalPath) -> StorageResult<Vec<String>> {
        let real = self.to_real_path(path);
        let mut read_dir = fs::read_dir(&real).await.map_err(|e| io_error(e, path))?;

        let mut names = Vec::new();
        while let Some(entry) = read_dir.next_entry().await.map_err(|e| io_error(e, path))? {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        Ok(names)
    }

    async fn remove_empty_dirs(&self, root: &LogicalPath) -> StorageResult<()> {
        let real = self.to_real_path(root);
        let meta = fs::symlink_metadata(&real)
            .await
            .map_err(|e| io_error(e, root))?;
        if !meta.is_dir() {
            return Err(StorageError::InvalidState(format!("{root} is not a directory")));
        }
        prune_dir(real, true).await?;
        Ok(())
    }

    async fn unlink(&self, path: &LogicalPath) -> StorageResult<()> {
        let real = self.to_real_path(path);
        fs::remove_file(&real).await.map_err(|e| io_error(e, path))?;
        debug!(path = %path, "removed file");
        Ok(())
    }

    async fn unlink_dir(&self, path: &LogicalPath, options: &DeleteOptions) -> StorageResult<()> {
        let real = self.to_real_path(path);

        let meta = match fs::symlink_metadata(&real).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && options.force => return Ok(()),
            Err(e) => return Err(io_error(e, path)),
        };
        if !meta.is_dir() {
            return Err(StorageError::InvalidState(format!("{path} is not a directory")));
        }

        if options.recursive {
            fs::remove_dir_all(&real).await.map_err(|e| io_error(e, path))?;
        } else {
            let mut entries = fs::read_dir(&real).await.map_err(|e| io_error(e, path))?;
            if entries.next_entry().await.map_err(|e| io_error(e, path))?.is_some() {
                return Err(StorageError::DirectoryNotEmpty(path.to_string()));
            }
            fs::remove_dir(&real).await.map_err(|e| io_error(e, path))?;
        }

        debug!(path = %path, recursive = options.recursive, "removed directory");
        Ok(())
    }
}
