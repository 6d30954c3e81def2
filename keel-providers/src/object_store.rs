//! Object-store backend
//!
//! Maps logical paths onto a flat key space. A file is the key `a/b.txt`; a
//! directory is the prefix `a/` and exists once it holds a zero-length marker key
//! `a/` or any key below it. Directory state is always re-derived from a fresh
//! listing.

use async_trait::async_trait;
use bytes::BytesMut;
use futures::{StreamExt, TryStreamExt};
use keel_core::{
    backend::{DiskUsage, StorageBackend, StorageCapabilities},
    error::{StorageError, StorageResult},
    operations::DeleteOptions,
    path::{relative_name, SEPARATOR},
    stream::{ByteStream, ReadHandle},
    LogicalPath, ZipSession,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::client::{ListedItem, ObjectStore};

/// Reported for every disk usage query; buckets have no meaningful capacity.
pub const OBJECT_STORE_CAPACITY: u64 = 1 << 40;

/// Keys per multi-object delete request
pub const DELETE_BATCH_SIZE: usize = 1000;

/// Storage backend over any [`ObjectStore`]
pub struct ObjectStoreBackend {
    id: String,
    client: Arc<dyn ObjectStore>,
    capabilities: StorageCapabilities,
}

impl ObjectStoreBackend {
    pub fn new(id: impl Into<String>, client: Arc<dyn ObjectStore>) -> Self {
        Self {
            id: id.into(),
            client,
            capabilities: StorageCapabilities::object_store(),
        }
    }

    pub fn client(&self) -> &Arc<dyn ObjectStore> {
        &self.client
    }

    async fn list_keys(&self, prefix: &str) -> StorageResult<Vec<String>> {
        self.client
            .list_objects(prefix, true)
            .map_ok(ListedItem::into_key)
            .try_collect()
            .await
    }

    /// True when any key lives below `path` as a directory.
    async fn is_dir(&self, path: &LogicalPath) -> StorageResult<bool> {
        let mut listing = self.client.list_objects(&path.as_dir(), true);
        Ok(listing.try_next().await?.is_some())
    }

    /// A file may not take the name of an existing directory.
    async fn ensure_not_dir(&self, path: &LogicalPath) -> StorageResult<()> {
        if self.is_dir(path).await? {
            return Err(StorageError::AlreadyExists(format!("{path} is a directory")));
        }
        Ok(())
    }

    /// Delete `keys` in batches. Keys that fail in any batch are reported together;
    /// a transport failure stops at the batch it happened in.
    async fn remove_keys(&self, keys: &[String]) -> StorageResult<()> {
        let mut failed = Vec::new();
        for batch in keys.chunks(DELETE_BATCH_SIZE) {
            match self.client.remove_objects(batch).await {
                Ok(()) => {}
                Err(StorageError::PartialFailure { failed: keys }) => failed.extend(keys),
                Err(e) => return Err(e),
            }
        }

        if failed.is_empty() {
            Ok(())
        } else {
            warn!(
                bucket = self.client.bucket(),
                count = failed.len(),
                "some keys could not be deleted"
            );
            Err(StorageError::PartialFailure { failed })
        }
    }
}

/// Markers under `root` (exclusive) that have nothing but other empty markers below them.
///
/// Works deepest first, so a parent whose only content was empty markers becomes
/// empty itself once those are dropped.
fn empty_markers(root: &str, keys: Vec<String>) -> Vec<String> {
    let mut remaining: BTreeSet<String> = keys.into_iter().collect();

    let mut markers: Vec<String> = remaining
        .iter()
        .filter(|key| key.ends_with(SEPARATOR) && key.as_str() != root)
        .cloned()
        .collect();
    markers.sort_by_key(|marker| std::cmp::Reverse(marker.matches(SEPARATOR).count()));

    let mut doomed = Vec::new();
    for marker in markers {
        let has_content = remaining
            .range::<String, _>((
                std::ops::Bound::Excluded(&marker),
                std::ops::Bound::Unbounded,
            ))
            .next()
            .is_some_and(|next| next.starts_with(&marker));
        if !has_content {
            remaining.remove(&marker);
            doomed.push(marker);
        }
    }
    doomed
}

#[async_trait]
impl StorageBackend for ObjectStoreBackend {
    fn id(&self) -> &str {
        &self.id
    }

    fn display_name(&self) -> &str {
        "Object Store"
    }

    fn capabilities(&self) -> &StorageCapabilities {
        &self.capabilities
    }

    async fn check_disk_usage(&self, _path: &LogicalPath) -> StorageResult<DiskUsage> {
        Ok(DiskUsage {
            available: OBJECT_STORE_CAPACITY,
            free: OBJECT_STORE_CAPACITY,
            total: OBJECT_STORE_CAPACITY,
        })
    }

    async fn check_file_exists(&self, path: &LogicalPath) -> bool {
        match self.client.stat_object(path.as_str()).await {
            Ok(_) => true,
            Err(StorageError::NotFound(_)) => false,
            Err(e) => {
                debug!(path = %path, error = %e, "stat failed, treating as missing");
                false
            }
        }
    }

    async fn create_read_stream(
        &self,
        path: &LogicalPath,
        content_type: Option<&str>,
    ) -> StorageResult<ReadHandle> {
        let stat = self.client.stat_object(path.as_str()).await?;
        let body = self.client.get_object(path.as_str()).await?;

        if let Some(reported) = body.content_length {
            if reported != stat.size {
                return Err(StorageError::InvalidState(format!(
                    "{path} changed while opening: HEAD reported {} bytes, GET {} bytes",
                    stat.size, reported
                )));
            }
        }

        let content_type = content_type.map(String::from).or(stat.content_type);
        Ok(ReadHandle::new(body.stream, stat.size, content_type))
    }

    fn create_zip_stream(self: Arc<Self>) -> StorageResult<ZipSession> {
        ZipSession::start(self)
    }

    async fn write_file(&self, path: &LogicalPath, mut data: ByteStream) -> StorageResult<u64> {
        self.ensure_not_dir(path).await?;
        let mut body = BytesMut::new();
        while let Some(chunk) = data.next().await {
            body.extend_from_slice(&chunk?);
        }
        let written = body.len() as u64;

        self.client.put_object(path.as_str(), body.freeze()).await?;
        debug!(path = %path, bytes = written, "wrote object");
        Ok(written)
    }

    async fn mkdir(&self, path: &LogicalPath) -> StorageResult<()> {
        match self.client.stat_object(path.as_str()).await {
            Ok(_) => return Err(StorageError::AlreadyExists(path.to_string())),
            Err(StorageError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }
        let marker = path.as_dir();
        self.client.put_object(&marker, Default::default()).await?;
        debug!(marker = %marker, "created directory marker");
        Ok(())
    }

    /// Server-side copy followed by a delete of the source.
    ///
    /// Not atomic. If the process dies between the two steps both keys exist; calling
    /// `move_file` again then fails with `AlreadyExists`, and the caller finishes the
    /// move by comparing the two objects and unlinking the source.
    async fn move_file(&self, source: &LogicalPath, target: &LogicalPath) -> StorageResult<()> {
        match self.client.stat_object(target.as_str()).await {
            Ok(_) => {
                return Err(StorageError::AlreadyExists(format!(
                    "cannot move {source} to {target}: {target} already exists"
                )))
            }
            Err(StorageError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }
        self.ensure_not_dir(target).await?;
        self.client.stat_object(source.as_str()).await?;

        self.client
            .copy_object(source.as_str(), target.as_str())
            .await?;
        self.remove_keys(&[source.as_str().to_string()]).await?;

        debug!(source = %source, target = %target, "moved object");
        Ok(())
    }

    async fn readdir(&self, path: &LogicalPath) -> StorageResult<Vec<String>> {
        let prefix = path.as_dir();
        let mut listing = self.client.list_objects(&prefix, false);

        let mut seen_any = false;
        let mut names = Vec::new();
        while let Some(item) = listing.try_next().await? {
            seen_any = true;
            if item.key() == prefix {
                continue;
            }
            let name = relative_name(&prefix, item.key())?;
            names.push(name.trim_end_matches(SEPARATOR).to_string());
        }

        if !seen_any {
            return Err(StorageError::NotFound(prefix));
        }
        Ok(names)
    }

    async fn remove_empty_dirs(&self, root: &LogicalPath) -> StorageResult<()> {
        let prefix = root.as_dir();
        let keys = self.list_keys(&prefix).await?;
        if keys.is_empty() {
            return Err(StorageError::NotFound(prefix));
        }

        let doomed = empty_markers(&prefix, keys);
        if doomed.is_empty() {
            return Ok(());
        }
        self.remove_keys(&doomed).await?;
        debug!(root = %root, removed = doomed.len(), "pruned empty directory markers");
        Ok(())
    }

    async fn unlink(&self, path: &LogicalPath) -> StorageResult<()> {
        self.remove_keys(&[path.as_str().to_string()]).await?;
        debug!(path = %path, "removed object");
        Ok(())
    }

    async fn unlink_dir(&self, path: &LogicalPath, options: &DeleteOptions) -> StorageResult<()> {
        let prefix = path.as_dir();
        let keys = self.list_keys(&prefix).await?;

        if keys.is_empty() {
            if options.force {
                return Ok(());
            }
            return Err(StorageError::NotFound(prefix));
        }
        if !options.recursive && keys.iter().any(|key| *key != prefix) {
            return Err(StorageError::DirectoryNotEmpty(prefix));
        }

        self.remove_keys(&keys).await?;
        debug!(prefix = %prefix, keys = keys.len(), "removed directory");
        Ok(())
    }
}
