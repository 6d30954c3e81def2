//! Flat key-value object store client interface
//!
//! The object-store backend only needs a handful of primitives. Anything that
//! speaks them (an S3-compatible service, an in-memory map) can sit underneath it.

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use keel_core::{ByteStream, StorageResult};
use std::pin::Pin;

/// Metadata returned by a HEAD request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectStat {
    pub size: u64,
    pub content_type: Option<String>,
}

/// Body of a GET
pub struct ObjectBody {
    pub stream: ByteStream,
    /// Length announced by the store for this response, if any
    pub content_length: Option<u64>,
}

/// One item of a listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListedItem {
    Object(String),
    /// Rolled-up sub-prefix, only produced by non-recursive listings
    Prefix(String),
}

impl ListedItem {
    pub fn key(&self) -> &str {
        match self {
            ListedItem::Object(key) => key,
            ListedItem::Prefix(prefix) => prefix,
        }
    }

    pub fn into_key(self) -> String {
        match self {
            ListedItem::Object(key) => key,
            ListedItem::Prefix(prefix) => prefix,
        }
    }
}

/// Lazily paged listing; dropping it stops further requests.
pub type ListingStream = Pin<Box<dyn Stream<Item = StorageResult<ListedItem>> + Send>>;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    fn bucket(&self) -> &str;

    async fn put_object(&self, key: &str, body: Bytes) -> StorageResult<()>;

    /// Fails with `NotFound` when the key does not exist.
    async fn stat_object(&self, key: &str) -> StorageResult<ObjectStat>;

    async fn get_object(&self, key: &str) -> StorageResult<ObjectBody>;

    /// Server-side copy within the bucket
    async fn copy_object(&self, source: &str, target: &str) -> StorageResult<()>;

    /// Delete many keys. Missing keys are not an error; keys that fail are
    /// reported together as `PartialFailure`.
    async fn remove_objects(&self, keys: &[String]) -> StorageResult<()>;

    /// List keys under `prefix`. Non-recursive listings roll deeper keys up into
    /// [`ListedItem::Prefix`] entries at the first `/` after the prefix.
    fn list_objects(&self, prefix: &str, recursive: bool) -> ListingStream;
}
