//! In-process object store
//!
//! Same listing and delete semantics as an S3 bucket, kept in a sorted map. Used
//! as a scratch backend and to exercise the object-store backend without a server.
//! Faults can be injected to simulate an unreachable store, keys that fail, or a
//! GET that disagrees with the preceding HEAD.

use async_trait::async_trait;
use bytes::Bytes;
use keel_core::{stream, StorageError, StorageResult};
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use crate::client::{ListedItem, ListingStream, ObjectBody, ObjectStat, ObjectStore};

#[derive(Debug, Default)]
struct Faults {
    unavailable: bool,
    failing_keys: HashSet<String>,
    reported_lengths: HashMap<String, u64>,
}

#[derive(Debug, Default)]
struct Inner {
    objects: BTreeMap<String, Bytes>,
    faults: Faults,
}

/// Object store held in memory; clones share the same bucket.
#[derive(Debug, Clone)]
pub struct MemoryObjectStore {
    bucket: String,
    inner: Arc<RwLock<Inner>>,
}

impl MemoryObjectStore {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            inner: Arc::new(RwLock::new(Inner::default())),
        }
    }

    /// Every key currently stored, sorted
    pub fn keys(&self) -> Vec<String> {
        self.inner.read().objects.keys().cloned().collect()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.read().objects.contains_key(key)
    }

    /// Make every call fail with `BackendUnavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.inner.write().faults.unavailable = unavailable;
    }

    /// Make reads, copies and deletes of `key` fail.
    pub fn fail_key(&self, key: impl Into<String>) {
        self.inner.write().faults.failing_keys.insert(key.into());
    }

    /// Announce `length` on GETs of `key` regardless of the stored size.
    pub fn report_length(&self, key: impl Into<String>, length: u64) {
        self.inner.write().faults.reported_lengths.insert(key.into(), length);
    }

    fn check_available(inner: &Inner) -> StorageResult<()> {
        if inner.faults.unavailable {
            return Err(StorageError::BackendUnavailable("memory store is offline".into()));
        }
        Ok(())
    }

    fn check_key(inner: &Inner, key: &str) -> StorageResult<()> {
        Self::check_available(inner)?;
        if inner.faults.failing_keys.contains(key) {
            return Err(StorageError::ProviderApi {
                provider: "memory".into(),
                message: format!("injected failure for {key}"),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn put_object(&self, key: &str, body: Bytes) -> StorageResult<()> {
        let mut inner = self.inner.write();
        Self::check_available(&inner)?;
        inner.objects.insert(key.to_string(), body);
        Ok(())
    }

    async fn stat_object(&self, key: &str) -> StorageResult<ObjectStat> {
        let inner = self.inner.read();
        Self::check_available(&inner)?;
        let body = inner
            .objects
            .get(key)
            .ok_or_else(|| StorageError::NotFound(key.to_string()))?;
        Ok(ObjectStat {
            size: body.len() as u64,
            content_type: None,
        })
    }

    async fn get_object(&self, key: &str) -> StorageResult<ObjectBody> {
        let inner = self.inner.read();
        Self::check_key(&inner, key)?;
        let body = inner
            .objects
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(key.to_string()))?;
        let content_length = inner
            .faults
            .reported_lengths
            .get(key)
            .copied()
            .unwrap_or(body.len() as u64);
        Ok(ObjectBody {
            stream: stream::once(body),
            content_length: Some(content_length),
        })
    }

    async fn copy_object(&self, source: &str, target: &str) -> StorageResult<()> {
        let mut inner = self.inner.write();
        Self::check_key(&inner, source)?;
        let body = inner
            .objects
            .get(source)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(source.to_string()))?;
        inner.objects.insert(target.to_string(), body);
        Ok(())
    }

    async fn remove_objects(&self, keys: &[String]) -> StorageResult<()> {
        let mut inner = self.inner.write();
        Self::check_available(&inner)?;
        let mut failed = Vec::new();
        for key in keys {
            if inner.faults.failing_keys.contains(key) {
                failed.push(key.clone());
            } else {
                inner.objects.remove(key);
            }
        }
        if failed.is_empty() {
            Ok(())
        } else {
            Err(StorageError::PartialFailure { failed })
        }
    }

    fn list_objects(&self, prefix: &str, recursive: bool) -> ListingStream {
        let inner = self.inner.read();
        if let Err(e) = Self::check_available(&inner) {
            return Box::pin(futures::stream::iter(vec![Err(e)]));
        }

        let mut items = Vec::new();
        let mut prefixes = BTreeSet::new();
        let matching = inner
            .objects
            .range(prefix.to_string()..)
            .map(|(key, _)| key)
            .take_while(|key| key.starts_with(prefix));
        for key in matching {
            let rest = &key[prefix.len()..];
            match rest.find('/') {
                Some(idx) if !recursive => {
                    prefixes.insert(format!("{}{}", prefix, &rest[..=idx]));
                }
                _ => items.push(Ok(ListedItem::Object(key.clone()))),
            }
        }
        items.extend(prefixes.into_iter().map(|p| Ok(ListedItem::Prefix(p))));

        Box::pin(futures::stream::iter(items))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;

    async fn list(store: &MemoryObjectStore, prefix: &str, recursive: bool) -> Vec<ListedItem> {
        store.list_objects(prefix, recursive).try_collect().await.unwrap()
    }

    #[tokio::test]
    async fn test_non_recursive_listing_rolls_up_prefixes() {
        let store = MemoryObjectStore::new("test");
        for key in ["d/", "d/a.txt", "d/sub/", "d/sub/deep.txt", "d/other/x.txt", "e/z"] {
            store.put_object(key, Bytes::from_static(b"x")).await.unwrap();
        }

        let mut keys: Vec<String> = list(&store, "d/", false)
            .await
            .into_iter()
            .map(ListedItem::into_key)
            .collect();
        keys.sort();
        assert_eq!(keys, vec!["d/", "d/a.txt", "d/other/", "d/sub/"]);
    }

    #[tokio::test]
    async fn test_recursive_listing_returns_every_key() {
        let store = MemoryObjectStore::new("test");
        for key in ["d/", "d/a.txt", "d/sub/deep.txt", "dd/x"] {
            store.put_object(key, Bytes::from_static(b"x")).await.unwrap();
        }

        let items = list(&store, "d/", true).await;
        assert_eq!(items.len(), 3);
        assert!(items.iter().all(|i| matches!(i, ListedItem::Object(_))));
    }

    #[tokio::test]
    async fn test_remove_objects_reports_failures() {
        let store = MemoryObjectStore::new("test");
        store.put_object("a", Bytes::new()).await.unwrap();
        store.put_object("b", Bytes::new()).await.unwrap();
        store.fail_key("b");

        let err = store
            .remove_objects(&["a".to_string(), "b".to_string(), "missing".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::PartialFailure { ref failed } if failed == &vec!["b".to_string()]));
        assert!(!store.contains("a"));
        assert!(store.contains("b"));
    }

    #[tokio::test]
    async fn test_unavailable_store() {
        let store = MemoryObjectStore::new("test");
        store.set_unavailable(true);
        assert!(matches!(
            store.put_object("a", Bytes::new()).await,
            Err(StorageError::BackendUnavailable(_))
        ));
        let result: StorageResult<Vec<ListedItem>> = store.list_objects("", true).try_collect().await;
        assert!(result.is_err());
    }
}
