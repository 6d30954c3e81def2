#![allow(dead_code)]

use bytes::Bytes;
use keel_core::{stream, LogicalPath, StorageBackend};
use keel_providers::{LocalBackend, MemoryObjectStore, ObjectStoreBackend};
use std::sync::Arc;
use tempfile::TempDir;

/// A backend under test, plus whatever keeps its storage alive
pub struct Fixture {
    pub name: &'static str,
    pub backend: Arc<dyn StorageBackend>,
    pub store: Option<MemoryObjectStore>,
    _dir: Option<TempDir>,
}

pub fn local() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    Fixture {
        name: "local",
        backend: Arc::new(LocalBackend::new("local", dir.path())),
        store: None,
        _dir: Some(dir),
    }
}

pub fn object_store() -> Fixture {
    let store = MemoryObjectStore::new("test-bucket");
    Fixture {
        name: "object-store",
        backend: Arc::new(ObjectStoreBackend::new("memory", Arc::new(store.clone()))),
        store: Some(store),
        _dir: None,
    }
}

pub fn fixtures() -> Vec<Fixture> {
    vec![local(), object_store()]
}

pub fn p(path: &str) -> LogicalPath {
    LogicalPath::new(path).unwrap()
}

pub async fn write(backend: &Arc<dyn StorageBackend>, path: &str, data: &str) {
    backend
        .write_file(&p(path), stream::once(Bytes::from(data.to_string())))
        .await
        .unwrap();
}

pub async fn read(backend: &Arc<dyn StorageBackend>, path: &str) -> String {
    let handle = backend.create_read_stream(&p(path), None).await.unwrap();
    let bytes = handle.into_bytes().await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

pub async fn list(backend: &Arc<dyn StorageBackend>, path: &str) -> Vec<String> {
    let mut names = backend.readdir(&p(path)).await.unwrap();
    names.sort();
    names
}
