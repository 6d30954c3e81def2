//! Storage providers for Keel
//!
//! Two backends implement the filesystem contract: a local directory tree and a
//! flat object store (S3-compatible service or in-memory map) with directory
//! semantics layered on key prefixes.

pub mod client;
pub mod config;
mod local;
mod memory;
mod object_store;

#[cfg(feature = "s3")]
pub mod s3;

pub use client::{ListedItem, ListingStream, ObjectBody, ObjectStat, ObjectStore};
pub use config::{open_backend, S3Config, StorageConfig};
pub use local::LocalBackend;
pub use memory::MemoryObjectStore;
pub use object_store::{ObjectStoreBackend, DELETE_BATCH_SIZE, OBJECT_STORE_CAPACITY};

#[cfg(feature = "s3")]
pub use s3::S3Client;
