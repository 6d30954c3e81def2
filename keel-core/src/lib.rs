//! Keel Core
//!
//! One hierarchical-filesystem contract (directories, files, recursive delete,
//! move-without-clobber, streaming reads, zip export) shared by every storage backend.

pub mod archive;
pub mod backend;
pub mod error;
pub mod operations;
pub mod path;
pub mod service;
pub mod stream;

pub use archive::{ZipSession, ZipState};
pub use backend::{DiskUsage, StorageBackend, StorageCapabilities};
pub use error::{StorageError, StorageResult};
pub use operations::DeleteOptions;
pub use path::{normalize_dir, relative_name, LogicalPath};
pub use service::{DeleteSummary, StorageService};
pub use stream::{ByteStream, ReadHandle};
