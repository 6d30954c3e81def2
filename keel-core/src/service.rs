//! Storage service: startup directory creation and best-effort file deletion

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::{backend::StorageBackend, error::StorageResult, LogicalPath};

/// Outcome of a best-effort batch delete
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteSummary {
    pub deleted: usize,
    /// Paths that could not be removed, in input order
    pub failed: Vec<String>,
}

pub struct StorageService {
    backend: Arc<dyn StorageBackend>,
    library_base: LogicalPath,
}

impl StorageService {
    pub fn new(backend: Arc<dyn StorageBackend>, library_base: LogicalPath) -> Self {
        Self { backend, library_base }
    }

    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    /// Create the library base directory.
    pub async fn init(&self) -> StorageResult<()> {
        self.backend.mkdir(&self.library_base).await?;
        info!(
            backend = self.backend.id(),
            base = %self.library_base,
            "storage initialized"
        );
        Ok(())
    }

    /// Unlink every file, logging failures instead of aborting the batch.
    ///
    /// Empty entries are skipped.
    pub async fn delete_files<I, S>(&self, files: I) -> DeleteSummary
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut summary = DeleteSummary::default();

        for file in files {
            let file = file.as_ref();
            if file.is_empty() {
                continue;
            }

            let result = match LogicalPath::new(file) {
                Ok(path) => self.backend.unlink(&path).await,
                Err(e) => Err(e),
            };

            match result {
                Ok(()) => {
                    debug!(file, "removed file");
                    summary.deleted += 1;
                }
                Err(e) => {
                    warn!(file, error = %e, "unable to remove file from storage");
                    summary.failed.push(file.to_string());
                }
            }
        }

        summary
    }
}
