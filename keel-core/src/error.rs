//! Error types for Keel

use std::fmt;
use std::io::ErrorKind;
use thiserror::Error;

/// Result type alias
pub type StorageResult<T> = Result<T, StorageError>;

/// Main error type
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Path not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Directory not empty: {0}")]
    DirectoryNotEmpty(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Partial failure: {} key(s) could not be processed: {}", failed.len(), failed.join(", "))]
    PartialFailure { failed: Vec<String> },

    #[error("Provider API error ({provider}): {message}")]
    ProviderApi { provider: String, message: String },

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    /// Classify an IO error raised while operating on `path`.
    pub fn from_io(err: std::io::Error, path: impl fmt::Display) -> Self {
        match err.kind() {
            ErrorKind::NotFound => StorageError::NotFound(path.to_string()),
            ErrorKind::AlreadyExists => StorageError::AlreadyExists(path.to_string()),
            _ => StorageError::Io(err),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StorageError::BackendUnavailable(_) | StorageError::PartialFailure { .. }
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_retryable() {
        assert!(StorageError::BackendUnavailable("connection reset".into()).is_retryable());
        assert!(StorageError::PartialFailure { failed: vec!["a".into()] }.is_retryable());

        assert!(!StorageError::NotFound("file.txt".into()).is_retryable());
        assert!(!StorageError::AlreadyExists("file.txt".into()).is_retryable());
        assert!(!StorageError::DirectoryNotEmpty("dir".into()).is_retryable());
    }

    #[test]
    fn test_error_display() {
        let err = StorageError::NotFound("upload/a.jpg".into());
        assert_eq!(format!("{}", err), "Path not found: upload/a.jpg");

        let err = StorageError::PartialFailure {
            failed: vec!["a".into(), "b".into()],
        };
        assert_eq!(
            format!("{}", err),
            "Partial failure: 2 key(s) could not be processed: a, b"
        );
    }

    #[test]
    fn test_from_io_classifies_kinds() {
        let err = std::io::Error::new(ErrorKind::NotFound, "gone");
        assert!(matches!(StorageError::from_io(err, "x"), StorageError::NotFound(p) if p == "x"));

        let err = std::io::Error::new(ErrorKind::AlreadyExists, "exists");
        assert!(matches!(StorageError::from_io(err, "y"), StorageError::AlreadyExists(_)));

        let err = std::io::Error::new(ErrorKind::PermissionDenied, "nope");
        assert!(matches!(StorageError::from_io(err, "z"), StorageError::Io(_)));
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: StorageError = io_err.into();
        assert!(matches!(err, StorageError::Io(_)));
    }
}
