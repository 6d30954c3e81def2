//! Logical paths and the directory-prefix convention
//!
//! Every backend receives slash-separated logical paths. Directory-like paths are
//! handed to a backend in their normalized form, ending with exactly one separator.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{StorageError, StorageResult};

/// Path separator for logical paths and object keys
pub const SEPARATOR: char = '/';

/// Append a single trailing separator if absent.
///
/// Idempotent: `normalize_dir(&normalize_dir(p)) == normalize_dir(p)`. Repeated
/// trailing separators collapse into one.
pub fn normalize_dir(path: &str) -> String {
    let mut dir = path.trim_end_matches(SEPARATOR).to_string();
    dir.push(SEPARATOR);
    dir
}

/// Name of `full_key` relative to `prefix`.
///
/// Nested segments below the prefix are preserved. A key outside the prefix means a
/// listing returned something it was not asked for.
pub fn relative_name<'a>(prefix: &str, full_key: &'a str) -> StorageResult<&'a str> {
    full_key.strip_prefix(prefix).ok_or_else(|| {
        StorageError::InvalidState(format!("{full_key} is not under prefix {prefix}"))
    })
}

/// Backend-agnostic path of a file or directory.
///
/// Never empty. Stored without leading or trailing separators and without empty
/// segments; `.` and `..` are rejected so a path cannot climb out of a backend root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LogicalPath(String);

impl LogicalPath {
    pub fn new(path: impl AsRef<str>) -> StorageResult<Self> {
        let raw = path.as_ref();
        let mut segments = Vec::new();
        for segment in raw.split(SEPARATOR).filter(|s| !s.is_empty()) {
            if segment == "." || segment == ".." {
                return Err(StorageError::InvalidPath(format!(
                    "{raw}: relative segment '{segment}' is not allowed"
                )));
            }
            if segment.contains('\0') {
                return Err(StorageError::InvalidPath(format!("{raw}: contains NUL")));
            }
            segments.push(segment);
        }
        if segments.is_empty() {
            return Err(StorageError::InvalidPath(format!("'{raw}' is empty")));
        }
        Ok(Self(segments.join("/")))
    }

    /// File form, e.g. `library/a.jpg`
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Normalized directory form, e.g. `library/`
    pub fn as_dir(&self) -> String {
        normalize_dir(&self.0)
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split(SEPARATOR)
    }

    pub fn name(&self) -> &str {
        self.0.rsplit(SEPARATOR).next().unwrap_or(&self.0)
    }

    pub fn parent(&self) -> Option<Self> {
        self.0
            .rsplit_once(SEPARATOR)
            .map(|(parent, _)| Self(parent.to_string()))
    }

    pub fn join(&self, child: impl AsRef<str>) -> StorageResult<Self> {
        Self::new(format!("{}/{}", self.0, child.as_ref()))
    }

    /// True when `self` equals `ancestor` or lies below it.
    pub fn starts_with(&self, ancestor: &LogicalPath) -> bool {
        self == ancestor || self.0.starts_with(&ancestor.as_dir())
    }
}

impl fmt::Display for LogicalPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for LogicalPath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for LogicalPath {
    type Err = StorageError;

    fn from_str(s: &str) -> StorageResult<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for LogicalPath {
    type Error = StorageError;

    fn try_from(value: String) -> StorageResult<Self> {
        Self::new(value)
    }
}

impl TryFrom<&str> for LogicalPath {
    type Error = StorageError;

    fn try_from(value: &str) -> StorageResult<Self> {
        Self::new(value)
    }
}

impl From<LogicalPath> for String {
    fn from(path: LogicalPath) -> Self {
        path.0
    }
}
