//! Backend configuration
//!
//! The object store is configured from the environment (`S3_*` variables) or from
//! a TOML file; the local backend only needs a root directory.

use keel_core::{StorageBackend, StorageError, StorageResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::{LocalBackend, MemoryObjectStore, ObjectStoreBackend};

pub const ENV_BUCKET: &str = "S3_BUCKET";
pub const ENV_HOSTNAME: &str = "S3_HOSTNAME";
pub const ENV_PORT: &str = "S3_PORT";
pub const ENV_USE_SSL: &str = "S3_USE_SSL";
pub const ENV_ACCESS_KEY: &str = "S3_ACCESS_KEY";
pub const ENV_SECRET_KEY: &str = "S3_SECRET_KEY";
pub const ENV_REGION: &str = "S3_REGION";

const DEFAULT_PORT: u16 = 443;

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_region() -> String {
    "us-east-1".to_string()
}

/// Connection parameters for an S3-compatible store
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct S3Config {
    pub bucket: String,
    /// Endpoint host name, without scheme or port
    pub hostname: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub use_ssl: bool,
    #[serde(default)]
    pub access_key: String,
    #[serde(default)]
    pub secret_key: String,
    #[serde(default = "default_region")]
    pub region: String,
}

impl S3Config {
    /// Read the `S3_*` variables from the process environment.
    pub fn from_env() -> StorageResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable lookup; `from_env` uses the process environment.
    pub fn from_lookup<F>(lookup: F) -> StorageResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &str| -> StorageResult<String> {
            match lookup(name) {
                Some(value) if !value.is_empty() => Ok(value),
                _ => Err(StorageError::Config(format!("{name} is not set"))),
            }
        };

        let port = match lookup(ENV_PORT) {
            Some(raw) if !raw.is_empty() => raw
                .parse()
                .map_err(|_| StorageError::Config(format!("{ENV_PORT}={raw} is not a port number")))?,
            _ => DEFAULT_PORT,
        };

        Ok(Self {
            bucket: required(ENV_BUCKET)?,
            hostname: required(ENV_HOSTNAME)?,
            port,
            use_ssl: lookup(ENV_USE_SSL).as_deref() == Some("true"),
            access_key: lookup(ENV_ACCESS_KEY).unwrap_or_default(),
            secret_key: lookup(ENV_SECRET_KEY).unwrap_or_default(),
            region: lookup(ENV_REGION)
                .filter(|r| !r.is_empty())
                .unwrap_or_else(default_region),
        })
    }

    pub fn endpoint_url(&self) -> String {
        let scheme = if self.use_ssl { "https" } else { "http" };
        format!("{}://{}:{}", scheme, self.hostname, self.port)
    }
}

impl fmt::Debug for S3Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Config")
            .field("bucket", &self.bucket)
            .field("hostname", &self.hostname)
            .field("port", &self.port)
            .field("use_ssl", &self.use_ssl)
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .field("region", &self.region)
            .finish()
    }
}

/// Which backend to construct
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    Local { root: PathBuf },
    S3(S3Config),
    /// Process-local object store, lost on exit
    Memory,
}

impl StorageConfig {
    pub fn from_toml(text: &str) -> StorageResult<Self> {
        toml::from_str(text).map_err(|e| StorageError::Config(e.to_string()))
    }

    pub fn load(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| StorageError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml(&text)
    }
}

/// Construct the backend selected by `config`.
pub fn open_backend(config: &StorageConfig) -> StorageResult<Arc<dyn StorageBackend>> {
    match config {
        StorageConfig::Local { root } => Ok(Arc::new(LocalBackend::new("local", root))),
        #[cfg(feature = "s3")]
        StorageConfig::S3(s3) => {
            let client = crate::S3Client::new(s3.clone())?;
            Ok(Arc::new(ObjectStoreBackend::new("s3", Arc::new(client))))
        }
        #[cfg(not(feature = "s3"))]
        StorageConfig::S3(_) => Err(StorageError::Unsupported(
            "built without the s3 feature".into(),
        )),
        StorageConfig::Memory => Ok(Arc::new(ObjectStoreBackend::new(
            "memory",
            Arc::new(MemoryObjectStore::new("memory")),
        ))),
    }
}
