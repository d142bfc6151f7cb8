//! Durable Store Abstraction
//!
//! Key-value blob storage that outlives a request. The core contract is
//! `get`/`put` with full-overwrite, last-writer-wins semantics. Backends may
//! also implement the compare-and-swap extension (`get_versioned`,
//! `put_if_version`); the default implementations report
//! [`DurableError::Unsupported`].
//!
//! Implementations:
//! - `InMemoryDurableStore`: For unit tests, DST and single-process dev
//! - `LocalFsDurableStore`: One file per key under a base directory

use parking_lot::RwLock;
use std::collections::HashMap;
use std::future::Future;
use std::io::{Error as IoError, ErrorKind};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

/// Boxed future returned by store operations
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, DurableError>> + Send + 'a>>;

/// Opaque version token for compare-and-swap writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Version(pub u64);

/// A blob together with the version it was read at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned {
    pub data: Vec<u8>,
    pub version: Version,
}

/// Error type for durable store operations
#[derive(Debug)]
pub enum DurableError {
    /// I/O error from the backend
    Io(IoError),
    /// Compare-and-swap precondition failed
    VersionMismatch {
        key: String,
        expected: Option<Version>,
        actual: Option<Version>,
    },
    /// Backend does not implement the requested operation
    Unsupported(&'static str),
    /// Key cannot be stored by this backend
    InvalidKey(String),
}

impl std::fmt::Display for DurableError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DurableError::Io(e) => write!(f, "I/O error: {}", e),
            DurableError::VersionMismatch {
                key,
                expected,
                actual,
            } => write!(
                f,
                "Version mismatch for {}: expected {:?}, found {:?}",
                key, expected, actual
            ),
            DurableError::Unsupported(op) => write!(f, "Operation not supported: {}", op),
            DurableError::InvalidKey(key) => write!(f, "Invalid key: {}", key),
        }
    }
}

impl std::error::Error for DurableError {}

impl From<IoError> for DurableError {
    fn from(e: IoError) -> Self {
        DurableError::Io(e)
    }
}

/// Durable key-value store
///
/// Boxed-future methods keep the trait object-safe so handlers can hold an
/// `Arc<dyn DurableStore>`.
pub trait DurableStore: Send + Sync + 'static {
    /// Fetch the blob stored under `key`, `None` if absent
    fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<Vec<u8>>>;

    /// Replace whatever is stored under `key`
    fn put<'a>(&'a self, key: &'a str, data: &'a [u8]) -> StoreFuture<'a, ()>;

    /// Fetch the blob and its current version
    fn get_versioned<'a>(&'a self, _key: &'a str) -> StoreFuture<'a, Option<Versioned>> {
        Box::pin(async { Err(DurableError::Unsupported("get_versioned")) })
    }

    /// Write only if the current version equals `expected` (`None` = key absent).
    /// Returns the new version.
    fn put_if_version<'a>(
        &'a self,
        _key: &'a str,
        _expected: Option<Version>,
        _data: &'a [u8],
    ) -> StoreFuture<'a, Version> {
        Box::pin(async { Err(DurableError::Unsupported("put_if_version")) })
    }
}

// ============================================================================
// InMemoryDurableStore - For tests and DST
// ============================================================================

#[derive(Debug, Clone)]
struct StoredBlob {
    data: Vec<u8>,
    version: u64,
}

/// In-memory durable store. Clones share the same data.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDurableStore {
    data: Arc<RwLock<HashMap<String, StoredBlob>>>,
}

impl InMemoryDurableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the number of stored keys (for testing)
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Check if empty (for testing)
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    /// Raw blob under `key` without going through the async API (for testing)
    pub fn raw(&self, key: &str) -> Option<Vec<u8>> {
        self.data.read().get(key).map(|blob| blob.data.clone())
    }

    /// Sorted list of stored keys (for testing)
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.data.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    fn write_blob(&self, key: &str, data: &[u8]) -> Version {
        let mut map = self.data.write();
        let version = map.get(key).map(|b| b.version).unwrap_or(0) + 1;
        map.insert(
            key.to_string(),
            StoredBlob {
                data: data.to_vec(),
                version,
            },
        );
        Version(version)
    }
}

impl DurableStore for InMemoryDurableStore {
    fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<Vec<u8>>> {
        Box::pin(async move { Ok(self.data.read().get(key).map(|blob| blob.data.clone())) })
    }

    fn put<'a>(&'a self, key: &'a str, data: &'a [u8]) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            self.write_blob(key, data);
            Ok(())
        })
    }

    fn get_versioned<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<Versioned>> {
        Box::pin(async move {
            Ok(self.data.read().get(key).map(|blob| Versioned {
                data: blob.data.clone(),
                version: Version(blob.version),
            }))
        })
    }

    fn put_if_version<'a>(
        &'a self,
        key: &'a str,
        expected: Option<Version>,
        data: &'a [u8],
    ) -> StoreFuture<'a, Version> {
        Box::pin(async move {
            // Check and write under one lock
            let mut map = self.data.write();
            let actual = map.get(key).map(|blob| Version(blob.version));
            if actual != expected {
                return Err(DurableError::VersionMismatch {
                    key: key.to_string(),
                    expected,
                    actual,
                });
            }
            let version = actual.map(|v| v.0).unwrap_or(0) + 1;
            map.insert(
                key.to_string(),
                StoredBlob {
                    data: data.to_vec(),
                    version,
                },
            );
            Ok(Version(version))
        })
    }
}

// ============================================================================
// LocalFsDurableStore - One file per key
// ============================================================================

/// Local filesystem durable store.
///
/// Each key is stored as one file, its name escaped to be portable. Keys
/// containing `/`, `\` or NUL are rejected.
///
/// Writes go to a temp file that is renamed over the target, so readers never
/// see a torn blob. The version of a key is the CRC32 of its contents;
/// compare-and-swap holds within one process only.
#[derive(Debug, Clone)]
pub struct LocalFsDurableStore {
    base_path: PathBuf,
    cas_lock: Arc<tokio::sync::Mutex<()>>,
}

impl LocalFsDurableStore {
    /// Create a store rooted at `base_path`, creating the directory if needed
    pub fn open(base_path: impl Into<PathBuf>) -> Result<Self, DurableError> {
        let base_path = base_path.into();
        std::fs::create_dir_all(&base_path)?;
        Ok(LocalFsDurableStore {
            base_path,
            cas_lock: Arc::new(tokio::sync::Mutex::new(())),
        })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Map a key to its file, rejecting keys that would escape the base directory
    fn full_path(&self, key: &str) -> Result<PathBuf, DurableError> {
        let valid = !key.is_empty()
            && key != "."
            && key != ".."
            && !key.contains(['/', '\\', '\0']);
        if !valid {
            return Err(DurableError::InvalidKey(key.to_string()));
        }
        Ok(self.base_path.join(Self::file_name(key)))
    }

    /// Escape `%` and the characters Windows forbids in file names as `%XX`,
    /// so `levels:acme` lives in `levels%3Aacme` on every platform
    fn file_name(key: &str) -> String {
        let mut name = String::with_capacity(key.len());
        for c in key.chars() {
            match c {
                '%' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => {
                    name.push_str(&format!("%{:02X}", c as u32));
                }
                c => name.push(c),
            }
        }
        name
    }

    fn content_version(data: &[u8]) -> Version {
        Version(crc32fast::hash(data) as u64)
    }

    async fn read_file(path: &Path) -> Result<Option<Vec<u8>>, DurableError> {
        match tokio::fs::read(path).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_file(path: &Path, data: &[u8]) -> Result<(), DurableError> {
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(format!(".tmp-{}", uuid::Uuid::new_v4().simple()));
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, data).await?;
        if let Err(e) = tokio::fs::rename(&tmp, path).await {
            // Best effort, the temp file is orphaned otherwise
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }
}

impl DurableStore for LocalFsDurableStore {
    fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<Vec<u8>>> {
        Box::pin(async move {
            let path = self.full_path(key)?;
            Self::read_file(&path).await
        })
    }

    fn put<'a>(&'a self, key: &'a str, data: &'a [u8]) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let path = self.full_path(key)?;
            Self::write_file(&path, data).await
        })
    }

    fn get_versioned<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<Versioned>> {
        Box::pin(async move {
            let path = self.full_path(key)?;
            Ok(Self::read_file(&path).await?.map(|data| Versioned {
                version: Self::content_version(&data),
                data,
            }))
        })
    }

    fn put_if_version<'a>(
        &'a self,
        key: &'a str,
        expected: Option<Version>,
        data: &'a [u8],
    ) -> StoreFuture<'a, Version> {
        Box::pin(async move {
            let path = self.full_path(key)?;
            let _guard = self.cas_lock.lock().await;

            let actual = Self::read_file(&path)
                .await?
                .map(|current| Self::content_version(&current));
            if actual != expected {
                return Err(DurableError::VersionMismatch {
                    key: key.to_string(),
                    expected,
                    actual,
                });
            }

            Self::write_file(&path, data).await?;
            Ok(Self::content_version(data))
        })
    }
}
