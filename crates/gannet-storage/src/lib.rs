//! Blob storage for built artifacts, selected by `BUILDS_STORAGE_DSN`.
//!
//! Objects live under structured keys
//! (`{index}/{platform}/{package}/{version}/{filename}`) and are immutable
//! once written: a rebuild publishes by writing a sibling temp file and
//! renaming it over the key, so readers never observe a partial artifact.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;
use url::Url;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Invalid storage DSN: {0}")]
    InvalidDsn(String),

    #[error("Unsupported storage backend: {0}")]
    UnsupportedBackend(String),

    #[error("Invalid blob path: {0}")]
    InvalidPath(String),

    #[error("Blob not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A handle to the configured blob backend.
///
/// Only the filesystem backend exists today; the enum keeps the DSN switch
/// in one place.
#[derive(Debug, Clone)]
pub enum BlobStore {
    FileSystem(FileSystemStore),
}

impl BlobStore {
    /// Construct the backend selected by the DSN. `public_url` is the base
    /// under which stored blobs are reachable by clients.
    pub fn from_dsn(dsn: &str, public_url: Url) -> Result<Self, StorageError> {
        let url = Url::parse(dsn).map_err(|err| StorageError::InvalidDsn(err.to_string()))?;
        match url.scheme() {
            "file" => {
                let root = url
                    .to_file_path()
                    .map_err(|()| StorageError::InvalidDsn(dsn.to_string()))?;
                Ok(Self::FileSystem(FileSystemStore::new(root, public_url)?))
            }
            scheme => Err(StorageError::UnsupportedBackend(scheme.to_string())),
        }
    }

    /// Atomically publish `source` under `path`, replacing any previous
    /// object at that key.
    pub async fn put(&self, path: &str, source: &Path) -> Result<(), StorageError> {
        match self {
            Self::FileSystem(store) => store.put(path, source).await,
        }
    }

    /// The client-facing URL of the object at `path`.
    pub fn url(&self, path: &str) -> Result<Url, StorageError> {
        match self {
            Self::FileSystem(store) => store.url(path),
        }
    }

    /// The local file backing `path`, for backends that have one.
    pub fn local_path(&self, path: &str) -> Result<PathBuf, StorageError> {
        match self {
            Self::FileSystem(store) => store.local_path(path),
        }
    }

    pub async fn contains(&self, path: &str) -> bool {
        match self {
            Self::FileSystem(store) => {
                store.local_path(path).is_ok_and(|path| path.is_file())
            }
        }
    }

    /// Remove the object at `path`, if present. Removal of a missing key is
    /// not an error; cascades may race with rebuilds.
    pub async fn remove(&self, path: &str) -> Result<(), StorageError> {
        match self {
            Self::FileSystem(store) => store.remove(path).await,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FileSystemStore {
    root: PathBuf,
    public_url: Url,
}

impl FileSystemStore {
    fn new(root: PathBuf, public_url: Url) -> Result<Self, StorageError> {
        fs_err::create_dir_all(&root)?;
        Ok(Self { root, public_url })
    }

    async fn put(&self, path: &str, source: &Path) -> Result<(), StorageError> {
        let dest = self.local_path(path)?;
        let parent = dest
            .parent()
            .ok_or_else(|| StorageError::InvalidPath(path.to_string()))?;
        fs_err::create_dir_all(parent)?;

        // Stage in the destination directory so the final rename cannot
        // cross filesystems.
        let staged = tempfile::NamedTempFile::new_in(parent)?;
        fs_err::tokio::copy(source, staged.path()).await?;
        staged
            .persist(&dest)
            .map_err(|err| StorageError::Io(err.error))?;
        debug!(path, "stored artifact");
        Ok(())
    }

    fn url(&self, path: &str) -> Result<Url, StorageError> {
        validate(path)?;
        self.public_url
            .join(path)
            .map_err(|_| StorageError::InvalidPath(path.to_string()))
    }

    fn local_path(&self, path: &str) -> Result<PathBuf, StorageError> {
        validate(path)?;
        Ok(self.root.join(path))
    }

    async fn remove(&self, path: &str) -> Result<(), StorageError> {
        let local = self.local_path(path)?;
        match fs_err::tokio::remove_file(&local).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

/// Reject keys that would escape the store root.
fn validate(path: &str) -> Result<(), StorageError> {
    if path.is_empty()
        || path.starts_with('/')
        || path
            .split('/')
            .any(|segment| segment.is_empty() || segment == "." || segment == "..")
    {
        return Err(StorageError::InvalidPath(path.to_string()));
    }
    Ok(())
}
