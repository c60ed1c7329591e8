//! Object storage for photo payloads.
//!
//! Photos are uploaded before their marker is written; the marker only keeps
//! the returned URLs. [`FsObjectStore`] keeps objects in a local directory,
//! named by the BLAKE3 hash of their content, so uploading the same bytes
//! twice yields the same URL.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// File extension given to uploaded images.
const IMAGE_EXTENSION: &str = "jpg";

/// A blob store that hands back a URL for each upload.
#[async_trait]
pub trait ObjectStore: Send + Sync + std::fmt::Debug {
    /// Store `bytes` and return a URL that resolves to them.
    async fn upload(&self, bytes: Vec<u8>) -> Result<String>;
}

/// Object store backed by a local directory.
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    /// Open (and create if needed) an object directory.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DirectoryCreate`] if the directory cannot be created.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root).map_err(|e| Error::DirectoryCreate {
            path: root.clone(),
            source: e,
        })?;
        debug!(path = %root.display(), "Object store opened");
        Ok(Self { root })
    }

    /// Directory objects are written to.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Content-derived object key for `bytes`.
    #[must_use]
    pub fn object_key(bytes: &[u8]) -> String {
        format!("{}.{IMAGE_EXTENSION}", blake3::hash(bytes).to_hex())
    }

    /// Local path an object URL points at, if it belongs to this store.
    #[must_use]
    pub fn resolve(&self, url: &str) -> Option<PathBuf> {
        let path = PathBuf::from(url.strip_prefix("file://")?);
        path.starts_with(&self.root).then_some(path)
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn upload(&self, bytes: Vec<u8>) -> Result<String> {
        if bytes.is_empty() {
            return Err(Error::Upload("refusing to upload an empty object".to_string()));
        }

        let path = self.root.join(Self::object_key(&bytes));
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            debug!(path = %path.display(), "Object already stored");
        } else {
            tokio::fs::write(&path, &bytes).await.map_err(|e| {
                warn!(path = %path.display(), error = %e, "Error uploading object");
                Error::Upload(format!("{}: {e}", path.display()))
            })?;
            info!(path = %path.display(), size = bytes.len(), "Object uploaded");
        }

        Ok(format!("file://{}", path.display()))
    }
}
