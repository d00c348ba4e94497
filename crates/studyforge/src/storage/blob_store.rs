//! Raw document bytes, addressed by content hash.

use std::path::PathBuf;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Store for raw uploaded bytes, keyed by an opaque blob id
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store bytes and return their blob id
    async fn put(&self, bytes: &[u8]) -> Result<String>;

    /// Fetch bytes by blob id
    async fn get(&self, blob_id: &str) -> Result<Vec<u8>>;

    /// Whether a blob exists
    async fn contains(&self, blob_id: &str) -> bool;
}

/// Filesystem store: one file per blob under the data directory, named by
/// the SHA-256 of the contents. Identical uploads share one file.
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&root)
            .map_err(|e| Error::blob(format!("Failed to create blob directory: {}", e)))?;
        Ok(Self { root })
    }

    fn path_for(&self, blob_id: &str) -> PathBuf {
        self.root.join(blob_id)
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, bytes: &[u8]) -> Result<String> {
        let blob_id = hex::encode(Sha256::digest(bytes));
        let path = self.path_for(&blob_id);
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(blob_id);
        }

        // Write to a uniquely named temp file, then rename into place so a
        // concurrent reader never observes a partial blob.
        let tmp = self.root.join(format!(".{}.{}.tmp", blob_id, Uuid::new_v4()));
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| Error::blob(format!("Failed to write blob: {}", e)))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| Error::blob(format!("Failed to finalize blob: {}", e)))?;
        Ok(blob_id)
    }

    async fn get(&self, blob_id: &str) -> Result<Vec<u8>> {
        tokio::fs::read(self.path_for(blob_id))
            .await
            .map_err(|e| Error::blob(format!("Failed to read blob {}: {}", blob_id, e)))
    }

    async fn contains(&self, blob_id: &str) -> bool {
        tokio::fs::try_exists(self.path_for(blob_id))
            .await
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path().to_path_buf()).unwrap();

        let blob_id = store.put(b"hello world").await.unwrap();
        assert!(store.contains(&blob_id).await);
        assert_eq!(store.get(&blob_id).await.unwrap(), b"hello world");
    }

    #[tokio::test]
    async fn identical_content_shares_one_blob() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path().to_path_buf()).unwrap();

        let a = store.put(b"same bytes").await.unwrap();
        let b = store.put(b"same bytes").await.unwrap();
        assert_eq!(a, b);

        let entries = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[tokio::test]
    async fn missing_blob_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path().to_path_buf()).unwrap();
        assert!(store.get("no-such-blob").await.is_err());
        assert!(!store.contains("no-such-blob").await);
    }
}
